//! host bridge: json commands in, json events out
//!
//! a command looks like
//!
//! ```text
//! {"command":"splitKey","params":{"identity":"…","secretHex":"…"}}
//! ```
//!
//! and every command produces exactly one terminal event, e.g.
//! `{"command":"keySplitFinished","params":{"ts":"…","ds":"…","ss":"…"}}`.
//! unit events carry no params: `{"command":"torusShareDeleted"}`.
//!
//! a known command whose params do not parse still gets its failure
//! event; see [`Inbound::parse`].
//!
//! the host may submit before it is ready to receive events (page load).
//! such commands are queued and run in submission order, once, when the
//! host signals readiness.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::field::Secret;
use crate::orchestrator::{Orchestrator, Reconstruction};
use crate::share::Share;
use crate::Error;

/// message for a reconstruct against an identity with nothing stored
pub const NO_SHARE_FOUND: &str = "no torus share found for identity";

/// host → core
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "command",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    SplitKey {
        identity: String,
        secret_hex: String,
    },
    SaveTorusShare {
        identity: String,
        share_json: String,
        label: String,
    },
    ReconstructKeyWithTorusShare {
        identity: String,
        share_json: String,
    },
    ReconstructKeyWithShares {
        share_json: String,
        share_json2: String,
    },
    GetTorusShare {
        identity: String,
    },
    DeleteTorusShare {
        identity: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SplitKey { .. } => "splitKey",
            Command::SaveTorusShare { .. } => "saveTorusShare",
            Command::ReconstructKeyWithTorusShare { .. } => "reconstructKeyWithTorusShare",
            Command::ReconstructKeyWithShares { .. } => "reconstructKeyWithShares",
            Command::GetTorusShare { .. } => "getTorusShare",
            Command::DeleteTorusShare { .. } => "deleteTorusShare",
        }
    }

    /// the failure event a command named `name` answers with
    pub fn failure_event(name: &str, message: String) -> Option<Event> {
        let event = match name {
            "splitKey" => Event::KeySplitFailed { message },
            "saveTorusShare" => Event::SaveTorusShareFailed { message },
            "reconstructKeyWithTorusShare" | "reconstructKeyWithShares" => {
                Event::PrivateKeyReconstructFailed {
                    message,
                    reason: None,
                }
            }
            "getTorusShare" => Event::TorusShareRetrieveFailed { message },
            "deleteTorusShare" => Event::TorusShareDeleteFailed { message },
            _ => return None,
        };
        Some(event)
    }
}

// params hold identities, secrets and shares
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self.name())
    }
}

/// one line from the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    /// known command with unusable params, answered by its failure event
    Rejected(Event),
}

impl Inbound {
    /// parse a host line
    ///
    /// errors only when the line is not json or names no known command.
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        match Command::deserialize(&value) {
            Ok(command) => Ok(Inbound::Command(command)),
            Err(e) => value
                .get("command")
                .and_then(serde_json::Value::as_str)
                .and_then(|name| Command::failure_event(name, format!("invalid {} params: {}", name, e)))
                .map(Inbound::Rejected)
                .ok_or(e),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Inbound::Command(command) => command.name(),
            Inbound::Rejected(event) => event.name(),
        }
    }
}

impl From<Command> for Inbound {
    fn from(command: Command) -> Self {
        Inbound::Command(command)
    }
}

/// why a reconstruct failed, when the host needs to branch on it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    /// nothing stored for the identity
    NoShareFound,
}

/// core → host
///
/// shares travel as their canonical json strings, private keys as 64
/// hex digits.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "command",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    KeySplitFinished { ts: String, ds: String, ss: String },
    KeySplitFailed { message: String },
    TorusShareSaved,
    SaveTorusShareFailed { message: String },
    PrivateKeyReconstructed { private_key: String },
    PrivateKeyReconstructedWithShares { private_key: String, share: String },
    PrivateKeyReconstructFailed {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<FailureReason>,
    },
    TorusShareRetrieved { share: String },
    NoTorusShareRetrieved,
    TorusShareRetrieveFailed { message: String },
    TorusShareDeleted,
    TorusShareDeleteFailed { message: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::KeySplitFinished { .. } => "keySplitFinished",
            Event::KeySplitFailed { .. } => "keySplitFailed",
            Event::TorusShareSaved => "torusShareSaved",
            Event::SaveTorusShareFailed { .. } => "saveTorusShareFailed",
            Event::PrivateKeyReconstructed { .. } => "privateKeyReconstructed",
            Event::PrivateKeyReconstructedWithShares { .. } => "privateKeyReconstructedWithShares",
            Event::PrivateKeyReconstructFailed { .. } => "privateKeyReconstructFailed",
            Event::TorusShareRetrieved { .. } => "torusShareRetrieved",
            Event::NoTorusShareRetrieved => "noTorusShareRetrieved",
            Event::TorusShareRetrieveFailed { .. } => "torusShareRetrieveFailed",
            Event::TorusShareDeleted => "torusShareDeleted",
            Event::TorusShareDeleteFailed { .. } => "torusShareDeleteFailed",
        }
    }

    /// failure message, if this is a `...Failed` event
    pub fn failure(&self) -> Option<&str> {
        match self {
            Event::KeySplitFailed { message }
            | Event::SaveTorusShareFailed { message }
            | Event::PrivateKeyReconstructFailed { message, .. }
            | Event::TorusShareRetrieveFailed { message }
            | Event::TorusShareDeleteFailed { message } => Some(message),
            _ => None,
        }
    }

    /// typed failure cause, where one exists
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Event::PrivateKeyReconstructFailed { reason, .. } => *reason,
            _ => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure() {
            Some(message) => write!(f, "Event({}: {})", self.name(), message),
            None => write!(f, "Event({})", self.name()),
        }
    }
}

struct Gate {
    ready: bool,
    pending: VecDeque<Inbound>,
}

/// readiness gated command dispatcher
pub struct Bridge {
    orchestrator: Arc<Orchestrator>,
    events: mpsc::UnboundedSender<Event>,
    gate: Mutex<Gate>,
}

impl Bridge {
    /// bridge plus the receiving end of its event stream. starts not ready.
    pub fn new(orchestrator: Arc<Orchestrator>) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            orchestrator,
            events,
            gate: Mutex::new(Gate {
                ready: false,
                pending: VecDeque::new(),
            }),
        };
        (bridge, rx)
    }

    /// run `command` now if the host is ready, otherwise queue it
    pub async fn submit(&self, command: Command) {
        self.submit_inbound(command.into()).await;
    }

    /// as [`Bridge::submit`], for a parsed host line
    pub async fn submit_inbound(&self, inbound: Inbound) {
        {
            let mut gate = self.gate.lock().await;
            if !gate.ready {
                debug!(command = inbound.name(), queued = gate.pending.len() + 1, "host not ready, queueing");
                gate.pending.push_back(inbound);
                return;
            }
        }
        self.dispatch(inbound).await;
    }

    /// open the gate and drain the queue in order
    ///
    /// returns how many queued commands ran. a second call while ready
    /// runs nothing.
    pub async fn mark_ready(&self) -> usize {
        let mut gate = self.gate.lock().await;
        if gate.ready {
            return 0;
        }
        gate.ready = true;

        let pending: Vec<Inbound> = gate.pending.drain(..).collect();
        let drained = pending.len();
        if drained > 0 {
            info!(drained, "host ready, running queued commands");
        }
        // submits racing the drain wait on the gate and run afterwards
        for inbound in pending {
            self.dispatch(inbound).await;
        }
        drained
    }

    /// close the gate again, e.g. when the host reloads
    pub async fn mark_unready(&self) {
        self.gate.lock().await.ready = false;
    }

    pub async fn is_ready(&self) -> bool {
        self.gate.lock().await.ready
    }

    /// number of queued commands
    pub async fn pending(&self) -> usize {
        self.gate.lock().await.pending.len()
    }

    async fn dispatch(&self, inbound: Inbound) {
        let name = inbound.name();
        let event = match inbound {
            Inbound::Command(command) => self.execute(command).await,
            Inbound::Rejected(event) => event,
        };
        debug!(command = name, event = event.name(), "command finished");
        if self.events.send(event).is_err() {
            debug!(command = name, "event receiver dropped");
        }
    }

    /// run one command to its terminal event, bypassing the gate
    pub async fn execute(&self, command: Command) -> Event {
        let engine = &self.orchestrator;
        match command {
            Command::SplitKey {
                identity,
                secret_hex,
            } => {
                let result = match Secret::from_hex(&secret_hex) {
                    Ok(secret) => engine.split_key(&identity, &secret).await,
                    Err(e) => Err(e.key_split()),
                };
                match result.and_then(|set| set.encode().map_err(Error::key_split)) {
                    Ok(encoded) => Event::KeySplitFinished {
                        ts: encoded.ts.encode(),
                        ds: encoded.ds.encode(),
                        ss: encoded.ss.encode(),
                    },
                    Err(e) => Event::KeySplitFailed {
                        message: e.to_string(),
                    },
                }
            }

            Command::SaveTorusShare {
                identity,
                share_json,
                label,
            } => {
                let result = match Share::decode(&share_json) {
                    Ok(share) => engine.save_provider_share(&identity, &share, &label).await,
                    Err(e) => Err(e.save()),
                };
                match result {
                    Ok(()) => Event::TorusShareSaved,
                    Err(e) => Event::SaveTorusShareFailed {
                        message: e.to_string(),
                    },
                }
            }

            Command::ReconstructKeyWithTorusShare {
                identity,
                share_json,
            } => {
                let result = match Share::decode(&share_json) {
                    Ok(local) => engine.reconstruct_key(&identity, &local).await,
                    Err(e) => Err(e.reconstruct()),
                };
                match result {
                    Ok(Reconstruction::Reconstructed {
                        secret,
                        derived_share,
                    }) => Event::PrivateKeyReconstructedWithShares {
                        private_key: secret.to_hex(),
                        share: derived_share.encode(),
                    },
                    Ok(Reconstruction::NoShareFound) => Event::PrivateKeyReconstructFailed {
                        message: NO_SHARE_FOUND.into(),
                        reason: Some(FailureReason::NoShareFound),
                    },
                    Err(e) => Event::PrivateKeyReconstructFailed {
                        message: e.to_string(),
                        reason: None,
                    },
                }
            }

            Command::ReconstructKeyWithShares {
                share_json,
                share_json2,
            } => {
                let result = Share::decode(&share_json)
                    .and_then(|a| Ok((a, Share::decode(&share_json2)?)))
                    .map_err(Error::reconstruct)
                    .and_then(|(a, b)| engine.reconstruct_key_from_two_local_shares(&a, &b));
                match result {
                    Ok(secret) => Event::PrivateKeyReconstructed {
                        private_key: secret.to_hex(),
                    },
                    Err(e) => Event::PrivateKeyReconstructFailed {
                        message: e.to_string(),
                        reason: None,
                    },
                }
            }

            Command::GetTorusShare { identity } => match engine.get_provider_share(&identity).await {
                Ok(Some(share)) => Event::TorusShareRetrieved {
                    share: share.encode(),
                },
                Ok(None) => Event::NoTorusShareRetrieved,
                Err(e) => Event::TorusShareRetrieveFailed {
                    message: e.to_string(),
                },
            },

            Command::DeleteTorusShare { identity } => {
                match engine.delete_provider_share(&identity).await {
                    Ok(()) => Event::TorusShareDeleted,
                    Err(e) => Event::TorusShareDeleteFailed {
                        message: e.to_string(),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poly::split;
    use crate::store::MemoryStore;

    fn bridge() -> (Bridge, mpsc::UnboundedReceiver<Event>) {
        let engine = Orchestrator::with_store(Arc::new(MemoryStore::new()));
        Bridge::new(Arc::new(engine))
    }

    fn split_cmd(identity: &str, secret_hex: &str) -> Command {
        Command::SplitKey {
            identity: identity.into(),
            secret_hex: secret_hex.into(),
        }
    }

    #[test]
    fn test_command_wire_shape() {
        let json = r#"{"command":"splitKey","params":{"identity":"alice","secretHex":"0x1"}}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, split_cmd("alice", "0x1"));

        let json = r#"{"command":"reconstructKeyWithShares","params":{"shareJson":"a","shareJson2":"b"}}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.name(), "reconstructKeyWithShares");

        assert!(serde_json::from_str::<Command>(r#"{"command":"formatDisk","params":{}}"#).is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let unit = serde_json::to_value(&Event::TorusShareDeleted).unwrap();
        assert_eq!(unit, serde_json::json!({"command": "torusShareDeleted"}));

        let event = Event::PrivateKeyReconstructed {
            private_key: "00".repeat(32),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["command"], "privateKeyReconstructed");
        assert_eq!(value["params"]["privateKey"], "00".repeat(32));
    }

    #[test]
    fn test_debug_redacts() {
        let cmd = split_cmd("alice", "deadbeef");
        let shown = format!("{:?}", cmd);
        assert!(!shown.contains("deadbeef") && !shown.contains("alice"));

        let event = Event::PrivateKeyReconstructed {
            private_key: "deadbeef".into(),
        };
        assert!(!format!("{:?}", event).contains("deadbeef"));
    }

    #[tokio::test]
    async fn test_queue_drains_in_order_once() {
        let (bridge, mut rx) = bridge();

        bridge.submit(split_cmd("alice", "1")).await;
        bridge
            .submit(Command::GetTorusShare {
                identity: "alice".into(),
            })
            .await;
        bridge
            .submit(Command::DeleteTorusShare {
                identity: "alice".into(),
            })
            .await;

        assert_eq!(bridge.pending().await, 3);
        assert!(rx.try_recv().is_err(), "nothing runs before ready");

        assert_eq!(bridge.mark_ready().await, 3);
        assert_eq!(bridge.mark_ready().await, 0);

        let names: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, ["keySplitFinished", "torusShareRetrieved", "torusShareDeleted"]);
    }

    #[tokio::test]
    async fn test_ready_runs_immediately_and_rearms() {
        let (bridge, mut rx) = bridge();
        bridge.mark_ready().await;
        assert!(bridge.is_ready().await);

        bridge
            .submit(Command::GetTorusShare {
                identity: "bob".into(),
            })
            .await;
        assert_eq!(rx.try_recv().unwrap(), Event::NoTorusShareRetrieved);

        bridge.mark_unready().await;
        bridge
            .submit(Command::GetTorusShare {
                identity: "bob".into(),
            })
            .await;
        assert_eq!(bridge.pending().await, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(bridge.mark_ready().await, 1);
        assert_eq!(rx.try_recv().unwrap(), Event::NoTorusShareRetrieved);
    }

    #[tokio::test]
    async fn test_malformed_params_fail_per_command() {
        let (bridge, _rx) = bridge();

        let event = bridge.execute(split_cmd("alice", "xyz")).await;
        assert_eq!(event.name(), "keySplitFailed");
        assert!(event.failure().unwrap().contains("invalid secret"));

        let event = bridge
            .execute(Command::SaveTorusShare {
                identity: "alice".into(),
                share_json: "{}".into(),
                label: "a".into(),
            })
            .await;
        assert_eq!(event.name(), "saveTorusShareFailed");

        let event = bridge
            .execute(Command::ReconstructKeyWithShares {
                share_json: "nope".into(),
                share_json2: "nope".into(),
            })
            .await;
        assert_eq!(event.name(), "privateKeyReconstructFailed");
        assert_eq!(event.reason(), None);
        let value = serde_json::to_value(&event).unwrap();
        assert!(value["params"].get("reason").is_none());
    }

    #[test]
    fn test_unparseable_params_answer_with_failure_event() {
        let inbound = Inbound::parse(r#"{"command":"getTorusShare","params":{}}"#).unwrap();
        let Inbound::Rejected(event) = inbound else {
            panic!("missing identity must not parse");
        };
        assert_eq!(event.name(), "torusShareRetrieveFailed");
        assert!(event.failure().unwrap().contains("invalid getTorusShare params"));

        let inbound =
            Inbound::parse(r#"{"command":"splitKey","params":{"identity":"alice","secretHex":1}}"#).unwrap();
        assert_eq!(inbound.name(), "keySplitFailed");

        let inbound = Inbound::parse(r#"{"command":"reconstructKeyWithShares"}"#).unwrap();
        assert_eq!(inbound.name(), "privateKeyReconstructFailed");

        let inbound = Inbound::parse(r#"{"command":"deleteTorusShare","params":{"identity":"a"}}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Command(Command::DeleteTorusShare {
                identity: "a".into()
            })
        );

        assert!(Inbound::parse(r#"{"command":"formatDisk","params":{}}"#).is_err());
        assert!(Inbound::parse(r#"{"params":{}}"#).is_err());
        assert!(Inbound::parse("not json").is_err());
    }

    #[tokio::test]
    async fn test_rejected_command_keeps_queue_order() {
        let (bridge, mut rx) = bridge();

        bridge.submit(split_cmd("alice", "1")).await;
        let bad = Inbound::parse(r#"{"command":"saveTorusShare","params":{"identity":"alice"}}"#).unwrap();
        bridge.submit_inbound(bad).await;
        bridge
            .submit(Command::GetTorusShare {
                identity: "alice".into(),
            })
            .await;
        assert_eq!(bridge.pending().await, 3);
        assert!(rx.try_recv().is_err());

        assert_eq!(bridge.mark_ready().await, 3);
        let names: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, ["keySplitFinished", "saveTorusShareFailed", "torusShareRetrieved"]);
    }

    #[tokio::test]
    async fn test_reconstruct_events() {
        let (bridge, _rx) = bridge();
        let set = split(&Secret::from_hex("abc").unwrap(), 2, 3).unwrap();
        let ds = set.get(2).unwrap().encode();
        let ss = set.get(3).unwrap().encode();

        let event = bridge
            .execute(Command::ReconstructKeyWithTorusShare {
                identity: "carol".into(),
                share_json: ds.clone(),
            })
            .await;
        assert_eq!(
            event,
            Event::PrivateKeyReconstructFailed {
                message: NO_SHARE_FOUND.into(),
                reason: Some(FailureReason::NoShareFound),
            }
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["params"]["reason"], "noShareFound");

        let event = bridge
            .execute(Command::ReconstructKeyWithShares {
                share_json: ds,
                share_json2: ss,
            })
            .await;
        let expected = format!("{:0>64}", "abc");
        assert_eq!(
            event,
            Event::PrivateKeyReconstructed {
                private_key: expected
            }
        );
    }
}
