//! tkey-bridge - drive the tkey engine over stdin/stdout
//!
//! reads one json command per line on stdin, writes one json event per
//! line on stdout. logs go to stderr.
//!
//! usage:
//!   echo '{"command":"getTorusShare","params":{"identity":"alice"}}' | tkey-bridge
//!   tkey-bridge --memory          # offline, nothing leaves the process
//!   tkey-bridge --config tkey.toml --metadata-url http://localhost:5051

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tkey::{Bridge, Config, Inbound, MemoryStore, MetadataClient, Orchestrator, ShareStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tkey-bridge")]
#[command(about = "line oriented json driver for the tkey engine", long_about = None)]
#[command(version)]
struct Args {
    /// toml config file (environment variables still override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// metadata service url
    #[arg(long)]
    metadata_url: Option<String>,

    /// namespace for provider shares
    #[arg(long)]
    namespace: Option<String>,

    /// per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// what to do when the stored share belongs to another key (force|refuse)
    #[arg(long)]
    resplit_policy: Option<String>,

    /// use an in-memory store instead of the metadata service
    #[arg(long)]
    memory: bool,

    /// health probes before opening the gate anyway
    #[arg(long, default_value = "5")]
    probe_attempts: u32,
}

impl Args {
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::from_env()?,
        };
        if let Some(url) = &self.metadata_url {
            config.metadata_url = url.clone();
        }
        if let Some(ns) = &self.namespace {
            config.namespace = ns.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(policy) = &self.resplit_policy {
            config.resplit_policy = policy.parse()?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// wait for the metadata service, then open the gate
async fn open_when_healthy(bridge: Arc<Bridge>, client: Option<Arc<MetadataClient>>, attempts: u32) {
    if let Some(client) = client {
        let mut delay = Duration::from_millis(250);
        for attempt in 1..=attempts.max(1) {
            match client.health().await {
                Ok(()) => break,
                Err(e) if attempt == attempts.max(1) => {
                    error!("metadata service unreachable after {} attempts: {}", attempt, e);
                    warn!("opening gate anyway, commands will report their failures");
                }
                Err(e) => {
                    warn!("health probe {} failed: {}", attempt, e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    let drained = bridge.mark_ready().await;
    info!("bridge ready ({} queued commands ran)", drained);
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries events only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tkey_bridge=info,tkey=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(args.resolve_config().context("invalid configuration")?);

    let client = if args.memory {
        None
    } else {
        Some(Arc::new(MetadataClient::new(&config)?))
    };
    let store: Arc<dyn ShareStore> = match &client {
        Some(client) => {
            info!("metadata service: {}", config.base_url());
            client.clone() as Arc<dyn ShareStore>
        }
        None => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Arc::new(Orchestrator::new(store, config));
    let (bridge, mut events) = Bridge::new(engine);
    let bridge = Arc::new(bridge);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let gate = tokio::spawn(open_when_healthy(bridge.clone(), client, args.probe_attempts));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Inbound::parse(line) {
            Ok(inbound) => bridge.submit_inbound(inbound).await,
            Err(e) => warn!("ignoring unparseable command: {}", e),
        }
    }

    // queued commands still run once the gate opens
    gate.await?;
    drop(bridge);
    writer.await??;
    Ok(())
}
