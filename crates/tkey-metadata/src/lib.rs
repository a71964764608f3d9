//! tkey-metadata - keeps provider shares for identities
//!
//! records are opaque strings addressed by (pub_key_X, pub_key_Y,
//! namespace). anyone may read, only the holder of the matching private
//! key may write. deletion is a write of the tombstone string, so a
//! deleted record stays distinguishable from one never written.
//!
//! routes:
//!   GET  /        service info
//!   GET  /health  liveness
//!   POST /get     {pub_key_X, pub_key_Y, namespace} -> {message}
//!   POST /set     signed write -> {message}

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tkey::wire::{verify_signature, GetRequest, GetResponse, SetRequest, SetResponse, MAX_DATA_LEN};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// accepted distance between a write's timestamp and server time
pub const MAX_CLOCK_SKEW_SECS: u64 = 10 * 60;

const RECORDS_TREE: &str = "records";

type ApiError = (StatusCode, String);

/// state shared across handlers
pub struct AppState {
    records: sled::Tree,
}

impl AppState {
    /// open (or create) the record tree in `db`
    pub fn new(db: &sled::Db) -> sled::Result<Self> {
        let records = db.open_tree(RECORDS_TREE)?;
        gauge!("metadata_records_current").set(records.len() as f64);
        Ok(Self { records })
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[derive(Serialize)]
struct InfoResponse {
    service: &'static str,
    version: &'static str,
    records: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn record_key(namespace: &str, x: &str, y: &str) -> String {
    format!("{}/{}/{}", namespace, x, y)
}

fn is_coordinate(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn reject(endpoint: &'static str, error: &'static str, status: StatusCode, msg: String) -> ApiError {
    counter!("metadata_errors_total", "endpoint" => endpoint, "error" => error).increment(1);
    debug!(endpoint, error, "request rejected");
    (status, msg)
}

fn check_address(endpoint: &'static str, x: &str, y: &str, namespace: &str) -> Result<(), ApiError> {
    if !is_coordinate(x) || !is_coordinate(y) {
        return Err(reject(
            endpoint,
            "bad_key",
            StatusCode::BAD_REQUEST,
            "pub_key_X and pub_key_Y must be 64 hex digits".into(),
        ));
    }
    if namespace.is_empty() {
        return Err(reject(
            endpoint,
            "bad_namespace",
            StatusCode::BAD_REQUEST,
            "namespace must not be empty".into(),
        ));
    }
    Ok(())
}

// === handlers ===

async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "tkey-metadata",
        version: env!("CARGO_PKG_VERSION"),
        records: state.records.len() as u64,
    })
}

async fn health() -> &'static str {
    "ok"
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetRequest>,
) -> Result<Json<GetResponse>, ApiError> {
    let start = Instant::now();
    counter!("metadata_requests_total", "endpoint" => "get").increment(1);

    check_address("get", &req.pub_key_x, &req.pub_key_y, &req.namespace)?;
    let key = record_key(&req.namespace, &req.pub_key_x, &req.pub_key_y);

    let value = state
        .records
        .get(&key)
        .map_err(|e| reject("get", "storage", StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let message = match value {
        Some(bytes) => String::from_utf8(bytes.to_vec()).map_err(|e| {
            reject("get", "corrupt", StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?,
        None => String::new(),
    };

    histogram!("metadata_request_duration_seconds", "endpoint" => "get")
        .record(start.elapsed().as_secs_f64());
    Ok(Json(GetResponse { message }))
}

async fn set_record(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>, ApiError> {
    let start = Instant::now();
    counter!("metadata_requests_total", "endpoint" => "set").increment(1);

    check_address("set", &req.pub_key_x, &req.pub_key_y, &req.namespace)?;

    if req.set_data.data.len() > MAX_DATA_LEN {
        return Err(reject(
            "set",
            "too_large",
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("data exceeds {} bytes", MAX_DATA_LEN),
        ));
    }

    let timestamp = req.set_data.timestamp_secs().ok_or_else(|| {
        reject(
            "set",
            "bad_timestamp",
            StatusCode::BAD_REQUEST,
            "timestamp must be hex unix seconds".into(),
        )
    })?;
    if unix_now().abs_diff(timestamp) > MAX_CLOCK_SKEW_SECS {
        return Err(reject(
            "set",
            "stale_timestamp",
            StatusCode::BAD_REQUEST,
            "timestamp too far from server time".into(),
        ));
    }

    if !verify_signature(
        &req.pub_key_x,
        &req.pub_key_y,
        &req.set_data.signing_bytes(),
        &req.signature,
    ) {
        warn!(namespace = %req.namespace, "write with invalid signature");
        return Err(reject(
            "set",
            "bad_signature",
            StatusCode::FORBIDDEN,
            "invalid signature".into(),
        ));
    }

    let key = record_key(&req.namespace, &req.pub_key_x, &req.pub_key_y);
    state
        .records
        .insert(key.as_bytes(), req.set_data.data.as_bytes())
        .map_err(|e| reject("set", "storage", StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state
        .records
        .flush_async()
        .await
        .map_err(|e| reject("set", "storage", StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    gauge!("metadata_records_current").set(state.records.len() as f64);
    histogram!("metadata_request_duration_seconds", "endpoint" => "set")
        .record(start.elapsed().as_secs_f64());
    debug!(namespace = %req.namespace, key = &req.pub_key_x[..16], "record written");

    Ok(Json(SetResponse {
        message: "ok".into(),
    }))
}

/// the service router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(info))
        .route("/health", get(health))
        .route("/get", post(get_record))
        .route("/set", post(set_record))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key() {
        assert_eq!(record_key("tkey", "ab", "cd"), "tkey/ab/cd");
    }

    #[test]
    fn test_is_coordinate() {
        assert!(is_coordinate(&"a".repeat(64)));
        assert!(!is_coordinate(&"a".repeat(63)));
        assert!(!is_coordinate(&"g".repeat(64)));
    }

    #[test]
    fn test_state_counts_records() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let state = AppState::new(&db).unwrap();
        assert_eq!(state.record_count(), 0);
        state.records.insert("tkey/x/y", "data").unwrap();
        assert_eq!(state.record_count(), 1);
    }
}
