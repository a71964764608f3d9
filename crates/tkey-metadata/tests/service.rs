//! lifecycle through the http client against a live service

use std::sync::Arc;

use tkey::credential::ServiceCredential;
use tkey::wire::{GetRequest, GetResponse, SetData, SetRequest};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tkey::{
    Config, Error, IdentityState, Lookup, MetadataClient, Orchestrator, Reconstruction, Secret,
    ShareStore,
};
use tkey_metadata::{router, AppState};

struct Service {
    url: String,
    _dir: tempfile::TempDir,
}

async fn spawn_service() -> Service {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path().join("db")).unwrap();
    let state = Arc::new(AppState::new(&db).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    Service {
        url: format!("http://{}", addr),
        _dir: dir,
    }
}

fn config(url: &str) -> Arc<Config> {
    Arc::new(Config {
        metadata_url: url.into(),
        request_timeout_secs: 5,
        ..Config::default()
    })
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[tokio::test]
async fn test_scenario_over_http() {
    let service = spawn_service().await;
    let config = config(&service.url);
    let client = Arc::new(MetadataClient::new(&config).unwrap());
    client.health().await.unwrap();
    let engine = Orchestrator::new(client.clone(), config);

    let secret = Secret::from_hex("0x1").unwrap();
    let first = engine.split_key("alice", &secret).await.unwrap();
    let p1 = first.polynomial_id().clone();

    engine
        .save_provider_share("alice", first.provider().unwrap(), "alice@example.com")
        .await
        .unwrap();
    let record = client.fetch("alice").await.unwrap().into_record().unwrap();
    assert_eq!(record.label.as_deref(), Some("alice@example.com"));
    assert_eq!(record.share_indexes, vec![1, 2, 3]);

    // idempotent split returns the same set
    let again = engine.split_key("alice", &secret).await.unwrap();
    assert_eq!(again, first);

    let Reconstruction::Reconstructed { secret: recovered, .. } = engine
        .reconstruct_key("alice", first.get(2).unwrap())
        .await
        .unwrap()
    else {
        panic!("provider share was stored");
    };
    assert_eq!(recovered, secret);

    engine.delete_provider_share("alice").await.unwrap();
    assert!(engine.get_provider_share("alice").await.unwrap().is_none());
    assert_eq!(
        engine.identity_state("alice").await.unwrap(),
        IdentityState::Tombstoned
    );

    let second = engine.split_key("alice", &secret).await.unwrap();
    assert_ne!(second.polynomial_id(), &p1);
}

#[tokio::test]
async fn test_absent_identity() {
    let service = spawn_service().await;
    let config = config(&service.url);
    let engine = Orchestrator::new(Arc::new(MetadataClient::new(&config).unwrap()), config);

    assert!(engine.get_provider_share("nobody").await.unwrap().is_none());
    assert_eq!(engine.identity_state("nobody").await.unwrap(), IdentityState::New);
}

#[tokio::test]
async fn test_not_found_reads_as_absent() {
    // a service that answers 404 for keys it has never seen
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/get", post(|| async { StatusCode::NOT_FOUND }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = config(&url);
    let client = Arc::new(MetadataClient::new(&config).unwrap());
    assert_eq!(client.fetch("nobody").await.unwrap(), Lookup::Absent);

    let engine = Orchestrator::new(client, config);
    assert!(engine.get_provider_share("nobody").await.unwrap().is_none());
    assert_eq!(engine.identity_state("nobody").await.unwrap(), IdentityState::New);
}

#[tokio::test]
async fn test_forged_write_rejected() {
    let service = spawn_service().await;
    let http = reqwest::Client::new();

    let victim = ServiceCredential::from_identity("alice").unwrap();
    let attacker = ServiceCredential::from_identity("mallory").unwrap();

    let set_data = SetData {
        data: "forged".into(),
        timestamp: format!("{:x}", now()),
    };
    let req = SetRequest {
        pub_key_x: victim.pub_key_x().into(),
        pub_key_y: victim.pub_key_y().into(),
        namespace: "tkey".into(),
        signature: attacker.sign(&set_data.signing_bytes()),
        set_data,
    };
    let resp = http
        .post(format!("{}/set", service.url))
        .json(&req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    let get = GetRequest {
        pub_key_x: victim.pub_key_x().into(),
        pub_key_y: victim.pub_key_y().into(),
        namespace: "tkey".into(),
    };
    let body: GetResponse = http
        .post(format!("{}/get", service.url))
        .json(&get)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.message, "");
}

#[tokio::test]
async fn test_stale_write_rejected() {
    let service = spawn_service().await;
    let credential = ServiceCredential::from_identity("alice").unwrap();

    let set_data = SetData {
        data: "late".into(),
        timestamp: format!("{:x}", now() - 3600),
    };
    let req = SetRequest {
        pub_key_x: credential.pub_key_x().into(),
        pub_key_y: credential.pub_key_y().into(),
        namespace: "tkey".into(),
        signature: credential.sign(&set_data.signing_bytes()),
        set_data,
    };
    let resp = reqwest::Client::new()
        .post(format!("{}/set", service.url))
        .json(&req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_garbage_record_is_rejected_not_retried() {
    let service = spawn_service().await;
    let credential = ServiceCredential::from_identity("alice").unwrap();

    // a signed write of something that is not a share record
    let set_data = SetData {
        data: "bm90IGpzb24=".into(),
        timestamp: format!("{:x}", now()),
    };
    let req = SetRequest {
        pub_key_x: credential.pub_key_x().into(),
        pub_key_y: credential.pub_key_y().into(),
        namespace: "tkey".into(),
        signature: credential.sign(&set_data.signing_bytes()),
        set_data,
    };
    let resp = reqwest::Client::new()
        .post(format!("{}/set", service.url))
        .json(&req)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let config = config(&service.url);
    let engine = Orchestrator::new(Arc::new(MetadataClient::new(&config).unwrap()), config);
    let err = engine.get_provider_share("alice").await.unwrap_err();
    assert!(matches!(err, Error::RetrieveFailed(_)));
    assert!(matches!(err.root(), Error::MalformedShare(_)));
    assert!(!err.is_retryable());
}
