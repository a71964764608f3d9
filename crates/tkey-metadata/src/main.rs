//! tkey-metadata - keeps provider shares for identities
//!
//! usage:
//!   tkey-metadata --port 5051
//!   tkey-metadata --port 5051 --data-dir /var/lib/tkey-metadata
//!
//! data stored in ~/.tkey-metadata/ by default

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tkey_metadata::{router, AppState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tkey-metadata")]
#[command(about = "tkey metadata service - keeps provider shares for identities")]
#[command(version)]
struct Args {
    /// port to listen on
    #[arg(short, long, default_value = "5051")]
    port: u16,

    /// data directory (default: ~/.tkey-metadata)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// metrics port (prometheus endpoint, default: port + 1000)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tkey_metadata=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let metrics_port = args.metrics_port.unwrap_or(args.port.saturating_add(1000));
    let metrics_addr: SocketAddr = format!("{}:{}", args.bind, metrics_port)
        .parse()
        .context("invalid metrics address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install prometheus exporter")?;

    let data_dir = args.data_dir.unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        format!("{}/.tkey-metadata", home)
    });
    std::fs::create_dir_all(&data_dir).with_context(|| format!("failed to create {}", data_dir))?;

    let db = sled::open(format!("{}/db", data_dir)).context("failed to open database")?;
    let state = Arc::new(AppState::new(&db)?);

    info!("tkey-metadata v{}", env!("CARGO_PKG_VERSION"));
    info!("  data: {}", data_dir);
    info!("  records: {}", state.record_count());
    info!("  bind: {}:{}", args.bind, args.port);
    info!("  metrics: {}:{}", args.bind, metrics_port);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
