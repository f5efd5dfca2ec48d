use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use merchant_feed::{config, server, Exporter, HttpProductSource, JobQueue, Processor};

#[derive(Debug, Parser)]
#[command(author, version, about = "Merchant feed server: webhook-driven CSV export queue")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let source = HttpProductSource::from_config(&cfg)?;
    let processor = Arc::new(
        Processor::new(
            Arc::new(JobQueue::new()),
            Arc::new(Exporter::from_config(&cfg)),
            Arc::new(source),
        )
        .with_merchant_id(cfg.merchant.merchant_id.clone()),
    );

    let app = server::router(server::AppState::new(processor, cfg.export.public_path.clone()));

    let addr: SocketAddr = cfg.server.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "feed server listening");
    info!("webhook: POST http://{addr}/api/webhook/product-added");
    info!("status:  GET  http://{addr}/api/status");
    axum::serve(listener, app).await?;

    Ok(())
}
