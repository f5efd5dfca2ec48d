use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use merchant_feed::catalog::{self, Catalog};
use merchant_feed::config;

#[derive(Debug, Parser)]
#[command(author, version, about = "In-memory product catalog the feed server reads from")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON array of products to start with (overrides catalog.seed_file)
    #[arg(long)]
    seed: Option<PathBuf>,
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

    let seed = args
        .seed
        .or_else(|| cfg.catalog.seed_file.as_ref().map(PathBuf::from));
    let products = match seed.as_deref() {
        Some(path) => Catalog::load_seed(path).await?,
        None => Vec::new(),
    };
    info!(count = products.len(), "catalog seeded");

    let app = catalog::router(Catalog::new(products));
    let addr: SocketAddr = cfg.catalog.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "catalog server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
