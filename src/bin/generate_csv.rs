use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use merchant_feed::{config, Exporter, HttpProductSource};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fetch the catalog once, validate it and write the CSV feeds"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Write the feeds here instead of export.output_dir
    #[arg(long)]
    output_dir: Option<PathBuf>,
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

    let mut exporter = Exporter::from_config(&cfg);
    if let Some(dir) = args.output_dir {
        exporter = Exporter::new(cfg.export.required_fields.clone(), dir)
            .with_file_names(&cfg.export.valid_file, &cfg.export.invalid_file)
            .with_timeout(cfg.run_timeout());
    }
    let source = HttpProductSource::from_config(&cfg)?;

    match exporter.run(&source).await {
        Ok(result) => {
            info!(
                valid = result.valid_count(),
                invalid = result.invalid_count(),
                valid_path = %result.valid_path.display(),
                invalid_path = %result.invalid_path.display(),
                "csv generation finished"
            );
            for invalid in &result.invalid_records {
                info!(
                    id = ?invalid.record.id(),
                    missing = %invalid.missing_fields.join(","),
                    "invalid product"
                );
            }
            Ok(())
        }
        Err(err) => {
            error!(?err, "csv generation failed");
            Err(err.into())
        }
    }
}
