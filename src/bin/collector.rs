use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use motion_capture_rs::collector;
use motion_capture_rs::logger::init_logger;
use motion_capture_rs::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(about = "In-memory measurement collector", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Rows returned by the listing endpoints
    #[arg(long)]
    recent_limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => AppConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.collector.bind = bind;
    }
    if let Some(limit) = args.recent_limit {
        config.collector.recent_limit = limit;
    }
    config.validate()?;

    collector::serve(&config.collector).await?;
    Ok(())
}
