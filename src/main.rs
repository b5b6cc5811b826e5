use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use finsight::config::Settings;
use finsight::engine::QueryEngine;
use finsight::mock::MockStore;
use finsight::store::{LocalCsvStore, TableStore};

#[derive(Parser)]
#[command(name = "finsight")]
#[command(about = "Financial analytics query engine")]
struct Args {
    /// The analytics question in natural language
    query: String,

    /// Path to the CSV data directory (default: ./data)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Use the built-in synthetic dataset instead of CSV files
    #[arg(long)]
    mock: bool,

    /// Classify only, without retrieval
    #[arg(long)]
    classify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut settings = Settings::from_env();
    if let Some(key) = args.api_key {
        settings.openai_api_key = Some(key);
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }

    let store: Arc<dyn TableStore> = if args.mock {
        info!("using synthetic mock dataset");
        Arc::new(MockStore::new()?)
    } else {
        info!(data_dir = %settings.data_dir.display(), "using CSV data directory");
        Arc::new(LocalCsvStore::new(settings.data_dir.clone()))
    };

    let engine = QueryEngine::new(&settings, store);
    engine.initialize().await;

    if args.classify {
        let classification = engine.classify_only(&args.query).await;
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    let response = engine.ask(&args.query).await?;
    println!("{}", response);

    Ok(())
}
