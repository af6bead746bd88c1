//! Celebrity Recognition Pipeline
//!
//! Consumes one queue batch of image notifications from stdin, recognizes the
//! celebrities in each image, merges them into the per-identity aggregate
//! table, and writes the partial batch response to stdout.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Region;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use celebdex::api::dto::BatchResponse;
use celebdex::api::handle_batch;
use celebdex::config::{Config, StorageType};
use celebdex::event::EventDecoder;
use celebdex::recognition::RekognitionClient;
use celebdex::service::IngestPipeline;
use celebdex::storage::{AggregateStore, DynamoDbConfig, DynamoDbStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout carries the batch response
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting celebdex v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::load(Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });
    if let Err(e) = config.apply_env() {
        error!("{}", e);
        return Err(e.into());
    }
    let deadline = config.pipeline.deadline_from_now();

    info!("Configuration loaded:");
    info!("  Table: {}", config.target.table);
    info!("  Bucket: {}", config.target.bucket);
    info!("  Region: {}", config.target.region);
    info!("  Storage: {:?}", config.storage.storage_type);
    info!("  Deduplicate images: {}", config.pipeline.deduplicate_images);

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.target.region.clone()))
        .load()
        .await;
    let recognizer = Arc::new(RekognitionClient::new(&sdk_config));

    let mut payload = String::new();
    tokio::io::stdin().read_to_string(&mut payload).await?;

    let response = match config.storage.storage_type {
        StorageType::Memory => {
            let store = MemoryStore::with_max_attempts(config.storage.max_merge_attempts);
            run(recognizer, Arc::new(store), &config, &payload, deadline).await?
        }
        StorageType::Sqlite => {
            let path = config
                .storage
                .sqlite_path
                .as_deref()
                .and_then(|p| p.to_str())
                .unwrap_or("data/aggregates.db");
            let store = SqliteStore::new(path)
                .await?
                .with_max_attempts(config.storage.max_merge_attempts);
            info!("SQLite storage initialized at: {}", path);
            run(recognizer, Arc::new(store), &config, &payload, deadline).await?
        }
        StorageType::Dynamodb => {
            let store = DynamoDbStore::new(
                &sdk_config,
                DynamoDbConfig {
                    table_name: config.target.table.clone(),
                    endpoint: config.storage.endpoint.clone(),
                    timeout_ms: config.storage.timeout_ms,
                },
            );
            run(recognizer, Arc::new(store), &config, &payload, deadline).await?
        }
    };

    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

async fn run<S: AggregateStore>(
    recognizer: Arc<RekognitionClient>,
    store: Arc<S>,
    config: &Config,
    payload: &str,
    deadline: Option<Instant>,
) -> Result<BatchResponse> {
    let decoder = EventDecoder::with_defaults(
        Some(config.target.bucket.clone()),
        Some(config.target.region.clone()),
    );
    let pipeline = IngestPipeline::new(recognizer, store, decoder, &config.pipeline);
    handle_batch(&pipeline, payload, deadline).await
}
