//! services/api/src/bin/sync.rs
//!
//! Device-side reconciliation runner. Merges the server's folder list into the
//! local JSON cache (server wins), refreshes the cached receipt list, and
//! prints a summary. Never fails because the server is unreachable.

use api_lib::{
    adapters::{HttpCollectionSource, JsonFileCache},
    config::SyncConfig,
    error::ApiError,
};
use receipt_pipeline_core::Reconciler;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = SyncConfig::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!(server = %config.api_base_url, cache = ?config.cache_dir, "Starting sync");

    let source = HttpCollectionSource::new(&config.api_base_url, config.request_timeout)
        .map_err(|e| ApiError::Internal(format!("could not build HTTP client: {}", e)))?;
    let cache = JsonFileCache::new(config.cache_dir.clone());
    let reconciler = Reconciler::new(Arc::new(source), Arc::new(cache));

    let token = config.session_token.as_deref();
    let folders = reconciler.reconcile(token).await;
    // Receipts are only refreshed when the folder fetch reached the server.
    let receipts = reconciler
        .refresh_records(token.filter(|_| folders.server_reachable))
        .await;

    let summary = json!({
        "folders": folders.collections.len(),
        "receipts": receipts.records.len(),
        "serverReachable": folders.server_reachable,
        "fallback": folders.fallback.map(|r| r.as_str()),
        "receiptsFromServer": receipts.from_server,
    });
    println!("{}", summary);
    Ok(())
}
