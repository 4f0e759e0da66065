//! Scripted services and helpers shared by the integration tests.

#![allow(dead_code)]

use api_lib::config::Config;
use api_lib::web::auth::TokenVerifier;
use async_trait::async_trait;
use receipt_pipeline_core::{
    BlobStore, Column, ExtractionService, OwnerIdentity, PortError, PortResult, SheetCell,
    SpreadsheetDocument, SpreadsheetService,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const SECRET: &str = "integration-secret-0123456789abcdef";

//=========================================================================================
// Scripted Services
//=========================================================================================

pub struct MemoryBlobs;

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn put(&self, owner_id: &str, filename: &str, _: &str, _: Vec<u8>) -> PortResult<String> {
        Ok(format!("receipts/{owner_id}/{filename}"))
    }

    async fn read_url(&self, image_ref: &str, _: Duration) -> PortResult<String> {
        Ok(format!("https://blobs.test/{image_ref}"))
    }
}

/// Reads every receipt as the same Corner Market purchase.
pub struct CornerMarket;

#[async_trait]
impl ExtractionService for CornerMarket {
    async fn extract(&self, _: &str, _: &[Column]) -> PortResult<Vec<BTreeMap<String, String>>> {
        Ok(vec![BTreeMap::from([
            ("Vendor".to_string(), "Corner Market".to_string()),
            ("Total".to_string(), "26.06".to_string()),
            ("Cashier".to_string(), "Sam".to_string()),
        ])])
    }
}

/// Answers longer after a request than any test deadline allows.
pub struct StalledExtractor;

#[async_trait]
impl ExtractionService for StalledExtractor {
    async fn extract(&self, _: &str, _: &[Column]) -> PortResult<Vec<BTreeMap<String, String>>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct CountingSheets {
    pub calls: AtomicUsize,
    /// Makes `write_rows` fail after the document exists.
    pub fail_write: bool,
}

impl CountingSheets {
    pub fn failing_write() -> Self {
        Self {
            fail_write: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SpreadsheetService for CountingSheets {
    async fn access_token(&self, _: &str) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("access".to_string())
    }

    async fn create_document(&self, _: &str, _: &str) -> PortResult<SpreadsheetDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SpreadsheetDocument {
            spreadsheet_id: "sheet-9".to_string(),
            spreadsheet_url: "https://sheets.test/sheet-9".to_string(),
        })
    }

    async fn write_rows(&self, _: &str, _: &str, _: Vec<Vec<SheetCell>>) -> PortResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_write {
            return Err(PortError::Unexpected("quota exceeded".to_string()));
        }
        Ok(())
    }

    async fn bold_header_row(&self, _: &str, _: &str) -> PortResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        log_level: tracing::Level::INFO,
        cors_origin: "http://localhost:8081".to_string(),
        max_upload_bytes: 1024 * 1024,
        openai_api_key: None,
        extraction_model: "test".to_string(),
        s3_bucket: "test".to_string(),
        s3_region: "auto".to_string(),
        s3_endpoint: None,
        s3_access_key_id: None,
        s3_secret_access_key: None,
        presigned_url_ttl: Duration::from_secs(60),
        session_secret: SECRET.to_string(),
        allow_guest_tokens: true,
        google_client_id: None,
        google_client_secret: None,
        external_call_timeout: Duration::from_secs(5),
        batch_concurrency: 2,
    }
}

pub fn token_for(owner_id: &str) -> String {
    let identity = OwnerIdentity {
        owner_id: owner_id.to_string(),
        email: Some(format!("{owner_id}@example.com")),
        name: None,
        picture: None,
        guest: false,
    };
    TokenVerifier::new(SECRET, true)
        .issue(&identity, chrono::Duration::hours(1))
        .unwrap()
}

/// An unsigned token whose payload marks a guest session.
pub fn guest_token(owner_id: &str) -> String {
    use base64::{engine::general_purpose, Engine as _};
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = general_purpose::URL_SAFE_NO_PAD
        .encode(format!(r#"{{"sub":"{owner_id}","guest":true}}"#).as_bytes());
    format!("{header}.{payload}.")
}
