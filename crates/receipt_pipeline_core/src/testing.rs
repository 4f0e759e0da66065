//! Scripted port implementations shared by the unit tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{Column, SheetCell, SpreadsheetDocument};
use crate::ports::{BlobStore, ExtractionService, PortError, PortResult, SpreadsheetService};

#[derive(Default)]
pub struct FakeBlobStore {
    stored: AtomicUsize,
}

impl FakeBlobStore {
    pub fn stored(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn put(&self, owner_id: &str, filename: &str, _: &str, _: Vec<u8>) -> PortResult<String> {
        let n = self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{owner_id}/{n}-{filename}"))
    }

    async fn read_url(&self, image_ref: &str, ttl: Duration) -> PortResult<String> {
        Ok(format!("https://blobs.test/{image_ref}?ttl={}", ttl.as_secs()))
    }
}

pub struct ScriptedExtractor {
    output: Vec<BTreeMap<String, String>>,
    /// Calls numbered below this fail.
    fail_first: usize,
    calls: Arc<AtomicUsize>,
}

impl ScriptedExtractor {
    pub fn returning(output: Vec<BTreeMap<String, String>>) -> Self {
        Self::failing_first(0, output)
    }

    pub fn failing() -> Self {
        Self::failing_first(usize::MAX, Vec::new())
    }

    /// Fails the first `n` calls, then returns `output`.
    pub fn failing_first(n: usize, output: Vec<BTreeMap<String, String>>) -> Self {
        Self {
            output,
            fail_first: n,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl ExtractionService for ScriptedExtractor {
    async fn extract(&self, _: &str, _: &[Column]) -> PortResult<Vec<BTreeMap<String, String>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(PortError::Unexpected("vision model unavailable".to_string()));
        }
        Ok(self.output.clone())
    }
}

/// Records every call in order. `fail_on` makes the named call fail.
#[derive(Default)]
pub struct RecordingSheets {
    pub calls: Mutex<Vec<String>>,
    pub written: Mutex<Vec<Vec<SheetCell>>>,
    pub fail_on: Option<&'static str>,
    /// Makes `access_token` answer as if the refresh token was revoked.
    pub revoked: bool,
}

impl RecordingSheets {
    pub fn failing_on(call: &'static str) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::default()
        }
    }

    pub fn revoked() -> Self {
        Self {
            revoked: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) -> PortResult<()> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.fail_on == Some(call) {
            Err(PortError::Unexpected(format!("{call} exploded")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SpreadsheetService for RecordingSheets {
    async fn access_token(&self, refresh_token: &str) -> PortResult<String> {
        self.record("access_token")?;
        if self.revoked {
            return Err(PortError::Unauthorized);
        }
        Ok(format!("access-for-{refresh_token}"))
    }

    async fn create_document(&self, _: &str, title: &str) -> PortResult<SpreadsheetDocument> {
        self.record("create_document")?;
        Ok(SpreadsheetDocument {
            spreadsheet_id: "sheet-1".to_string(),
            spreadsheet_url: format!("https://sheets.test/sheet-1#{title}"),
        })
    }

    async fn write_rows(&self, _: &str, _: &str, rows: Vec<Vec<SheetCell>>) -> PortResult<()> {
        self.record("write_rows")?;
        *self.written.lock().unwrap() = rows;
        Ok(())
    }

    async fn bold_header_row(&self, _: &str, _: &str) -> PortResult<()> {
        self.record("bold_header_row")
    }
}
