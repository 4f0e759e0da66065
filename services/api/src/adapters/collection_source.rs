//! services/api/src/adapters/collection_source.rs
//!
//! Fetches the server-held folder and receipt lists over HTTP for the
//! device-side reconciliation runner. It implements the `CollectionSource`
//! port from the `core` crate.

use async_trait::async_trait;
use receipt_pipeline_core::{
    domain::{Collection, Record},
    ports::{CollectionSource, PortError, PortResult},
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::web::dto::{FolderList, ReceiptList};

#[derive(Clone)]
pub struct HttpCollectionSource {
    http: Client,
    base_url: String,
}

impl HttpCollectionSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent("receipt-pipeline-sync")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, session_token: &str) -> PortResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(session_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::Timeout(format!("GET {}: {}", path, e))
                } else {
                    PortError::Unexpected(format!("GET {}: {}", path, e))
                }
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(PortError::Unauthorized),
            s => return Err(PortError::Rejected(format!("GET {}: HTTP {}", path, s))),
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PortError::Unexpected(format!("GET {}: malformed body: {}", path, e)))
    }
}

#[async_trait]
impl CollectionSource for HttpCollectionSource {
    async fn fetch_collections(&self, session_token: &str) -> PortResult<Vec<Collection>> {
        let list: FolderList = self.get_json("/folders/getFolders", session_token).await?;
        let mut collections = Vec::with_capacity(list.folders.len());
        for folder in list.folders {
            let id = folder.folder_id.clone();
            match Collection::try_from(folder) {
                Ok(c) => collections.push(c),
                Err(e) => warn!(folder_id = %id, error = %e, "Skipping server folder with unreadable schema"),
            }
        }
        debug!(count = collections.len(), "Fetched server folders");
        Ok(collections)
    }

    async fn fetch_records(&self, session_token: &str) -> PortResult<Vec<Record>> {
        let list: ReceiptList = self.get_json("/receipts", session_token).await?;
        debug!(count = list.receipts.len(), "Fetched server receipts");
        Ok(list.receipts.into_iter().map(Record::from).collect())
    }
}
