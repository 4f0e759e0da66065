//! crates/receipt_pipeline_core/src/reconcile.rs
//!
//! Merges the server's collection list with the device-cached list.
//!
//! The merge is a full replace keyed by collection id: the server's copy wins
//! every collision and no field-level merging is attempted. Fetch failures are
//! masked; the caller always gets a list, plus a flag and a reason code telling
//! it whether the server was consulted.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Collection, Record};
use crate::ports::{CollectionSource, DeviceCache, PortError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No session token was available.
    Unauthenticated,
    /// The server could not be reached or did not answer in time.
    Unreachable,
    /// The server answered with an error.
    ServerError,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Unauthenticated => "unauthenticated",
            FallbackReason::Unreachable => "unreachable",
            FallbackReason::ServerError => "server_error",
        }
    }

    fn from_port(err: &PortError) -> Self {
        match err {
            PortError::Unauthorized => FallbackReason::Unauthenticated,
            PortError::Timeout(_) | PortError::Unexpected(_) => FallbackReason::Unreachable,
            PortError::NotFound(_) | PortError::Conflict(_) | PortError::Rejected(_) => {
                FallbackReason::ServerError
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub collections: Vec<Collection>,
    /// True when the server list took part in the merge. An empty list with
    /// `server_reachable == false` means "nothing known yet", not "no folders".
    pub server_reachable: bool,
    pub fallback: Option<FallbackReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub records: Vec<Record>,
    pub from_server: bool,
}

/// Merges by identity: server entries first, device entries only for unseen
/// ids, then newest `updated_at` first (ties by id).
pub fn merge(server: Vec<Collection>, device: Vec<Collection>) -> Vec<Collection> {
    let mut by_id: HashMap<String, Collection> = HashMap::with_capacity(server.len() + device.len());
    for collection in server.into_iter().chain(device) {
        by_id
            .entry(collection.collection_id.clone())
            .or_insert(collection);
    }

    let mut merged: Vec<Collection> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.collection_id.cmp(&b.collection_id))
    });
    merged
}

#[derive(Clone)]
pub struct Reconciler {
    source: Arc<dyn CollectionSource>,
    cache: Arc<dyn DeviceCache>,
}

impl Reconciler {
    pub fn new(source: Arc<dyn CollectionSource>, cache: Arc<dyn DeviceCache>) -> Self {
        Self { source, cache }
    }

    /// Produces the authoritative collection list and writes it back to the
    /// device cache, replacing the previous list.
    pub async fn reconcile(&self, session_token: Option<&str>) -> Reconciliation {
        let server = match session_token {
            None => Err(FallbackReason::Unauthenticated),
            Some(token) => self.source.fetch_collections(token).await.map_err(|e| {
                warn!(error = %e, "Collection fetch failed; using device copy");
                FallbackReason::from_port(&e)
            }),
        };

        let device = self.cache.load_collections().await.unwrap_or_else(|e| {
            warn!(error = %e, "Device collection cache unreadable; treating as empty");
            Vec::new()
        });

        let (collections, fallback) = match server {
            Ok(server) => (merge(server, device), None),
            Err(reason) => (merge(Vec::new(), device), Some(reason)),
        };

        if let Err(e) = self.cache.store_collections(&collections).await {
            warn!(error = %e, "Could not persist merged collections to the device cache");
        }

        info!(
            collections = collections.len(),
            fallback = fallback.map(|r| r.as_str()).unwrap_or("none"),
            "Reconciliation finished"
        );
        Reconciliation {
            collections,
            server_reachable: fallback.is_none(),
            fallback,
        }
    }

    /// Replaces the cached record list with the server's when it can be fetched,
    /// otherwise returns the cached list unchanged.
    pub async fn refresh_records(&self, session_token: Option<&str>) -> RecordSnapshot {
        if let Some(token) = session_token {
            match self.source.fetch_records(token).await {
                Ok(records) => {
                    if let Err(e) = self.cache.store_records(&records).await {
                        warn!(error = %e, "Could not persist receipts to the device cache");
                    }
                    return RecordSnapshot {
                        records,
                        from_server: true,
                    };
                }
                Err(e) => warn!(error = %e, "Receipt fetch failed; using device copy"),
            }
        }

        let records = self.cache.load_records().await.unwrap_or_else(|e| {
            warn!(error = %e, "Device receipt cache unreadable; treating as empty");
            Vec::new()
        });
        RecordSnapshot {
            records,
            from_server: false,
        }
    }
}
