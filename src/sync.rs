//! Configuration synchronizer
//!
//! Merges one route's entry into the shared document with compare-and-swap
//! writes. Each attempt re-reads the document, so the listen-path ownership
//! check and the write always refer to the same version; a concurrent writer
//! makes the write fail with a conflict and the attempt is repeated.

use std::sync::Arc;

use tracing::{debug, info};

use crate::crd::DocumentRef;
use crate::document::{DocumentStore, RouteKey};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::validation::NormalizedDocument;
use crate::Error;

/// Default number of compare-and-swap attempts before giving up
pub const DEFAULT_SYNC_ATTEMPTS: u32 = 5;

/// Result of a sync or remove
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncResult {
    /// Whether the document was written
    pub changed: bool,
    /// Version of the document after the operation, if it exists
    pub version: Option<String>,
}

impl SyncResult {
    fn unchanged(version: Option<String>) -> Self {
        Self {
            changed: false,
            version,
        }
    }

    fn written(version: String) -> Self {
        Self {
            changed: true,
            version: Some(version),
        }
    }
}

/// Writes route entries into shared documents
pub struct ConfigSynchronizer {
    store: Arc<dyn DocumentStore>,
    retry: RetryConfig,
}

impl ConfigSynchronizer {
    /// Create a synchronizer over `store` using `retry` for conflicts
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// The underlying document store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Ensure `document[key]` equals `normalized`.
    ///
    /// Fails with [`Error::NotFound`] when the document does not exist,
    /// [`Error::ListenPathClaimed`] when a sibling owns the listen path, and
    /// [`Error::ConflictExceeded`] when every attempt lost a race.
    pub async fn sync(
        &self,
        document: &DocumentRef,
        key: &RouteKey,
        normalized: &NormalizedDocument,
    ) -> Result<SyncResult, Error> {
        let result = retry_with_backoff_if(
            &self.retry,
            "sync_document",
            || self.try_sync(document, key, normalized),
            Error::is_conflict,
        )
        .await;
        self.exhausted(document, result)
    }

    /// Delete `document[key]`.
    ///
    /// A missing document or key is not an error; the result reports
    /// `changed = false`.
    pub async fn remove(&self, document: &DocumentRef, key: &RouteKey) -> Result<SyncResult, Error> {
        let result = retry_with_backoff_if(
            &self.retry,
            "remove_document_entry",
            || self.try_remove(document, key),
            Error::is_conflict,
        )
        .await;
        self.exhausted(document, result)
    }

    async fn try_sync(
        &self,
        document: &DocumentRef,
        key: &RouteKey,
        normalized: &NormalizedDocument,
    ) -> Result<SyncResult, Error> {
        let current = self
            .store
            .get(document)
            .await?
            .ok_or_else(|| Error::not_found(format!("ConfigMap {document} not found")))?;

        if let Some(owner) = current.claimant_of(normalized.listen_path(), key) {
            return Err(Error::ListenPathClaimed {
                listen_path: normalized.listen_path().to_string(),
                owner,
            });
        }

        if current.entry(key) == Some(normalized.as_str()) {
            debug!(document = %document, key = %key, "entry already up to date");
            return Ok(SyncResult::unchanged(Some(current.version)));
        }

        let version = self
            .store
            .write_entry(
                document,
                key,
                Some(normalized.as_str().to_string()),
                &current.version,
            )
            .await?;
        info!(document = %document, key = %key, version = %version, "synced route entry");
        Ok(SyncResult::written(version))
    }

    async fn try_remove(&self, document: &DocumentRef, key: &RouteKey) -> Result<SyncResult, Error> {
        let Some(current) = self.store.get(document).await? else {
            debug!(document = %document, key = %key, "document gone, nothing to remove");
            return Ok(SyncResult::unchanged(None));
        };

        if current.entry(key).is_none() {
            debug!(document = %document, key = %key, "entry already absent");
            return Ok(SyncResult::unchanged(Some(current.version)));
        }

        match self
            .store
            .write_entry(document, key, None, &current.version)
            .await
        {
            Ok(version) => {
                info!(document = %document, key = %key, "removed route entry");
                Ok(SyncResult::written(version))
            }
            // Deleted between read and write
            Err(Error::NotFound(_)) => Ok(SyncResult::unchanged(None)),
            Err(e) => Err(e),
        }
    }

    fn exhausted(
        &self,
        document: &DocumentRef,
        result: Result<SyncResult, Error>,
    ) -> Result<SyncResult, Error> {
        result.map_err(|e| {
            if e.is_conflict() {
                Error::ConflictExceeded {
                    document: document.to_string(),
                    attempts: self.retry.max_attempts,
                }
            } else {
                e
            }
        })
    }
}
