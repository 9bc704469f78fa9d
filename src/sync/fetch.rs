//! Bounded-concurrency blob retrieval
//!
//! Issues blob requests to the remote with:
//! - Semaphore to limit outstanding requests (default: 5)
//! - Per-request timeout
//! - Per-item results, so one failure never aborts the batch

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{RemoteError, SyncError};
use crate::remote::{RemoteTreeClient, RepoAccess};
use crate::workspace::ObjectKind;

/// Default maximum concurrent blob requests
pub const DEFAULT_FETCH_CONCURRENCY: usize = 5;

/// Default per-request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One blob to retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub path: String,
    pub hash: String,
    pub kind: ObjectKind,
}

/// Retrieved blob, keyed back to the requested path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlob {
    pub path: String,
    pub hash: String,
    pub kind: ObjectKind,
    pub content: Vec<u8>,
}

/// Outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(FetchedBlob),
    Failed {
        request: FetchRequest,
        error: RemoteError,
    },
}

impl FetchOutcome {
    pub fn path(&self) -> &str {
        match self {
            Self::Fetched(blob) => &blob.path,
            Self::Failed { request, .. } => &request.path,
        }
    }
}

/// Blob fetcher with a fixed concurrency limit
///
/// Cloning shares the underlying semaphore, so every clone counts toward the
/// same limit.
#[derive(Clone)]
pub struct FetchScheduler {
    /// Semaphore for concurrency control
    semaphore: Arc<Semaphore>,
    /// Configured limit
    limit: usize,
    /// Per-request timeout
    timeout: Duration,
}

impl FetchScheduler {
    /// Create a scheduler with default settings
    pub fn new() -> Self {
        Self::with_max_concurrent(DEFAULT_FETCH_CONCURRENCY)
    }

    /// Create a scheduler with a custom concurrency limit (minimum 1)
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        let limit = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Retrieve every requested blob, at most `limit` at a time
    ///
    /// Returns one outcome per request, in request order.
    #[instrument(skip_all, fields(count = requests.len(), limit = self.limit))]
    pub async fn fetch_all(
        &self,
        client: &dyn RemoteTreeClient,
        access: &RepoAccess,
        requests: Vec<FetchRequest>,
    ) -> Result<Vec<FetchOutcome>, SyncError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let tasks = requests
            .into_iter()
            .map(|request| self.fetch_one(client, access, request));
        let outcomes = join_all(tasks)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, FetchOutcome::Failed { .. }))
            .count();
        debug!("Fetched {} blob(s), {} failed", outcomes.len() - failed, failed);

        Ok(outcomes)
    }

    async fn fetch_one(
        &self,
        client: &dyn RemoteTreeClient,
        access: &RepoAccess,
        request: FetchRequest,
    ) -> Result<FetchOutcome, SyncError> {
        // Acquire semaphore permit
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::SemaphoreClosed)?;

        let result = timeout(self.timeout, client.get_blob(access, &request.hash)).await;

        let outcome = match result {
            Ok(Ok(content)) => FetchOutcome::Fetched(FetchedBlob {
                path: request.path,
                hash: request.hash,
                kind: request.kind,
                content,
            }),
            Ok(Err(error)) => {
                warn!("Failed to fetch {}: {}", request.path, error);
                FetchOutcome::Failed { request, error }
            }
            Err(_) => {
                warn!("Timed out fetching {}", request.path);
                FetchOutcome::Failed {
                    request,
                    error: RemoteError::Timeout(self.timeout),
                }
            }
        };
        Ok(outcome)
    }
}

impl Default for FetchScheduler {
    fn default() -> Self {
        Self::new()
    }
}
