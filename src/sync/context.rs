//! Collaborators shared by the clone engine and the pull orchestrator

use std::sync::Arc;

use crate::remote::RemoteTreeClient;
use crate::store::{LocalObjectStore, WorkingSetCache};
use crate::workspace::TrackingPolicy;

use super::{FetchScheduler, MergeResolver};

/// Everything a sync operation reads from or writes to
#[derive(Clone)]
pub struct SyncContext {
    pub remote: Arc<dyn RemoteTreeClient>,
    pub store: Arc<dyn LocalObjectStore>,
    pub cache: WorkingSetCache,
    pub fetcher: FetchScheduler,
    pub policy: TrackingPolicy,
    pub resolver: MergeResolver,
}

impl SyncContext {
    /// Context with default fetcher, tracking policy and resolver
    pub fn new(
        remote: Arc<dyn RemoteTreeClient>,
        store: Arc<dyn LocalObjectStore>,
        cache: WorkingSetCache,
    ) -> Self {
        Self {
            remote,
            store,
            cache,
            fetcher: FetchScheduler::new(),
            policy: TrackingPolicy::default(),
            resolver: MergeResolver::default(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: FetchScheduler) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_policy(mut self, policy: TrackingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_resolver(mut self, resolver: MergeResolver) -> Self {
        self.resolver = resolver;
        self
    }
}
