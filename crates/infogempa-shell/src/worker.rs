//! The shell worker: installs a cache generation, purges old ones on
//! activation, and answers intercepted requests from the network or the cache.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{try_join_all, BoxFuture};
use parking_lot::RwLock;
use reqwest::Method;
use tokio_util::task::TaskTracker;
use url::Url;

use infogempa_core::ShellConfig;

use crate::error::ShellError;
use crate::network::Fetch;
use crate::request::{request_key, RequestMode, ShellRequest, ShellResponse};
use crate::route::{RequestClass, RoutePolicy};
use crate::storage::CacheStorage;

/// Lifecycle of a shell worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed, or a newer worker replaced this one
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Owns one cache generation and routes requests through it.
pub struct ShellWorker {
    version: String,
    manifest: Vec<Url>,
    root: Url,
    routes: RoutePolicy,
    storage: Arc<dyn CacheStorage>,
    upstream: Arc<dyn Fetch>,
    state: RwLock<WorkerState>,
    writes: TaskTracker,
}

impl ShellWorker {
    pub fn new(
        version: impl Into<String>,
        manifest: Vec<Url>,
        root: Url,
        routes: RoutePolicy,
        storage: Arc<dyn CacheStorage>,
        upstream: Arc<dyn Fetch>,
    ) -> Self {
        Self {
            version: version.into(),
            manifest,
            root,
            routes,
            storage,
            upstream,
            state: RwLock::new(WorkerState::Parsed),
            writes: TaskTracker::new(),
        }
    }

    /// Build a worker from the `[shell]` config section.
    pub fn from_config(
        config: &ShellConfig,
        storage: Arc<dyn CacheStorage>,
        upstream: Arc<dyn Fetch>,
    ) -> Result<Self, ShellError> {
        let root = config.origin_url()?;
        let manifest = config.manifest_urls()?;
        let routes = RoutePolicy::from_config(config)?;
        Ok(Self::new(
            config.cache_version.clone(),
            manifest,
            root,
            routes,
            storage,
            upstream,
        ))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Whether this worker answers requests for open pages.
    pub fn controls_clients(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    fn set_state(&self, state: WorkerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!("Shell worker {}: {} -> {}", self.version, previous, state);
        }
    }

    /// Fetch the whole manifest and store it as this worker's generation.
    ///
    /// All-or-nothing: a single failed URL leaves the store untouched and the
    /// worker redundant.
    pub async fn install(&self) -> Result<(), ShellError> {
        {
            let mut state = self.state.write();
            if !matches!(*state, WorkerState::Parsed | WorkerState::Redundant) {
                return Err(ShellError::InvalidState {
                    expected: WorkerState::Parsed,
                    actual: *state,
                });
            }
            *state = WorkerState::Installing;
        }

        tracing::info!(
            "Installing shell cache {} ({} assets)",
            self.version,
            self.manifest.len()
        );

        match self.fetch_manifest().await {
            Ok(entries) => {
                if let Err(e) = self.storage.put_all(&self.version, &entries) {
                    self.set_state(WorkerState::Redundant);
                    return Err(ShellError::Cache(e.to_string()));
                }
                // Skip waiting: activation may follow immediately
                self.set_state(WorkerState::Installed);
                tracing::info!("Shell cache {} installed", self.version);
                Ok(())
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant);
                tracing::warn!("Shell cache {} install failed: {}", self.version, e);
                Err(e)
            }
        }
    }

    async fn fetch_manifest(&self) -> Result<Vec<(String, ShellResponse)>, ShellError> {
        let requests: Vec<ShellRequest> = self
            .manifest
            .iter()
            .cloned()
            .map(ShellRequest::get)
            .collect();

        try_join_all(requests.iter().map(|request| async move {
            let response = self
                .upstream
                .fetch(request)
                .await
                .map_err(|e| ShellError::Install {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                })?;

            if !response.is_success() {
                return Err(ShellError::Install {
                    url: request.url.to_string(),
                    reason: format!("HTTP {}", response.status),
                });
            }

            Ok((request.key(), response))
        }))
        .await
    }

    /// Purge every generation except this worker's, then claim clients.
    ///
    /// Returns the names of the deleted generations.
    pub async fn activate(&self) -> Result<Vec<String>, ShellError> {
        {
            let mut state = self.state.write();
            if *state != WorkerState::Installed {
                return Err(ShellError::InvalidState {
                    expected: WorkerState::Installed,
                    actual: *state,
                });
            }
            *state = WorkerState::Activating;
        }

        let generations = self
            .storage
            .generations()
            .map_err(|e| ShellError::Cache(e.to_string()))?;
        let deleted = self.purge_stale(generations)?;

        self.set_state(WorkerState::Activated);
        tracing::info!("Shell cache {} active", self.version);
        Ok(deleted)
    }

    /// Pick up a generation left by a previous run without refetching it.
    ///
    /// Returns `false` when no generation with this version exists yet.
    pub fn restore(&self) -> Result<bool, ShellError> {
        let generations = self
            .storage
            .generations()
            .map_err(|e| ShellError::Cache(e.to_string()))?;

        if !generations.iter().any(|name| *name == self.version) {
            return Ok(false);
        }

        // A previous run may have installed this version but stopped before activating
        self.purge_stale(generations)?;
        self.set_state(WorkerState::Activated);
        tracing::info!("Restored shell cache {}", self.version);
        Ok(true)
    }

    /// Delete every generation other than this worker's.
    fn purge_stale(&self, generations: Vec<String>) -> Result<Vec<String>, ShellError> {
        let mut deleted = Vec::new();
        for name in generations.into_iter().filter(|name| *name != self.version) {
            self.storage
                .delete(&name)
                .map_err(|e| ShellError::Cache(e.to_string()))?;
            tracing::info!("Deleted stale shell cache {}", name);
            deleted.push(name);
        }
        Ok(deleted)
    }

    /// Answer an intercepted request.
    pub async fn handle_fetch(&self, request: &ShellRequest) -> Result<ShellResponse, ShellError> {
        if !self.controls_clients() {
            return self.upstream.fetch(request).await;
        }

        match self.routes.classify(&request.method, &request.url) {
            RequestClass::RemoteData => self.network_first(request).await,
            RequestClass::ShellAsset => self.cache_first(request).await,
            RequestClass::PassThrough => self.upstream.fetch(request).await,
        }
    }

    async fn network_first(&self, request: &ShellRequest) -> Result<ShellResponse, ShellError> {
        let key = request.key();

        match self.upstream.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_behind(key, response.clone(), Utc::now());
                }
                Ok(response)
            }
            Err(e) if e.is_network_failure() => match self.cached(&key) {
                Some(cached) => {
                    tracing::debug!("Network failed, serving cached {}", key);
                    Ok(cached)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn cache_first(&self, request: &ShellRequest) -> Result<ShellResponse, ShellError> {
        let key = request.key();
        if let Some(cached) = self.cached(&key) {
            tracing::debug!("Cache hit {}", key);
            return Ok(cached);
        }

        match self.upstream.fetch(request).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_network_failure() && request.mode == RequestMode::Navigate => {
                let root_key = request_key(&Method::GET, &self.root);
                match self.cached(&root_key) {
                    Some(root) => {
                        tracing::debug!("Navigation offline, serving root document for {}", key);
                        Ok(root)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn cached(&self, key: &str) -> Option<ShellResponse> {
        match self.storage.lookup(&self.version, key) {
            Ok(entry) => entry.map(|entry| entry.response),
            Err(e) => {
                tracing::warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Write a response into the current generation without holding up the caller.
    ///
    /// Writes may finish out of order; the capture time keeps the newest body.
    fn store_behind(&self, key: String, response: ShellResponse, captured_at: DateTime<Utc>) {
        let storage = Arc::clone(&self.storage);
        let version = self.version.clone();
        self.writes.spawn_blocking(move || {
            if let Err(e) = storage.put(&version, &key, &response, captured_at) {
                tracing::warn!("Failed to cache {}: {}", key, e);
            }
        });
    }

    /// Wait for all pending cache writes.
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}

impl Fetch for ShellWorker {
    fn fetch<'a>(
        &'a self,
        request: &'a ShellRequest,
    ) -> BoxFuture<'a, Result<ShellResponse, ShellError>> {
        Box::pin(self.handle_fetch(request))
    }
}

impl fmt::Debug for ShellWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellWorker")
            .field("version", &self.version)
            .field("state", &self.state())
            .field("manifest", &self.manifest.len())
            .finish()
    }
}
