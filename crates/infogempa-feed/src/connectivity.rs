//! Online/offline signal shared by all coordinators.

use std::sync::Arc;
use std::time::Duration;

use infogempa_shell::{Fetch, ShellRequest};
use reqwest::Method;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Current connectivity, published over a `watch` channel.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record a platform online/offline event. Repeated values are ignored.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            tracing::info!("Connectivity: {}", if online { "online" } else { "offline" });
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Probe `target` once; any HTTP response counts as online.
    pub async fn probe_once(&self, fetcher: &dyn Fetch, target: &Url) -> bool {
        let request = ShellRequest {
            method: Method::HEAD,
            url: target.clone(),
            mode: Default::default(),
        };
        let online = match fetcher.fetch(&request).await {
            Ok(_) => true,
            Err(e) if e.is_network_failure() => {
                tracing::debug!("Connectivity probe failed: {}", e);
                false
            }
            Err(e) => {
                tracing::debug!("Connectivity probe error: {}", e);
                self.is_online()
            }
        };
        self.set_online(online);
        online
    }

    /// Probe `target` every `period` until cancelled.
    pub fn spawn_probe(
        &self,
        fetcher: Arc<dyn Fetch>,
        target: Url,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let connectivity = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        connectivity.probe_once(fetcher.as_ref(), &target).await;
                    }
                }
            }
        })
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
