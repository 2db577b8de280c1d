//! Application context: owns every long-lived service and its teardown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use infogempa_core::{AppError, Config, ShellConfig};
use infogempa_feed::{
    Connectivity, FeedCoordinator, FeedState, Forecast, GempaClient, GempaSource,
    InstallFlow, KeyValueStore, LocationBook, LocationRecord, SqliteKeyValueStore, WeatherClient,
    WeatherSource,
};
use infogempa_shell::{
    CacheStorage, Fetch, Network, ShellError, ShellWorker, SqliteCacheStorage,
};

const PROBE_INTERVAL: Duration = Duration::from_secs(30);

fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}

/// Everything the UI talks to, created once in [`AppContext::start`] and torn
/// down in [`AppContext::shutdown`].
pub struct AppContext {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    connectivity: Connectivity,
    worker: Arc<ShellWorker>,
    gempa: FeedCoordinator<GempaSource>,
    weather: tokio::sync::Mutex<Option<FeedCoordinator<WeatherSource>>>,
    install: tokio::sync::Mutex<InstallFlow>,
    locations: LocationBook,
    cancel: CancellationToken,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    /// Open storage, bring up the shell worker and start the feeds.
    ///
    /// `standalone` is whether the app is already running installed.
    pub async fn start(config: Config, standalone: bool) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::new(config.storage.kv_path())?);
        let cache: Arc<dyn CacheStorage> = Arc::new(SqliteCacheStorage::new(
            config.storage.cache_path(),
        )?);
        let network: Arc<dyn Fetch> = Arc::new(Network::new(Duration::from_secs(
            config.storage.http_timeout_secs,
        ))?);

        let worker = prepare_shell(&config.shell, cache, Arc::clone(&network)).await?;
        let fetcher: Arc<dyn Fetch> = worker.clone();

        let cancel = CancellationToken::new();
        let connectivity = Connectivity::new(true);
        let probe = config
            .shell
            .data_origin_urls()?
            .into_iter()
            .next()
            .map(|target| {
                connectivity.spawn_probe(
                    Arc::clone(&network),
                    target,
                    PROBE_INTERVAL,
                    cancel.child_token(),
                )
            });

        let gempa = FeedCoordinator::start(
            GempaSource::new(GempaClient::from_config(Arc::clone(&fetcher), &config.gempa)?),
            Arc::clone(&store),
            connectivity.subscribe(),
            minutes(config.gempa.refresh_minutes),
        );

        let locations = LocationBook::new(Arc::clone(&store));
        let city = match locations.stored()? {
            Some(location) => location.city,
            None => config.weather.default_city.clone(),
        };
        let weather = match WeatherClient::from_config(Arc::clone(&fetcher), &config.weather) {
            Ok(client) => Some(start_weather(
                client,
                city,
                &store,
                &connectivity,
                &config,
            )),
            Err(e) => {
                tracing::warn!("Weather feed disabled: {}", e);
                None
            }
        };

        tracing::info!(
            "InfoGempa started (shell cache {}, {})",
            worker.version(),
            worker.state()
        );

        Ok(Self {
            config,
            store,
            connectivity,
            worker,
            gempa,
            weather: tokio::sync::Mutex::new(weather),
            install: tokio::sync::Mutex::new(InstallFlow::new(standalone)),
            locations,
            cancel,
            probe: Mutex::new(probe),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn worker(&self) -> &Arc<ShellWorker> {
        &self.worker
    }

    pub fn gempa(&self) -> &FeedCoordinator<GempaSource> {
        &self.gempa
    }

    pub fn locations(&self) -> &LocationBook {
        &self.locations
    }

    pub fn install_flow(&self) -> &tokio::sync::Mutex<InstallFlow> {
        &self.install
    }

    /// Current weather state, if the weather feed is enabled.
    pub async fn weather_state(&self) -> Option<FeedState<Forecast>> {
        self.weather.lock().await.as_ref().map(|w| w.state())
    }

    /// Make `location` current and point the weather feed at it.
    pub async fn select_location(&self, location: LocationRecord) -> Result<(), AppError> {
        self.locations.set_current(&location)?;

        let mut weather = self.weather.lock().await;
        let Some(previous) = weather.take() else {
            return Ok(());
        };
        previous.shutdown().await;

        let client = WeatherClient::from_config(self.worker.clone(), &self.config.weather)?;
        *weather = Some(start_weather(
            client,
            location.city.clone(),
            &self.store,
            &self.connectivity,
            &self.config,
        ));
        tracing::info!("Weather now follows {}", location.city);
        Ok(())
    }

    /// Stop timers and probes, then wait for pending cache writes.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.cancel.cancel();

        let probe = self.probe.lock().take();
        if let Some(probe) = probe {
            if let Err(e) = probe.await {
                tracing::warn!("Connectivity probe ended abnormally: {}", e);
            }
        }

        self.gempa.shutdown().await;
        if let Some(weather) = self.weather.lock().await.as_ref() {
            weather.shutdown().await;
        }

        self.worker.flush().await;
    }
}

fn start_weather(
    client: WeatherClient,
    city: String,
    store: &Arc<dyn KeyValueStore>,
    connectivity: &Connectivity,
    config: &Config,
) -> FeedCoordinator<WeatherSource> {
    FeedCoordinator::start(
        WeatherSource::new(client, city),
        Arc::clone(store),
        connectivity.subscribe(),
        minutes(config.weather.refresh_minutes),
    )
}

/// Bring the shell worker for the configured version up to `Activated`.
///
/// Reuses an existing generation when present. If installing the new version
/// fails, the newest older generation keeps serving.
async fn prepare_shell(
    config: &ShellConfig,
    cache: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetch>,
) -> Result<Arc<ShellWorker>, ShellError> {
    let worker = ShellWorker::from_config(config, Arc::clone(&cache), Arc::clone(&network))?;
    if worker.restore()? {
        return Ok(Arc::new(worker));
    }

    match worker.install().await {
        Ok(()) => {
            let purged = worker.activate().await?;
            if !purged.is_empty() {
                tracing::info!("Upgraded shell cache, removed {:?}", purged);
            }
            Ok(Arc::new(worker))
        }
        Err(e) => {
            let previous = cache
                .generations()
                .map_err(|e| ShellError::Cache(e.to_string()))?
                .pop();

            let Some(previous) = previous else {
                tracing::warn!("No offline cache available: {}", e);
                return Ok(Arc::new(worker));
            };

            tracing::warn!("Keeping shell cache {}: {}", previous, e);
            let fallback_config = ShellConfig {
                cache_version: previous,
                ..config.clone()
            };
            let fallback = ShellWorker::from_config(&fallback_config, cache, network)?;
            fallback.restore()?;
            Ok(Arc::new(fallback))
        }
    }
}
