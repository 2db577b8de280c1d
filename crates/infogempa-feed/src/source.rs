//! Feed sources: what a coordinator fetches, and how it is persisted.

use std::future::Future;

use crate::client::{GempaClient, WeatherClient};
use crate::error::FeedError;
use crate::storage::{keys, KeyValueStore};
use crate::types::{AutoGempa, GempaList};
use crate::weather::Forecast;

/// Result of one successful fetch: the decoded data plus the raw records to
/// persist, keyed by storage key.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub data: T,
    pub records: Vec<(&'static str, String)>,
}

/// A remote data kind managed by a [`FeedCoordinator`](crate::FeedCoordinator).
pub trait FeedSource: Send + Sync + 'static {
    type Data: Clone + Send + Sync + 'static;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Storage key holding the last successful update time
    fn timestamp_key(&self) -> &'static str;

    /// Fetch everything this feed needs. All parts must succeed.
    fn fetch(&self) -> impl Future<Output = Result<Fetched<Self::Data>, FeedError>> + Send;

    /// Rebuild the last persisted snapshot, if a complete one exists.
    fn restore(&self, store: &dyn KeyValueStore) -> Result<Option<Self::Data>, FeedError>;
}

/// Combined earthquake snapshot: both endpoints from the same refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct GempaSnapshot {
    pub list: GempaList,
    pub latest: AutoGempa,
}

impl GempaSnapshot {
    pub fn total_count(&self) -> usize {
        self.list.len()
    }
}

/// Earthquake feed: recent list plus latest event.
#[derive(Clone)]
pub struct GempaSource {
    client: GempaClient,
}

impl GempaSource {
    pub fn new(client: GempaClient) -> Self {
        Self { client }
    }
}

impl FeedSource for GempaSource {
    type Data = GempaSnapshot;

    fn name(&self) -> &'static str {
        "gempa"
    }

    fn timestamp_key(&self) -> &'static str {
        keys::GEMPA_UPDATED
    }

    async fn fetch(&self) -> Result<Fetched<GempaSnapshot>, FeedError> {
        let (list, latest) =
            tokio::try_join!(self.client.fetch_list(), self.client.fetch_latest())?;

        Ok(Fetched {
            data: GempaSnapshot {
                list: list.value,
                latest: latest.value,
            },
            records: vec![(keys::GEMPA_LIST, list.raw), (keys::GEMPA_LATEST, latest.raw)],
        })
    }

    fn restore(&self, store: &dyn KeyValueStore) -> Result<Option<GempaSnapshot>, FeedError> {
        let (Some(list), Some(latest)) = (store.get(keys::GEMPA_LIST)?, store.get(keys::GEMPA_LATEST)?)
        else {
            return Ok(None);
        };

        Ok(Some(GempaSnapshot {
            list: serde_json::from_str(&list)
                .map_err(|e| FeedError::parse("stored earthquake list", e))?,
            latest: serde_json::from_str(&latest)
                .map_err(|e| FeedError::parse("stored latest earthquake", e))?,
        }))
    }
}

/// Weather feed for one city.
#[derive(Clone)]
pub struct WeatherSource {
    client: WeatherClient,
    city: String,
}

impl WeatherSource {
    pub fn new(client: WeatherClient, city: impl Into<String>) -> Self {
        Self {
            client,
            city: city.into(),
        }
    }

    pub fn city(&self) -> &str {
        &self.city
    }
}

impl FeedSource for WeatherSource {
    type Data = Forecast;

    fn name(&self) -> &'static str {
        "weather"
    }

    fn timestamp_key(&self) -> &'static str {
        keys::WEATHER_UPDATED
    }

    async fn fetch(&self) -> Result<Fetched<Forecast>, FeedError> {
        let forecast = self.client.fetch_forecast(&self.city).await?;
        Ok(Fetched {
            data: forecast.value,
            records: vec![(keys::WEATHER, forecast.raw)],
        })
    }

    fn restore(&self, store: &dyn KeyValueStore) -> Result<Option<Forecast>, FeedError> {
        let Some(raw) = store.get(keys::WEATHER)? else {
            return Ok(None);
        };

        let forecast: Forecast =
            serde_json::from_str(&raw).map_err(|e| FeedError::parse("stored forecast", e))?;

        // Another city's forecast is worse than none
        if !forecast.city.name.eq_ignore_ascii_case(&self.city) {
            tracing::debug!(
                "Ignoring stored forecast for {} (want {})",
                forecast.city.name,
                self.city
            );
            return Ok(None);
        }

        Ok(Some(forecast))
    }
}
