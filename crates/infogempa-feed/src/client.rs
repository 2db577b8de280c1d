//! HTTP clients for the BMKG and OpenWeather endpoints.
//!
//! Both go through a [`Fetch`], normally the shell worker, so every response
//! passes the offline cache on its way in.

use std::sync::Arc;

use infogempa_core::{GempaConfig, WeatherConfig};
use infogempa_shell::{Fetch, ShellRequest};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::FeedError;
use crate::types::{AutoGempa, GempaList};
use crate::weather::Forecast;

/// A decoded response plus the exact body it was decoded from.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: T,
    pub raw: String,
}

async fn get_json<T: DeserializeOwned>(
    fetcher: &dyn Fetch,
    url: Url,
    context: &str,
) -> Result<Decoded<T>, FeedError> {
    let request = ShellRequest::get(url);
    let response = fetcher.fetch(&request).await?;

    if !response.is_success() {
        return Err(FeedError::Status {
            status: response.status,
            url: request.url.to_string(),
        });
    }

    let raw = response.text();
    let value = serde_json::from_str(&raw).map_err(|e| FeedError::parse(context, e))?;
    Ok(Decoded { value, raw })
}

/// BMKG earthquake endpoints.
#[derive(Clone)]
pub struct GempaClient {
    fetcher: Arc<dyn Fetch>,
    list_url: Url,
    latest_url: Url,
}

impl GempaClient {
    pub fn new(fetcher: Arc<dyn Fetch>, list_url: Url, latest_url: Url) -> Self {
        Self {
            fetcher,
            list_url,
            latest_url,
        }
    }

    pub fn from_config(fetcher: Arc<dyn Fetch>, config: &GempaConfig) -> Result<Self, FeedError> {
        Ok(Self::new(fetcher, config.list_url()?, config.latest_url()?))
    }

    /// Recent earthquakes list
    #[tracing::instrument(skip(self), fields(url = %self.list_url))]
    pub async fn fetch_list(&self) -> Result<Decoded<GempaList>, FeedError> {
        let decoded: Decoded<GempaList> =
            get_json(self.fetcher.as_ref(), self.list_url.clone(), "earthquake list").await?;
        tracing::debug!("Fetched {} earthquakes", decoded.value.len());
        Ok(decoded)
    }

    /// Latest automatic earthquake
    #[tracing::instrument(skip(self), fields(url = %self.latest_url))]
    pub async fn fetch_latest(&self) -> Result<Decoded<AutoGempa>, FeedError> {
        get_json(self.fetcher.as_ref(), self.latest_url.clone(), "latest earthquake").await
    }
}

/// OpenWeather forecast endpoint.
#[derive(Clone)]
pub struct WeatherClient {
    fetcher: Arc<dyn Fetch>,
    base_url: Url,
    api_key: String,
}

impl WeatherClient {
    pub fn new(fetcher: Arc<dyn Fetch>, base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url,
            api_key: api_key.into(),
        }
    }

    pub fn from_config(
        fetcher: Arc<dyn Fetch>,
        config: &WeatherConfig,
    ) -> Result<Self, FeedError> {
        let api_key = config.resolved_api_key().ok_or(FeedError::MissingApiKey)?;
        Ok(Self::new(fetcher, config.base_url()?, api_key))
    }

    fn forecast_url(&self, city: &str) -> Result<Url, FeedError> {
        let mut url = self.base_url.join("data/2.5/forecast").map_err(|e| {
            FeedError::Config(infogempa_core::ConfigError::Invalid(format!(
                "weather.base_url: {}",
                e
            )))
        })?;
        url.query_pairs_mut()
            .append_pair("q", city)
            .append_pair("appid", &self.api_key)
            .append_pair("units", "metric");
        Ok(url)
    }

    /// 5-day forecast for a city
    #[tracing::instrument(skip(self))]
    pub async fn fetch_forecast(&self, city: &str) -> Result<Decoded<Forecast>, FeedError> {
        let url = self.forecast_url(city)?;
        let decoded: Decoded<Forecast> =
            get_json(self.fetcher.as_ref(), url, "weather forecast").await?;
        tracing::debug!(
            "Fetched {} forecast entries for {}",
            decoded.value.list.len(),
            decoded.value.city.name
        );
        Ok(decoded)
    }
}
