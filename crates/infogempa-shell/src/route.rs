use reqwest::Method;
use url::{Origin, Url};

use infogempa_core::ShellConfig;

use crate::error::ShellError;

/// Caching strategy picked for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// BMKG / weather API: network first, backfill the cache
    RemoteData,
    /// Same-origin shell asset: cache first
    ShellAsset,
    /// Everything else goes straight to the network
    PassThrough,
}

/// Decides which strategy applies to a request, by origin.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    shell_origin: Origin,
    data_origins: Vec<Origin>,
}

impl RoutePolicy {
    pub fn new(shell_origin: &Url, data_origins: &[Url]) -> Self {
        Self {
            shell_origin: shell_origin.origin(),
            data_origins: data_origins.iter().map(Url::origin).collect(),
        }
    }

    pub fn from_config(config: &ShellConfig) -> Result<Self, ShellError> {
        let shell = config.origin_url()?;
        let data = config.data_origin_urls()?;
        Ok(Self::new(&shell, &data))
    }

    pub fn classify(&self, method: &Method, url: &Url) -> RequestClass {
        // Only GET responses can be replayed from the cache
        if *method != Method::GET {
            return RequestClass::PassThrough;
        }

        let origin = url.origin();
        if self.data_origins.contains(&origin) {
            RequestClass::RemoteData
        } else if origin == self.shell_origin {
            RequestClass::ShellAsset
        } else {
            RequestClass::PassThrough
        }
    }
}
