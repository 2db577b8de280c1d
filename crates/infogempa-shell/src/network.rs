//! Network access for the shell worker and the feed clients.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;

use crate::error::ShellError;
use crate::request::{ResponseSource, ShellRequest, ShellResponse};

const USER_AGENT: &str = "InfoGempa/0.1.0";

/// Anything that can turn a request into a response: the raw network, or the
/// shell worker sitting in front of it.
pub trait Fetch: Send + Sync {
    fn fetch<'a>(
        &'a self,
        request: &'a ShellRequest,
    ) -> BoxFuture<'a, Result<ShellResponse, ShellError>>;
}

/// Plain HTTP access backed by reqwest.
#[derive(Debug, Clone)]
pub struct Network {
    client: Arc<Client>,
}

impl Network {
    pub fn new(timeout: Duration) -> Result<Self, ShellError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Send the request and buffer the whole response.
    ///
    /// Non-2xx statuses are returned as responses; only transport failures are errors.
    pub async fn send(&self, request: &ShellRequest) -> Result<ShellResponse, ShellError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify)?.to_vec();

        tracing::debug!("{} {} -> {}", request.method, request.url, status);

        Ok(ShellResponse {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}

fn classify(error: reqwest::Error) -> ShellError {
    if error.is_connect() || error.is_timeout() {
        ShellError::Unreachable(error.to_string())
    } else {
        ShellError::Network(error)
    }
}

impl Fetch for Network {
    fn fetch<'a>(
        &'a self,
        request: &'a ShellRequest,
    ) -> BoxFuture<'a, Result<ShellResponse, ShellError>> {
        Box::pin(self.send(request))
    }
}
