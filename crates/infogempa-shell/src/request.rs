use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

/// How the request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load
    Navigate,
    /// Anything else (scripts, styles, API calls)
    #[default]
    Subresource,
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
}

impl ShellRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Subresource,
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Navigate,
        }
    }

    /// Cache key for this request
    pub fn key(&self) -> String {
        request_key(&self.method, &self.url)
    }
}

/// Normalized request identity: `"<METHOD> <URL>"` with the fragment stripped.
pub fn request_key(method: &Method, url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    format!("{} {}", method.as_str(), url)
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

/// A captured HTTP response.
#[derive(Debug, Clone)]
pub struct ShellResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl ShellResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value matching `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_request_key_strips_fragment() {
        let url = Url::parse("https://data.bmkg.go.id/DataMKG/TEWS/autogempa.json#top").unwrap();
        let req = ShellRequest::get(url);
        assert_eq!(
            req.key(),
            "GET https://data.bmkg.go.id/DataMKG/TEWS/autogempa.json"
        );
    }

    #[test]
    fn test_request_key_keeps_query() {
        let url = Url::parse("https://api.openweathermap.org/data/2.5/forecast?q=Jakarta").unwrap();
        assert_eq!(
            request_key(&Method::GET, &url),
            "GET https://api.openweathermap.org/data/2.5/forecast?q=Jakarta"
        );
    }

    #[test]
    fn test_response_helpers() {
        let resp = ShellResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: br#"{"ok":true}"#.to_vec(),
            source: ResponseSource::Network,
        };
        assert!(resp.is_success());
        assert_eq!(resp.header("content-type"), Some("application/json"));
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["ok"], true);
    }
}
