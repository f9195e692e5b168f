//! # HTTP Retrieval Utilities
//!
//! A thin asynchronous client wrapper around `reqwest`, shared by all
//! fetchers. One `reqwest::Client` (and its connection pool) is built once
//! and cloned into each fetcher. JSON APIs go through [`HttpSource::get_json`],
//! scraped pages through [`HttpSource::get_text`].
//!
//! No retry layer: a failed request aborts the site's unit for this cycle and
//! the next scheduled cycle tries again.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::FetchError;

/// Overall request deadline.
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(10);
/// TCP/TLS connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:143.0) Gecko/20100101 Firefox/143.0";

/// A cloneable GET client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    inner: Client,
}

impl HttpSource {
    /// Builds a client with the default timeouts.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeouts(DEFAULT_TOTAL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeouts(total: Duration, connect: Duration) -> Result<Self, FetchError> {
        let inner = Client::builder()
            .timeout(total)
            .connect_timeout(connect)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self { inner })
    }

    /// Sends a GET and rejects non-success statuses with their body for context.
    async fn send(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<Response, FetchError> {
        // 1. Validate the endpoint
        let url = Url::parse(url).map_err(|e| FetchError::NotConfigured(format!("{url}: {e}")))?;

        // 2. Execute the request
        let response = self
            .inner
            .get(url.clone())
            .query(query)
            .headers(headers)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        // 3. Check the status
        let status = response.status();
        debug!(%url, status = status.as_u16(), "HTTP response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Performs a GET and deserializes the JSON body into `T`.
    ///
    /// # Arguments
    /// * `url` - Absolute endpoint URL.
    /// * `query` - Query-string pairs appended to the URL.
    /// * `headers` - Extra request headers.
    ///
    /// # Errors
    /// `Network` for transport failures, `Status` for non-2xx answers and
    /// `Parse` when the body is not the expected JSON.
    pub async fn get_json<T>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(url, query, headers).await?;
        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Parse(e.to_string())
            } else {
                FetchError::Network(e.to_string())
            }
        })
    }

    /// Performs a GET and returns the body as text, for HTML pages.
    ///
    /// # Errors
    /// Same as [`HttpSource::get_json`], minus decoding.
    pub async fn get_text(&self, url: &str, headers: HeaderMap) -> Result<String, FetchError> {
        let response = self.send(url, &[], headers).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_default_timeouts() {
        assert!(HttpSource::new().is_ok());
    }

    #[tokio::test]
    async fn invalid_url_is_a_configuration_error() {
        let source = HttpSource::new().unwrap();
        let result: Result<serde_json::Value, _> =
            source.get_json("not a url", &[], HeaderMap::new()).await;
        assert!(matches!(result, Err(FetchError::NotConfigured(_))));

        let page = source.get_text("/relative/page", HeaderMap::new()).await;
        assert!(matches!(page, Err(FetchError::NotConfigured(_))));
    }
}
