use crate::server::{credential::CredentialInjector, http_client::HttpClient};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to send request to upstream: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to read upstream response body: {0}")]
    Body(#[source] reqwest::Error),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Request(err) | Self::Body(err) => err.is_timeout(),
            Self::InvalidUrl(_) => false,
        }
    }
}

/// Status and fully buffered body of an upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Client for the single upstream origin every request is forwarded to.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http_client: HttpClient,
    origin: Url,
    credentials: CredentialInjector,
}

impl UpstreamClient {
    pub fn new(http_client: HttpClient, origin: Url, credentials: CredentialInjector) -> Self {
        Self {
            http_client,
            origin,
            credentials,
        }
    }

    /// Forward a request for `path` and `query` to the origin.
    ///
    /// `query` is either empty or includes its leading `?`. The credential is attached
    /// here so it never leaks into anything derived from the inbound request, and
    /// errors carry no URL so it never reaches the logs.
    pub async fn fetch(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let target = Url::parse(&format!(
            "{}{path}{}",
            self.origin.as_str().trim_end_matches('/'),
            self.credentials.augment(query)
        ))?;
        debug!("Forwarding {method} {path} to upstream");

        let response = self
            .http_client
            .request(method, target)
            .send()
            .await
            .map_err(|err| UpstreamError::Request(err.without_url()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| UpstreamError::Body(err.without_url()))?;

        Ok(UpstreamResponse { status, body })
    }
}
