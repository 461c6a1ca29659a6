use crate::server::{
    cache::{CacheKey, ResponseCache},
    normalize::{NormalizedResponse, normalize},
    upstream::{UpstreamClient, UpstreamError},
};
use axum::http::Method;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// A request as the client sent it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub url: Url,
}

impl InboundRequest {
    /// The query string including its leading `?`, or empty when there is none.
    fn query(&self) -> String {
        match self.url.query() {
            Some(query) if !query.is_empty() => format!("?{query}"),
            _ => String::new(),
        }
    }
}

/// Cache-aside controller sitting in front of the upstream.
pub struct Gateway {
    upstream: UpstreamClient,
    cache: Arc<dyn ResponseCache>,
    cacheable_method: Method,
}

impl Gateway {
    pub fn new(
        upstream: UpstreamClient,
        cache: Arc<dyn ResponseCache>,
        cacheable_method: Method,
    ) -> Self {
        Self {
            upstream,
            cache,
            cacheable_method,
        }
    }

    /// Answer `request` from the cache or, failing that, from the upstream.
    ///
    /// Upstream error statuses are returned like any other response. Only a failure
    /// to talk to the upstream at all is surfaced as an error.
    pub async fn handle(
        &self,
        request: &InboundRequest,
    ) -> Result<NormalizedResponse, UpstreamError> {
        if request.method != self.cacheable_method {
            debug!("Bypassing cache for {} {}", request.method, request.url);
            return self.forward(request).await;
        }

        let key = CacheKey::derive(&request.method, &request.url);
        match self.cache.lookup(&key).await {
            Ok(Some(response)) => {
                debug!("Cache hit for {key}");
                return Ok(response);
            }
            Ok(None) => debug!("Cache miss for {key}"),
            Err(err) => warn!("Cache lookup for {key} failed, treating as a miss: {err:?}"),
        }

        // Concurrent misses for the same key may both reach this point; the later store wins.
        let response = self.forward(request).await?;
        match self.cache.store(key.clone(), response.clone()).await {
            Ok(()) => debug!("Stored response for {key}"),
            Err(err) => warn!("Failed to store response for {key}: {err:?}"),
        }
        Ok(response)
    }

    async fn forward(&self, request: &InboundRequest) -> Result<NormalizedResponse, UpstreamError> {
        let upstream_response = self
            .upstream
            .fetch(request.method.clone(), request.url.path(), &request.query())
            .await?;
        Ok(normalize(upstream_response.status, upstream_response.body))
    }
}
