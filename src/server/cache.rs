use crate::server::normalize::NormalizedResponse;
use anyhow::Result;
use async_trait::async_trait;
use axum::http::{HeaderMap, Method, header};
use moka::{Expiry, future::Cache as MokaCache};
use std::{
    fmt,
    time::{Duration, Instant},
};
use url::Url;

/// Identifies a cached response by request method and full inbound URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request.
    ///
    /// `url` must be the URL the client requested, before any credential is attached.
    pub fn derive(method: &Method, url: &Url) -> Self {
        Self(format!("{method} {url}"))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for normalized responses.
///
/// Entry expiry is the backend's responsibility and should follow the
/// `Cache-Control` header stored alongside each response.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Fetch the response stored under `key`, if any.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<NormalizedResponse>>;

    /// Store `response` under `key`, replacing any existing entry.
    async fn store(&self, key: CacheKey, response: NormalizedResponse) -> Result<()>;
}

struct CacheExpiry;

impl CacheExpiry {
    /// Entries without a `max-age` directive are not reusable and expire at once.
    fn time_to_live(value: &NormalizedResponse) -> Duration {
        Duration::from_secs(max_age(&value.headers).unwrap_or_default())
    }
}

impl Expiry<CacheKey, NormalizedResponse> for CacheExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &NormalizedResponse,
        _current_time: Instant,
    ) -> Option<Duration> {
        Some(Self::time_to_live(value))
    }

    // The replacing response starts a fresh lifetime.
    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &NormalizedResponse,
        _current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        Some(Self::time_to_live(value))
    }
}

fn max_age(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|directive| directive.trim().strip_prefix("max-age=")?.parse().ok())
}

/// In-memory [`ResponseCache`] bounded by the total size of stored responses.
pub struct MokaResponseCache {
    inner: MokaCache<CacheKey, NormalizedResponse>,
}

impl MokaResponseCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: MokaCache::builder()
                .weigher(|_key, value: &NormalizedResponse| -> u32 {
                    value.size().try_into().unwrap_or(u32::MAX)
                })
                .expire_after(CacheExpiry)
                .max_capacity(max_capacity)
                .build(),
        }
    }
}

#[async_trait]
impl ResponseCache for MokaResponseCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<NormalizedResponse>> {
        Ok(self.inner.get(key).await)
    }

    async fn store(&self, key: CacheKey, response: NormalizedResponse) -> Result<()> {
        self.inner.insert(key, response).await;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::server::normalize::normalize;
    use anyhow::bail;
    use axum::http::{HeaderValue, StatusCode};
    use bytes::Bytes;
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Cache that records how often it is used.
    #[derive(Default)]
    pub(crate) struct CountingCache {
        entries: Mutex<HashMap<CacheKey, NormalizedResponse>>,
        lookups: AtomicUsize,
        stores: AtomicUsize,
    }

    impl CountingCache {
        pub(crate) fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }

        pub(crate) fn stores(&self) -> usize {
            self.stores.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResponseCache for CountingCache {
        async fn lookup(&self, key: &CacheKey) -> Result<Option<NormalizedResponse>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn store(&self, key: CacheKey, response: NormalizedResponse) -> Result<()> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            self.entries.lock().unwrap().insert(key, response);
            Ok(())
        }
    }

    /// Cache whose backend is always down.
    pub(crate) struct UnavailableCache;

    #[async_trait]
    impl ResponseCache for UnavailableCache {
        async fn lookup(&self, _key: &CacheKey) -> Result<Option<NormalizedResponse>> {
            bail!("cache backend unavailable")
        }

        async fn store(&self, _key: CacheKey, _response: NormalizedResponse) -> Result<()> {
            bail!("cache backend unavailable")
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_derive_is_stable() {
        let target = url("http://gateway.local/timeline/Kyiv?unitGroup=metric");
        assert_eq!(
            CacheKey::derive(&Method::GET, &target),
            CacheKey::derive(&Method::GET, &target)
        );
        assert_eq!(
            CacheKey::derive(&Method::GET, &target).to_string(),
            "GET http://gateway.local/timeline/Kyiv?unitGroup=metric"
        );
    }

    #[test]
    fn test_derive_distinguishes_method_and_url() {
        let kyiv = url("http://gateway.local/timeline/Kyiv");
        let lviv = url("http://gateway.local/timeline/Lviv");
        let kyiv_metric = url("http://gateway.local/timeline/Kyiv?unitGroup=metric");
        assert_ne!(
            CacheKey::derive(&Method::GET, &kyiv),
            CacheKey::derive(&Method::HEAD, &kyiv)
        );
        assert_ne!(
            CacheKey::derive(&Method::GET, &kyiv),
            CacheKey::derive(&Method::GET, &lviv)
        );
        assert_ne!(
            CacheKey::derive(&Method::GET, &kyiv),
            CacheKey::derive(&Method::GET, &kyiv_metric)
        );
    }

    #[test]
    fn test_max_age() {
        let mut headers = HeaderMap::new();
        assert_eq!(max_age(&headers), None);
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=60"),
        );
        assert_eq!(max_age(&headers), Some(60));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert_eq!(max_age(&headers), None);
    }

    #[test]
    fn test_canonical_headers_carry_max_age() {
        let response = normalize(StatusCode::OK, Bytes::new());
        assert_eq!(max_age(&response.headers), Some(60));
    }

    fn with_cache_control(value: &'static str) -> NormalizedResponse {
        let mut response = normalize(StatusCode::OK, Bytes::from_static(b"{}"));
        response
            .headers
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(value));
        response
    }

    #[tokio::test]
    async fn test_moka_expires_after_max_age() {
        let cache = MokaResponseCache::new(1024 * 1024);
        let key = CacheKey::derive(&Method::GET, &url("http://gateway.local/timeline/Kyiv"));

        cache
            .store(key.clone(), with_cache_control("public, max-age=1"))
            .await
            .unwrap();
        assert!(cache.lookup(&key).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.lookup(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_replacement_uses_its_own_max_age() {
        let cache = MokaResponseCache::new(1024 * 1024);
        let key = CacheKey::derive(&Method::GET, &url("http://gateway.local/timeline/Kyiv"));

        cache
            .store(key.clone(), with_cache_control("public, max-age=60"))
            .await
            .unwrap();
        cache
            .store(key.clone(), with_cache_control("public, max-age=1"))
            .await
            .unwrap();
        cache.inner.run_pending_tasks().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.lookup(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_without_max_age_is_not_reused() {
        let cache = MokaResponseCache::new(1024 * 1024);
        let key = CacheKey::derive(&Method::GET, &url("http://gateway.local/timeline/Kyiv"));

        cache
            .store(key.clone(), with_cache_control("no-store"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.lookup(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_round_trip() {
        let cache = MokaResponseCache::new(1024 * 1024);
        let key = CacheKey::derive(&Method::GET, &url("http://gateway.local/timeline/Kyiv"));
        let response = normalize(
            StatusCode::OK,
            Bytes::from_static(br#"{"resolvedAddress":"Kyiv, Ukraine"}"#),
        );

        assert_eq!(cache.lookup(&key).await.unwrap(), None);
        cache.store(key.clone(), response.clone()).await.unwrap();
        assert_eq!(cache.lookup(&key).await.unwrap(), Some(response));
    }
}
