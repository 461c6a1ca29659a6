mod cache;
mod credential;
mod gateway;
mod http_client;
mod normalize;
mod routes;
mod upstream;

use anyhow::Result;
use axum::{Router, http::Method};
use cache::{MokaResponseCache, ResponseCache};
use core::{net::SocketAddr, time::Duration};
use credential::CredentialInjector;
use gateway::Gateway;
use http_client::{BuildHttpClientArgs, build_http_client};
use reqwest::Proxy;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::TimeoutLayer,
    trace::{self, TraceLayer},
};
use tracing::{Level, info};
use upstream::UpstreamClient;
use url::Url;

#[derive(Debug)]
pub struct Server {
    router_inner: Router,
}

/// Settings to run the server with.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum time an inbound request may take before it is abandoned.
    pub request_timeout: Duration,

    /// See [`GatewaySettings`].
    pub gateway_settings: GatewaySettings,

    /// See [`UpstreamSettings`].
    pub upstream_settings: UpstreamSettings,

    /// See [`CacheSettings`].
    pub cache_settings: CacheSettings,
}

/// Configuration options for the cache-aside decision.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// The single request method that is eligible for caching.
    ///
    /// Every other method bypasses the cache entirely.
    pub cacheable_method: Method,
}

/// Configuration options used when making any call to the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Base URL that inbound paths and queries are appended to.
    pub origin: Url,

    /// Credential injected into outbound queries that lack one.
    pub api_key: String,

    /// Query parameter name the credential is sent under.
    pub credential_param: String,

    /// User-Agent sent with every upstream request.
    pub user_agent: String,

    /// Whether to allow invalid/expired/forged TLS certificates when making upstream requests.
    ///
    /// **Enabling this is dangerous and is usually not necessary.**
    pub allow_invalid_certs: bool,

    /// The maximum amount of redirects to follow when making a request to the upstream before abandoning the request.
    pub max_redirects: usize,

    /// Maximum time an upstream request may take before it's abandoned and considered failed.
    pub request_timeout: Duration,

    /// The proxy to use for all upstream requests.
    pub request_proxy: Option<Url>,
}

/// Configuration options for the built-in response cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Maximum combined size in bytes of all cached responses.
    pub max_size: u64,
}

struct AppState {
    gateway: Gateway,
}

impl Server {
    /// Create a new server backed by the in-memory response cache.
    pub fn new(settings: Settings) -> Result<Self> {
        let cache = Arc::new(MokaResponseCache::new(settings.cache_settings.max_size));
        Self::with_cache(settings, cache)
    }

    /// Create a new server that stores responses in the provided cache service.
    pub fn with_cache(settings: Settings, cache: Arc<dyn ResponseCache>) -> Result<Self> {
        let upstream_settings = &settings.upstream_settings;
        let http_client = build_http_client(BuildHttpClientArgs {
            user_agent: upstream_settings.user_agent.clone(),
            allow_invalid_certs: upstream_settings.allow_invalid_certs,
            max_redirects: upstream_settings.max_redirects,
            request_timeout: upstream_settings.request_timeout,
            proxy: upstream_settings
                .request_proxy
                .as_ref()
                .map(|p| Proxy::all(p.as_str()))
                .transpose()?,
        })?;
        let gateway = Gateway::new(
            UpstreamClient::new(
                http_client,
                upstream_settings.origin.clone(),
                CredentialInjector::new(
                    upstream_settings.credential_param.clone(),
                    upstream_settings.api_key.clone(),
                ),
            ),
            cache,
            settings.gateway_settings.cacheable_method.clone(),
        );

        let router = Router::new()
            .fallback(routes::gateway_handler)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(TimeoutLayer::new(settings.request_timeout))
            .layer(CatchPanicLayer::new())
            .with_state(Arc::new(AppState { gateway }));

        Ok(Self {
            router_inner: router,
        })
    }

    /// Start the server and expose it locally on the provided [`SocketAddr`].
    pub async fn start(self, address: &SocketAddr) -> Result<()> {
        let tcp_listener = TcpListener::bind(&address).await?;
        info!("Listening on http://{}", tcp_listener.local_addr()?);
        axum::serve(tcp_listener, self.router_inner)
            .with_graceful_shutdown(Self::shutdown_signal())
            .await?;
        Ok(())
    }

    // https://github.com/tokio-rs/axum/blob/15917c6dbcb4a48707a20e9cfd021992a279a662/examples/graceful-shutdown/src/main.rs#L55
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}
