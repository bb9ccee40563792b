//! Upstream DoH transport.
//!
//! One HTTPS client is built at startup and shared by every query. Two
//! connection modes exist: a direct connection with the resolver hostname
//! pinned to a pre-resolved address (the proxy cannot use ordinary DNS to
//! find its own DNS server), or a SOCKS5 tunnel that leaves hostname
//! resolution to the proxy on the far end.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, Proxy, Url};
use thiserror::Error;

use crate::doh::DohResponse;

/// Upstream fetches that hang would pin their semaphore slot forever, so
/// every request carries a deadline.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle pooled connections keep TLS/HTTP2 sessions warm between queries.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// How the HTTPS connection to the DoH resolver is made. Chosen once at
/// startup, never per query.
#[derive(Debug, Clone)]
pub enum UpstreamMode {
    /// Connect directly, with the resolver hostname pinned to this
    /// address. Host header and SNI still carry the hostname.
    Pinned(SocketAddr),
    /// Tunnel through a SOCKS5 proxy (`host:port`) which resolves the
    /// hostname remotely.
    Socks5(String),
}

/// A fetch that failed for any reason; the query it served is abandoned.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid response body: {0}")]
    Body(#[from] serde_json::Error),
}

/// The transport seam the resolver fetches through.
///
/// Queries run on a single-threaded `LocalSet`, so fetch futures never
/// need a `Send` bound.
#[allow(async_fn_in_trait)]
pub trait Upstream {
    async fn fetch(&self, url: Url) -> Result<DohResponse, FetchError>;
}

/// HTTPS client for the DoH JSON API.
pub struct DohClient {
    http: Client,
}

impl DohClient {
    /// Build the client for the configured upstream mode.
    pub fn new(resolver_host: &str, mode: &UpstreamMode) -> Result<Self, reqwest::Error> {
        let builder = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT);

        let builder = match mode {
            UpstreamMode::Pinned(addr) => builder.resolve(resolver_host, *addr),
            UpstreamMode::Socks5(proxy_addr) => {
                builder.proxy(Proxy::all(format!("socks5h://{proxy_addr}"))?)
            }
        };

        Ok(Self {
            http: builder.build()?,
        })
    }
}

impl Upstream for DohClient {
    async fn fetch(&self, url: Url) -> Result<DohResponse, FetchError> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
