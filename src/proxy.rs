//! Proxy orchestration.
//!
//! Wires the resolver to the UDP transport and runs until interrupted.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use crate::resolver::Resolver;
use crate::routing::DomainSet;
use crate::transport::udp::UdpTransport;
use crate::upstream::{DohClient, UpstreamMode};

/// Configuration for the proxy, built once at startup.
pub struct ProxyConfig {
    /// Local address to bind (e.g., 0.0.0.0:5353)
    pub bind_addr: SocketAddr,
    /// DoH resolver hostname (JSON API)
    pub resolver_host: String,
    /// How to reach the resolver
    pub mode: UpstreamMode,
    /// Client address presented for unmatched domains
    pub public_ip: IpAddr,
    /// Client address presented for domains in the suffix set
    pub proxy_ip: IpAddr,
    /// Suffixes routed via the proxy address
    pub domains: DomainSet,
    /// Maximum concurrent upstream fetches
    pub max_in_flight: usize,
    /// Enable per-query logging
    pub verbose: bool,
}

/// Run the proxy with the given configuration.
///
/// Starts the UDP transport on the bind address and forwards all queries
/// to the DoH resolver. Returns after an interrupt signal, releasing the
/// socket.
pub async fn run(config: ProxyConfig) -> io::Result<()> {
    let client = DohClient::new(&config.resolver_host, &config.mode).map_err(io::Error::other)?;
    let resolver = Rc::new(Resolver::new(
        client,
        config.domains,
        config.resolver_host.clone(),
        config.public_ip,
        config.proxy_ip,
        config.max_in_flight,
    ));

    println!(
        "DoH proxy listening on {} ({} suffixes routed via {})",
        config.bind_addr,
        resolver.domain_count(),
        config.proxy_ip
    );
    match &config.mode {
        UpstreamMode::Pinned(addr) => {
            println!("Upstream: https://{} pinned to {}", config.resolver_host, addr)
        }
        UpstreamMode::Socks5(proxy) => {
            println!("Upstream: https://{} via socks5 {}", config.resolver_host, proxy)
        }
    }

    let udp = UdpTransport::bind(config.bind_addr).await?;
    udp.start(resolver.clone(), config.verbose);

    // Print stats every minute
    let stats_resolver = resolver.clone();
    tokio::task::spawn_local(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let stats = stats_resolver.stats.snapshot_and_reset();
            println!(
                "[stats] requests={} answered={} abandoned={} rerouted={} avg_response={:.2}ms",
                stats.requests,
                stats.answered,
                stats.abandoned,
                stats.rerouted,
                stats.avg_response_ms
            );
        }
    });

    // Run until interrupted, then let the tasks drop with the LocalSet.
    tokio::signal::ctrl_c().await?;
    println!("interrupt received, shutting down");

    Ok(())
}
