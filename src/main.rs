use clap::Parser;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use divert::proxy::{self, ProxyConfig};
use divert::routing::DomainSet;
use divert::upstream::UpstreamMode;

#[derive(Parser)]
#[command(name = "divert")]
#[command(about = "Split-horizon DNS-over-HTTPS forwarding proxy", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, default_value = "5353")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// DoH resolver host (JSON API)
    #[arg(short, long, default_value = "dns.google")]
    resolver: String,

    /// Pinned address for the resolver host, skipping bootstrap resolution
    #[arg(long)]
    resolver_ip: Option<IpAddr>,

    /// SOCKS5 proxy (host:port) to tunnel DoH requests through
    #[arg(long)]
    socks5: Option<String>,

    /// Client address presented upstream for unmatched domains
    #[arg(long)]
    public_ip: IpAddr,

    /// Client address presented upstream for domains in the suffix file
    #[arg(long)]
    proxy_ip: IpAddr,

    /// Path to a newline-delimited domain-suffix file
    #[arg(short, long)]
    domains: PathBuf,

    /// Maximum concurrent upstream fetches
    #[arg(long, default_value = "10")]
    max_in_flight: usize,

    /// Log every query
    #[arg(short, long)]
    verbose: bool,
}

/// Startup-only work: anything failing here aborts the process.
async fn build_config(args: Args) -> io::Result<ProxyConfig> {
    let bind_addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .expect("invalid bind address");

    let domains = DomainSet::load(&args.domains)?;

    let mode = match (args.socks5, args.resolver_ip) {
        (Some(proxy), _) => UpstreamMode::Socks5(proxy),
        (None, Some(ip)) => UpstreamMode::Pinned(SocketAddr::new(ip, 443)),
        (None, None) => {
            // Bootstrap: the resolver host is looked up once through the
            // system resolver; afterwards all resolution goes through DoH.
            let addr = tokio::net::lookup_host((args.resolver.as_str(), 443))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::other(format!("no address found for {}", args.resolver))
                })?;
            UpstreamMode::Pinned(addr)
        }
    };

    Ok(ProxyConfig {
        bind_addr,
        resolver_host: args.resolver,
        mode,
        public_ip: args.public_ip,
        proxy_ip: args.proxy_ip,
        domains,
        max_in_flight: args.max_in_flight,
        verbose: args.verbose,
    })
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async {
        let config = build_config(args).await?;
        proxy::run(config).await
    })
}
