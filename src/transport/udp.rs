//! UDP listener for incoming DNS queries.
//!
//! Each datagram gets its own task, so the receive loop never waits on a
//! query's upstream fetch and queries complete in whatever order their
//! fetches finish.

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;

use crate::dns::DnsQuery;
use crate::resolver::{QueryOutcome, Resolver};
use crate::upstream::Upstream;

use super::{MAX_DNS_PACKET_SIZE, QueryLogger};

/// UDP transport for the proxy.
///
/// Binds a single shared socket used both for receiving queries and
/// sending replies back to their peers.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    /// Start the receive loop.
    pub fn start<U: Upstream + 'static>(self, resolver: Rc<Resolver<U>>, verbose: bool) {
        tokio::task::spawn_local(run(self.socket, resolver, verbose));
    }
}

/// Receive loop: copy out each datagram and hand it to its own task.
async fn run<U: Upstream + 'static>(
    socket: Arc<UdpSocket>,
    resolver: Rc<Resolver<U>>,
    verbose: bool,
) {
    let logger = Rc::new(QueryLogger::new(verbose));
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                eprintln!("UDP recv error: {}", e);
                continue;
            }
        };

        if len < 12 {
            continue;
        }

        tokio::task::spawn_local(handle_query(
            socket.clone(),
            resolver.clone(),
            logger.clone(),
            buf[..len].to_vec(),
            src,
        ));
    }
}

/// One query's full pipeline: decode, resolve, reply.
async fn handle_query<U: Upstream>(
    socket: Arc<UdpSocket>,
    resolver: Rc<Resolver<U>>,
    logger: Rc<QueryLogger>,
    datagram: Vec<u8>,
    src: SocketAddr,
) {
    let start = Instant::now();

    // Malformed packets are dropped without a reply; an open UDP port
    // sees plenty of junk and none of it deserves a log line.
    let Some(query) = DnsQuery::parse(&datagram) else {
        return;
    };

    match resolver.resolve(&query).await {
        QueryOutcome::Answered { reply, route } => {
            if let Err(e) = socket.send_to(&reply, src).await {
                eprintln!("UDP response error: {}", e);
            }
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            resolver.stats.record_answered(elapsed_ms);
            logger.answered(&query.domain, route.as_str(), elapsed_ms);
        }
        QueryOutcome::Abandoned => {
            resolver.stats.record_abandoned();
            logger.abandoned(&query.domain, start.elapsed().as_secs_f64() * 1000.0);
        }
    }
}
