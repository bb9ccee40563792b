//! Per-query resolution pipeline.
//!
//! Each query runs through the same stages:
//! 1. Classify the queried name (which client address to present)
//! 2. Fetch the answer from the DoH upstream, bounded by the fetch slots
//! 3. Translate the JSON response back into a wire-format reply
//!
//! Transports handle the socket I/O, the resolver handles everything in
//! between. A failed fetch abandons the query; the client retries on its
//! own, as DNS clients do.

use std::net::IpAddr;

use tokio::sync::Semaphore;

use crate::dns::{DnsQuery, DnsReply};
use crate::doh::DohRequest;
use crate::routing::{self, DomainSet, ECS_PREFIX_LEN};
use crate::stats::Stats;
use crate::upstream::Upstream;

/// Which apparent client location a query was resolved with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Rerouted,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Direct => "direct",
            Route::Rerouted => "proxy",
        }
    }
}

/// Result of running one query through the pipeline.
pub enum QueryOutcome {
    /// Reply bytes ready to send to the client.
    Answered { reply: Vec<u8>, route: Route },
    /// The query was dropped; no reply is sent.
    Abandoned,
}

/// Resolver handles everything between receiving a parsed query and
/// having reply bytes for it.
pub struct Resolver<U> {
    upstream: U,
    domains: DomainSet,
    resolver_host: String,
    public_ip: IpAddr,
    proxy_ip: IpAddr,
    /// Bounds concurrent upstream fetches; intake stays unbounded.
    fetch_slots: Semaphore,
    pub stats: Stats,
}

impl<U: Upstream> Resolver<U> {
    pub fn new(
        upstream: U,
        domains: DomainSet,
        resolver_host: String,
        public_ip: IpAddr,
        proxy_ip: IpAddr,
        max_in_flight: usize,
    ) -> Self {
        Self {
            upstream,
            domains,
            resolver_host,
            public_ip,
            proxy_ip,
            fetch_slots: Semaphore::new(max_in_flight),
            stats: Stats::new(),
        }
    }

    /// Resolve one query to reply bytes.
    ///
    /// May suspend waiting for a fetch slot and for the upstream fetch
    /// itself; nothing else in the pipeline suspends.
    pub async fn resolve(&self, query: &DnsQuery) -> QueryOutcome {
        let client_ip = routing::choose_client_ip(
            &query.domain,
            self.public_ip,
            self.proxy_ip,
            &self.domains,
        );
        let route = if client_ip == self.proxy_ip && self.proxy_ip != self.public_ip {
            self.stats.record_rerouted();
            Route::Rerouted
        } else {
            Route::Direct
        };

        let request = DohRequest {
            host: self.resolver_host.clone(),
            name: query.domain.clone(),
            qtype: query.qtype,
            client_subnet: format!("{}/{}", client_ip, ECS_PREFIX_LEN),
        };
        let Some(url) = request.url() else {
            return QueryOutcome::Abandoned;
        };

        let response = {
            // Hold a fetch slot for the duration of the upstream call only.
            let _slot = match self.fetch_slots.acquire().await {
                Ok(permit) => permit,
                Err(_) => return QueryOutcome::Abandoned,
            };
            self.upstream.fetch(url).await
        };

        match response {
            Ok(doh) => QueryOutcome::Answered {
                reply: DnsReply::from_doh(query, &doh).to_bytes(),
                route,
            },
            Err(_) => QueryOutcome::Abandoned,
        }
    }

    /// Returns the number of suffixes in the routing set.
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doh::DohResponse;
    use crate::upstream::FetchError;

    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    use reqwest::Url;

    const ANSWER_JSON: &str =
        r#"{"Status":0,"Answer":[{"name":"example.com.","type":1,"TTL":300,"data":"93.184.216.34"}]}"#;

    struct StubUpstream {
        response: &'static str,
        in_flight: Rc<Cell<usize>>,
        max_in_flight: Rc<Cell<usize>>,
        seen_urls: Rc<RefCell<Vec<Url>>>,
    }

    impl StubUpstream {
        fn new(response: &'static str) -> Self {
            Self {
                response,
                in_flight: Rc::new(Cell::new(0)),
                max_in_flight: Rc::new(Cell::new(0)),
                seen_urls: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl Upstream for StubUpstream {
        async fn fetch(&self, url: Url) -> Result<DohResponse, FetchError> {
            self.seen_urls.borrow_mut().push(url);
            self.in_flight.set(self.in_flight.get() + 1);
            self.max_in_flight
                .set(self.max_in_flight.get().max(self.in_flight.get()));

            tokio::time::sleep(Duration::from_millis(5)).await;

            self.in_flight.set(self.in_flight.get() - 1);
            Ok(serde_json::from_str(self.response)?)
        }
    }

    struct FailingUpstream;

    impl Upstream for FailingUpstream {
        async fn fetch(&self, _url: Url) -> Result<DohResponse, FetchError> {
            // A body with no Status key is the JSON failure case.
            Ok(serde_json::from_str::<DohResponse>("{}")?)
        }
    }

    fn test_resolver<U: Upstream>(upstream: U, max_in_flight: usize) -> Resolver<U> {
        Resolver::new(
            upstream,
            DomainSet::from_lines(["blocked.test"]),
            "dns.test".to_string(),
            "1.1.1.1".parse().unwrap(),
            "2.2.2.2".parse().unwrap(),
            max_in_flight,
        )
    }

    fn query(domain: &str) -> DnsQuery {
        DnsQuery {
            id: 0x1234,
            domain: domain.to_string(),
            qtype: 1,
            qclass: 1,
        }
    }

    #[tokio::test]
    async fn resolves_to_reply_bytes() {
        let resolver = test_resolver(StubUpstream::new(ANSWER_JSON), 10);

        let outcome = resolver.resolve(&query("example.com")).await;

        let QueryOutcome::Answered { reply, route } = outcome else {
            panic!("query should be answered");
        };
        assert_eq!(route, Route::Direct);
        assert_eq!(u16::from_be_bytes([reply[0], reply[1]]), 0x1234);
        assert_eq!(reply[3] & 0x0F, 0); // NOERROR
        assert_eq!(u16::from_be_bytes([reply[6], reply[7]]), 1); // one answer
    }

    #[tokio::test]
    async fn matched_domain_discloses_proxy_subnet() {
        let stub = StubUpstream::new(ANSWER_JSON);
        let seen = stub.seen_urls.clone();
        let resolver = test_resolver(stub, 10);

        let outcome = resolver.resolve(&query("sub.blocked.test")).await;

        assert!(matches!(
            outcome,
            QueryOutcome::Answered {
                route: Route::Rerouted,
                ..
            }
        ));
        let urls = seen.borrow();
        let query_string = urls[0].query().unwrap().to_string();
        assert!(query_string.contains("edns_client_subnet=2.2.2.2%2F24"));
        assert_eq!(resolver.stats.rerouted.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unmatched_domain_discloses_public_subnet() {
        let stub = StubUpstream::new(ANSWER_JSON);
        let seen = stub.seen_urls.clone();
        let resolver = test_resolver(stub, 10);

        resolver.resolve(&query("example.com")).await;

        let urls = seen.borrow();
        let query_string = urls[0].query().unwrap().to_string();
        assert!(query_string.contains("edns_client_subnet=1.1.1.1%2F24"));
    }

    #[tokio::test]
    async fn failed_fetch_abandons_the_query() {
        let resolver = test_resolver(FailingUpstream, 10);

        let outcome = resolver.resolve(&query("example.com")).await;

        assert!(matches!(outcome, QueryOutcome::Abandoned));
    }

    #[tokio::test]
    async fn servfail_status_still_answers() {
        let resolver = test_resolver(StubUpstream::new(r#"{"Status":2}"#), 10);

        let outcome = resolver.resolve(&query("example.com")).await;

        let QueryOutcome::Answered { reply, .. } = outcome else {
            panic!("status-only responses still produce a reply");
        };
        assert_eq!(reply[3] & 0x0F, 2); // SERVFAIL
        assert_eq!(u16::from_be_bytes([reply[6], reply[7]]), 0); // no answers
    }

    #[tokio::test]
    async fn concurrent_fetches_stay_within_slot_limit() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let stub = StubUpstream::new(ANSWER_JSON);
                let max_seen = stub.max_in_flight.clone();
                let resolver = Rc::new(test_resolver(stub, 4));

                let mut handles = Vec::new();
                for i in 0..20 {
                    let resolver = resolver.clone();
                    handles.push(tokio::task::spawn_local(async move {
                        let q = query(&format!("host{i}.example.com"));
                        resolver.resolve(&q).await
                    }));
                }
                for handle in handles {
                    let outcome = handle.await.unwrap();
                    assert!(matches!(outcome, QueryOutcome::Answered { .. }));
                }

                assert!(max_seen.get() <= 4, "saw {} concurrent fetches", max_seen.get());
                assert!(max_seen.get() >= 1);
            })
            .await;
    }
}
