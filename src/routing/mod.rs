//! Query routing: which apparent client address to present upstream.
//!
//! The upstream resolver tailors its answers to the EDNS client-subnet
//! hint, so the address chosen here decides which network location a
//! domain appears to resolve from.

mod domain_set;

pub use domain_set::DomainSet;

use std::net::IpAddr;

/// Prefix length of the client-subnet hint disclosed upstream. Only the
/// network prefix of the chosen address leaves the proxy, never the full
/// address.
pub const ECS_PREFIX_LEN: u8 = 24;

/// Pick the client address to disclose for a queried domain.
///
/// Names under a suffix in `domains` are presented as coming from
/// `proxy_ip`, everything else as `public_ip`. Equal addresses mean no
/// split horizon is configured and the set is not consulted.
pub fn choose_client_ip(
    domain: &str,
    public_ip: IpAddr,
    proxy_ip: IpAddr,
    domains: &DomainSet,
) -> IpAddr {
    if public_ip == proxy_ip {
        return public_ip;
    }

    let name = domain.strip_suffix('.').unwrap_or(domain);
    if domains.matches(name) {
        proxy_ip
    } else {
        public_ip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn set() -> DomainSet {
        DomainSet::from_lines(["example.org", "blocked.test"])
    }

    #[test]
    fn matched_domain_routes_via_proxy() {
        let chosen = choose_client_ip("match.example.org.", ip("1.1.1.1"), ip("2.2.2.2"), &set());

        assert_eq!(chosen, ip("2.2.2.2"));
    }

    #[test]
    fn unmatched_domain_keeps_public_ip() {
        let chosen = choose_client_ip("example.com", ip("1.1.1.1"), ip("2.2.2.2"), &set());

        assert_eq!(chosen, ip("1.1.1.1"));
    }

    #[test]
    fn equal_addresses_skip_the_set() {
        let chosen = choose_client_ip("match.example.org", ip("1.1.1.1"), ip("1.1.1.1"), &set());

        assert_eq!(chosen, ip("1.1.1.1"));
    }

    #[test]
    fn trailing_dot_does_not_change_the_route() {
        let domains = set();
        let public = ip("1.1.1.1");
        let proxy = ip("2.2.2.2");

        assert_eq!(
            choose_client_ip("blocked.test.", public, proxy, &domains),
            choose_client_ip("blocked.test", public, proxy, &domains),
        );
        assert_eq!(
            choose_client_ip("sub.blocked.test.", public, proxy, &domains),
            proxy,
        );
    }
}
