//! DoH JSON API request and response model.
//!
//! Requests go out as `GET https://<host>/resolve?name=..&type=..` against
//! Google-style JSON resolvers; responses come back as
//! `{"Status": .., "Answer": [..], "Authority": [..]}`.

use reqwest::Url;
use serde::Deserialize;

/// A single DoH query, ready to be turned into a request URL.
#[derive(Debug, Clone)]
pub struct DohRequest {
    /// Resolver hostname (also the Host/SNI value of the HTTPS request).
    pub host: String,
    /// Queried domain name.
    pub name: String,
    /// Numeric DNS record type.
    pub qtype: u16,
    /// EDNS client-subnet hint, `ip/prefix`.
    pub client_subnet: String,
}

impl DohRequest {
    /// Build the request URL. `None` if the configured host does not form
    /// a valid URL.
    pub fn url(&self) -> Option<Url> {
        let base = format!("https://{}/resolve", self.host);
        Url::parse_with_params(
            &base,
            [
                ("name", self.name.clone()),
                ("type", self.qtype.to_string()),
                ("edns_client_subnet", self.client_subnet.clone()),
            ],
        )
        .ok()
    }
}

/// A decoded DoH JSON response.
///
/// `Status` is always present; either record list may be missing, empty,
/// or populated.
#[derive(Debug, Clone, Deserialize)]
pub struct DohResponse {
    #[serde(rename = "Status")]
    pub status: u16,
    #[serde(rename = "Answer", default)]
    pub answers: Vec<DohRecord>,
    #[serde(rename = "Authority", default)]
    pub authorities: Vec<DohRecord>,
}

/// One resource record from a DoH response.
#[derive(Debug, Clone, Deserialize)]
pub struct DohRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: u16,
    #[serde(rename = "TTL", default)]
    pub ttl: u32,
    pub data: String,
}
