//! DNS message parsing and construction.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::doh::{DohRecord, DohResponse};

const HEADER_LEN: usize = 12;

/// Flags for a standard response: QR set, recursion desired + available.
/// The response code lives in the low four bits.
const RESPONSE_FLAGS: u16 = 0x8180;

/// A parsed DNS query.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Parse a DNS query from raw bytes.
    ///
    /// Returns `None` for anything that does not decode as a query; the
    /// caller drops such datagrams without a reply.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN + 1 {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);

        // Parse domain name
        let mut pos = HEADER_LEN;
        let mut domain_parts = Vec::new();

        while pos < data.len() {
            let label_len = data[pos] as usize;
            if label_len == 0 {
                pos += 1;
                break;
            }
            pos += 1;
            if pos + label_len > data.len() {
                return None;
            }
            let label = std::str::from_utf8(&data[pos..pos + label_len]).ok()?;
            domain_parts.push(label.to_string());
            pos += label_len;
        }

        if domain_parts.is_empty() {
            return None;
        }

        // Parse QTYPE and QCLASS
        if pos + 4 > data.len() {
            return None;
        }
        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        Some(Self {
            id,
            domain: domain_parts.join(".").to_lowercase(),
            qtype,
            qclass,
        })
    }

    fn question(&self) -> DnsQuestion {
        DnsQuestion {
            domain: self.domain.clone(),
            qtype: self.qtype,
            qclass: self.qclass,
        }
    }
}

/// Record types the reply builder knows how to encode.
///
/// This registry is closed: a DoH record with any other type code is
/// dropped from the reply, the remaining records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    A,
    Ns,
    Cname,
    Mx,
    Txt,
    Aaaa,
}

impl RecordKind {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordKind::A),
            2 => Some(RecordKind::Ns),
            5 => Some(RecordKind::Cname),
            15 => Some(RecordKind::Mx),
            16 => Some(RecordKind::Txt),
            28 => Some(RecordKind::Aaaa),
            _ => None,
        }
    }

    /// Encode a record's presentation-format `data` string as wire rdata.
    ///
    /// Returns `None` when the string does not parse for this kind.
    pub fn encode_rdata(self, data: &str) -> Option<Vec<u8>> {
        match self {
            RecordKind::A => {
                let addr: Ipv4Addr = data.parse().ok()?;
                Some(addr.octets().to_vec())
            }
            RecordKind::Aaaa => {
                let addr: Ipv6Addr = data.parse().ok()?;
                Some(addr.octets().to_vec())
            }
            RecordKind::Ns | RecordKind::Cname => {
                let mut rdata = Vec::new();
                encode_name(&mut rdata, data);
                Some(rdata)
            }
            RecordKind::Mx => {
                let (preference, exchange) = data.split_once(' ')?;
                let preference: u16 = preference.parse().ok()?;
                let mut rdata = preference.to_be_bytes().to_vec();
                encode_name(&mut rdata, exchange);
                Some(rdata)
            }
            RecordKind::Txt => {
                // Google's JSON API quotes TXT payloads.
                let text = data.trim_matches('"').as_bytes();
                let mut rdata = Vec::with_capacity(text.len() + 1);
                for chunk in text.chunks(255) {
                    rdata.push(chunk.len() as u8);
                    rdata.extend_from_slice(chunk);
                }
                if rdata.is_empty() {
                    rdata.push(0);
                }
                Some(rdata)
            }
        }
    }
}

/// A DNS question section entry.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A resource record ready for wire serialization.
#[derive(Debug, Clone)]
pub struct WireRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

/// A DNS reply translated from a DoH response.
#[derive(Debug, Clone)]
pub struct DnsReply {
    pub id: u16,
    pub flags: u16,
    pub question: DnsQuestion,
    pub answers: Vec<WireRecord>,
    pub authorities: Vec<WireRecord>,
}

impl DnsReply {
    /// Build a reply for `query` from a decoded DoH response.
    ///
    /// The response code mirrors the DoH `Status`. Answer records take
    /// priority; the authority section is only filled when the upstream
    /// sent no answers at all. Records with an unknown type or unparsable
    /// data are skipped individually.
    pub fn from_doh(query: &DnsQuery, doh: &DohResponse) -> Self {
        let (answers, authorities) = if doh.answers.is_empty() {
            (Vec::new(), translate_records(&doh.authorities))
        } else {
            (translate_records(&doh.answers), Vec::new())
        };

        Self {
            id: query.id,
            flags: RESPONSE_FLAGS | (doh.status & 0x000F),
            question: query.question(),
            answers,
            authorities,
        }
    }

    /// Response code carried in the low four flag bits.
    pub fn rcode(&self) -> u16 {
        self.flags & 0x000F
    }

    /// Encode the reply to wire format bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.authorities.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        // Question
        encode_name(&mut data, &self.question.domain);
        data.extend_from_slice(&self.question.qtype.to_be_bytes());
        data.extend_from_slice(&self.question.qclass.to_be_bytes());

        // Answer then authority records
        for record in self.answers.iter().chain(self.authorities.iter()) {
            // Use compression pointer if this is the question's domain
            if record.name == self.question.domain {
                data.extend_from_slice(&[0xC0, 0x0C]); // Pointer to offset 12
            } else {
                encode_name(&mut data, &record.name);
            }
            data.extend_from_slice(&record.rtype.to_be_bytes());
            data.extend_from_slice(&record.class.to_be_bytes());
            data.extend_from_slice(&record.ttl.to_be_bytes());
            data.extend_from_slice(&(record.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&record.rdata);
        }

        data
    }
}

fn translate_records(records: &[DohRecord]) -> Vec<WireRecord> {
    records
        .iter()
        .filter_map(|record| {
            let kind = RecordKind::from_code(record.rtype)?;
            let rdata = kind.encode_rdata(&record.data)?;
            Some(WireRecord {
                name: record.name.trim_end_matches('.').to_lowercase(),
                rtype: record.rtype,
                class: 1, // IN
                ttl: record.ttl,
                rdata,
            })
        })
        .collect()
}

fn encode_name(buf: &mut Vec<u8>, name: &str) {
    for label in name.trim_end_matches('.').split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}
