//! Fast enricher #1 (IP classification) and #5 (proxy-header IP extraction)
//! from spec.md §4.1.1. Both run synchronously in the request path and must
//! stay well under the microsecond budget — no allocation-heavy parsing,
//! just range containment checks over a small compiled set.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpType {
    Public,
    Private,
    Loopback,
    LinkLocal,
    Cgnat,
    Documentation,
    Multicast,
    Reserved,
    Benchmark,
}

impl IpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpType::Public => "public",
            IpType::Private => "private",
            IpType::Loopback => "loopback",
            IpType::LinkLocal => "link-local",
            IpType::Cgnat => "cgnat",
            IpType::Documentation => "documentation",
            IpType::Multicast => "multicast",
            IpType::Reserved => "reserved",
            IpType::Benchmark => "benchmark",
        }
    }

    /// `_srv_skipGeo`: non-public addresses gain nothing from a geo lookup.
    pub fn skip_geo(&self) -> bool {
        !matches!(self, IpType::Public)
    }
}

/// A compiled set of reserved/private ranges (RFC 1918, loopback, link-local,
/// CGNAT, documentation, multicast, reserved, benchmark — spec.md §4.1.1.1).
pub struct ReservedRanges {
    ranges: Vec<(IpNet, IpType)>,
}

impl Default for ReservedRanges {
    fn default() -> Self {
        let specs: &[(&str, IpType)] = &[
            ("10.0.0.0/8", IpType::Private),
            ("172.16.0.0/12", IpType::Private),
            ("192.168.0.0/16", IpType::Private),
            ("127.0.0.0/8", IpType::Loopback),
            ("::1/128", IpType::Loopback),
            ("169.254.0.0/16", IpType::LinkLocal),
            ("fe80::/10", IpType::LinkLocal),
            ("100.64.0.0/10", IpType::Cgnat),
            ("192.0.2.0/24", IpType::Documentation),
            ("198.51.100.0/24", IpType::Documentation),
            ("203.0.113.0/24", IpType::Documentation),
            ("2001:db8::/32", IpType::Documentation),
            ("224.0.0.0/4", IpType::Multicast),
            ("ff00::/8", IpType::Multicast),
            ("0.0.0.0/8", IpType::Reserved),
            ("240.0.0.0/4", IpType::Reserved),
            ("198.18.0.0/15", IpType::Benchmark),
        ];
        let ranges = specs
            .iter()
            .map(|(cidr, ty)| (IpNet::from_str(cidr).expect("static CIDR"), *ty))
            .collect();
        Self { ranges }
    }
}

impl ReservedRanges {
    pub fn classify(&self, ip: IpAddr) -> IpType {
        for (net, ty) in &self.ranges {
            if net.contains(&ip) {
                return *ty;
            }
        }
        IpType::Public
    }
}

/// Proxy-header IP extraction priority (spec.md §4.1.1.5, §6.1): trusts
/// exactly one upstream hop.
pub fn extract_client_ip(headers: &HeaderMap, peer_ip: Option<IpAddr>) -> Option<IpAddr> {
    for header_name in ["cf-connecting-ip", "true-client-ip", "x-real-ip"] {
        if let Some(v) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = v.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    if let Some(v) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = v.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    peer_ip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_private_and_public_ranges() {
        let ranges = ReservedRanges::default();
        assert_eq!(
            ranges.classify("10.1.2.3".parse().unwrap()),
            IpType::Private
        );
        assert_eq!(
            ranges.classify("8.8.8.8".parse().unwrap()),
            IpType::Public
        );
        assert_eq!(
            ranges.classify("127.0.0.1".parse().unwrap()),
            IpType::Loopback
        );
        assert_eq!(
            ranges.classify("100.64.1.1".parse().unwrap()),
            IpType::Cgnat
        );
    }

    #[test]
    fn skip_geo_true_for_everything_but_public() {
        assert!(!IpType::Public.skip_geo());
        assert!(IpType::Private.skip_geo());
    }

    #[test]
    fn proxy_header_priority_prefers_cf_connecting_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "1.1.1.1".parse().unwrap());
        headers.insert("x-forwarded-for", "2.2.2.2, 3.3.3.3".parse().unwrap());
        let ip = extract_client_ip(&headers, Some("9.9.9.9".parse().unwrap()));
        assert_eq!(ip, Some("1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_first_x_forwarded_for_token() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "2.2.2.2, 3.3.3.3".parse().unwrap());
        let ip = extract_client_ip(&headers, Some("9.9.9.9".parse().unwrap()));
        assert_eq!(ip, Some("2.2.2.2".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let ip = extract_client_ip(&headers, Some("9.9.9.9".parse().unwrap()));
        assert_eq!(ip, Some("9.9.9.9".parse().unwrap()));
    }
}
