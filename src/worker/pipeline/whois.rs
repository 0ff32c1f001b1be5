//! Step 6: WHOIS ASN lookup (spec.md §4.3.1). Conditional — only runs when
//! step 4 (offline geo) yielded no ASN. Plain WHOIS-over-TCP (RFC 3912) to
//! ARIN's server, the same "speak the protocol directly" approach as
//! `reverse_dns`.

use crate::record::TrackingRecord;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const TIMEOUT: Duration = Duration::from_secs(3);
const WHOIS_HOST: &str = "whois.arin.org:43";

/// `_srv_whoisASN`, `_srv_whoisOrg`. No-op unless `_srv_mmASN` is absent.
pub async fn run(record: &TrackingRecord) -> TrackingRecord {
    if record.lookup("_srv_mmASN").is_some() {
        return record.clone();
    }

    match tokio::time::timeout(TIMEOUT, query_whois(&record.ip_address)).await {
        Ok(Ok(Some((asn, org)))) => record
            .with_enrichment("whoisASN", &asn)
            .with_enrichment("whoisOrg", &org),
        _ => record.clone(),
    }
}

async fn query_whois(ip: &str) -> std::io::Result<Option<(String, String)>> {
    let mut stream = TcpStream::connect(WHOIS_HOST).await?;
    stream.write_all(format!("n + {ip}\r\n").as_bytes()).await?;
    let mut body = String::new();
    stream.read_to_string(&mut body).await?;
    Ok(parse_whois_response(&body))
}

fn parse_whois_response(body: &str) -> Option<(String, String)> {
    let mut asn = None;
    let mut org = None;
    for line in body.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "originas" | "asnumber" => asn = Some(value),
            "orgname" | "owner" | "organization" => org = Some(value),
            _ => {}
        }
    }
    match (asn, org) {
        (Some(a), Some(o)) => Some((a, o)),
        (Some(a), None) => Some((a, String::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_originas_and_orgname_fields() {
        let body = "OrgName:    Example Org\nOriginAS:   AS15169\nNetRange: 1.2.3.0 - 1.2.3.255\n";
        let parsed = parse_whois_response(body);
        assert_eq!(parsed, Some(("AS15169".to_string(), "Example Org".to_string())));
    }

    #[test]
    fn missing_fields_yield_none() {
        assert_eq!(parse_whois_response("NetRange: 1.2.3.0 - 1.2.3.255\n"), None);
    }
}
