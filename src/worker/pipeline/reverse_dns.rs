//! Step 3: reverse DNS (spec.md §4.3.1). A hand-rolled minimal PTR query over
//! UDP — the corpus carries no DNS-resolver crate, so this follows the same
//! "speak the wire protocol directly over a raw socket" approach `ipc.rs`
//! uses for the Edge↔Worker handoff, just for DNS instead of the line
//! protocol. 2s timeout per spec.md §4.3.1/§5.

use crate::record::TrackingRecord;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

const TIMEOUT: Duration = Duration::from_secs(2);
const CLOUD_HOSTNAME_MARKERS: &[&str] = &[
    "amazonaws.com",
    "googleusercontent.com",
    "azure.com",
    "cloudfront.net",
    "digitalocean.com",
    "linode.com",
    "ovh.net",
    "hetzner.com",
];

/// `_srv_rdns`, `_srv_rdnsCloud`.
pub async fn run(record: &TrackingRecord, resolver: IpAddr) -> TrackingRecord {
    let Ok(ip) = record.ip_address.parse::<IpAddr>() else {
        return record.clone();
    };

    match tokio::time::timeout(TIMEOUT, query_ptr(ip, resolver)).await {
        Ok(Ok(Some(hostname))) => {
            let is_cloud = CLOUD_HOSTNAME_MARKERS.iter().any(|m| hostname.ends_with(m));
            record
                .with_enrichment("rdns", &hostname)
                .with_enrichment("rdnsCloud", if is_cloud { "1" } else { "0" })
        }
        Ok(Ok(None)) | Ok(Err(_)) | Err(_) => record.clone(),
    }
}

fn ptr_query_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let mut labels = Vec::with_capacity(32);
            for segment in v6.segments().iter().rev() {
                for nibble_shift in [0, 4, 8, 12] {
                    labels.push(format!("{:x}", (segment >> nibble_shift) & 0xf));
                }
            }
            format!("{}.ip6.arpa", labels.join("."))
        }
    }
}

async fn query_ptr(ip: IpAddr, resolver: IpAddr) -> std::io::Result<Option<String>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((resolver, 53)).await?;

    let name = ptr_query_name(ip);
    let packet = encode_ptr_query(&name);
    socket.send(&packet).await?;

    let mut buf = [0u8; 512];
    let len = socket.recv(&mut buf).await?;
    Ok(decode_ptr_answer(&buf[..len]))
}

fn encode_ptr_query(name: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(64);
    packet.extend_from_slice(&[0x13, 0x37]); // transaction id
    packet.extend_from_slice(&[0x01, 0x00]); // standard query, recursion desired
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT = 1
    packet.extend_from_slice(&[0x00u8; 6]); // ANCOUNT/NSCOUNT/ARCOUNT = 0
    for label in name.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0x00); // root label
    packet.extend_from_slice(&[0x00, 0x0c]); // QTYPE = PTR
    packet.extend_from_slice(&[0x00, 0x01]); // QCLASS = IN
    packet
}

/// Minimal PTR-record RDATA decoder: finds the answer section and follows
/// compression pointers just enough to reconstruct the hostname. Returns
/// `None` on any malformed or NXDOMAIN response rather than erroring.
fn decode_ptr_answer(buf: &[u8]) -> Option<String> {
    if buf.len() < 12 {
        return None;
    }
    let ancount = u16::from_be_bytes([buf[6], buf[7]]);
    if ancount == 0 {
        return None;
    }

    let mut pos = 12usize;
    // skip the question section: one name + QTYPE + QCLASS
    pos = skip_name(buf, pos)?;
    pos += 4;

    // first answer record
    pos = skip_name(buf, pos)?;
    if buf.len() < pos + 10 {
        return None;
    }
    let rdlength = u16::from_be_bytes([buf[pos + 8], buf[pos + 9]]) as usize;
    pos += 10;
    if buf.len() < pos + rdlength {
        return None;
    }
    decode_name(buf, pos)
}

fn skip_name(buf: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *buf.get(pos)?;
        if len == 0 {
            return Some(pos + 1);
        }
        if len & 0xc0 == 0xc0 {
            return Some(pos + 2);
        }
        pos += 1 + len as usize;
        if pos >= buf.len() {
            return None;
        }
    }
}

fn decode_name(buf: &[u8], start: usize) -> Option<String> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut jumps = 0;
    loop {
        if jumps > 10 {
            return None;
        }
        let len = *buf.get(pos)? as usize;
        if len == 0 {
            break;
        }
        if len & 0xc0 == 0xc0 {
            let pointer = (((len & 0x3f) as usize) << 8) | (*buf.get(pos + 1)? as usize);
            pos = pointer;
            jumps += 1;
            continue;
        }
        let label = buf.get(pos + 1..pos + 1 + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += 1 + len;
    }
    Some(labels.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_query_name_reverses_ipv4_octets() {
        let ip: IpAddr = "8.8.4.4".parse().unwrap();
        assert_eq!(ptr_query_name(ip), "4.4.8.8.in-addr.arpa");
    }

    #[test]
    fn cloud_marker_detects_aws_hostnames() {
        let hostname = "ec2-1-2-3-4.compute-1.amazonaws.com";
        assert!(CLOUD_HOSTNAME_MARKERS.iter().any(|m| hostname.ends_with(m)));
    }
}
