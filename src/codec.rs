//! Building Echo Request datagrams (RFC 792 for ICMPv4, RFC 4443 for
//! ICMPv6) and parsing returning ICMP messages, including the original
//! datagram embedded in Time Exceeded / Destination Unreachable payloads
//! that correlates an error back to the probe that caused it.

use std::net::Ipv6Addr;

use crate::checksum::{icmpv6_checksum, internet_checksum};

/// Which IP family a probe or response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

const ICMP_ECHO_REQUEST_V4: u8 = 8;
const ICMP_ECHO_REPLY_V4: u8 = 0;
const ICMP_TIME_EXCEEDED_V4: u8 = 11;
const ICMP_DEST_UNREACH_V4: u8 = 3;

const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_DEST_UNREACH: u8 = 1;

/// The minimum length of an Echo Request/Reply header (type, code, checksum,
/// identifier, sequence); the payload follows.
const ECHO_HEADER_LEN: usize = 8;

/// Addressing context needed to build a request. IPv6 needs the pseudo-header
/// addresses to compute its checksum; IPv4 needs none.
#[derive(Debug, Clone, Copy)]
pub enum RequestAddrs {
    V4,
    V6 { src: Ipv6Addr, dst: Ipv6Addr },
}

impl RequestAddrs {
    pub fn family(&self) -> AddressFamily {
        match self {
            Self::V4 => AddressFamily::V4,
            Self::V6 { .. } => AddressFamily::V6,
        }
    }
}

/// Builds an Echo Request datagram: type/code/checksum/identifier/sequence
/// followed by `payload`, with the checksum filled in last.
pub fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8], addrs: RequestAddrs) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ECHO_HEADER_LEN + payload.len());
    let echo_type = match addrs.family() {
        AddressFamily::V4 => ICMP_ECHO_REQUEST_V4,
        AddressFamily::V6 => ICMPV6_ECHO_REQUEST,
    };
    buf.push(echo_type);
    buf.push(0); // code
    buf.push(0); // checksum hi (placeholder)
    buf.push(0); // checksum lo (placeholder)
    buf.extend_from_slice(&identifier.to_be_bytes());
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(payload);

    let checksum = match addrs {
        RequestAddrs::V4 => internet_checksum(&buf),
        RequestAddrs::V6 { src, dst } => icmpv6_checksum(&src, &dst, &buf),
    };
    buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// The classification of a parsed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    EchoReply,
    TimeExceeded,
    DestUnreach,
    Other,
}

/// The result of successfully parsing a returning ICMP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedResponse {
    pub kind: ResponseKind,
    pub identifier_matches: bool,
    pub sequence: u16,
    pub icmp_code: u8,
}

/// Parses a raw datagram as received from the raw socket.
///
/// Returns `None` when the buffer is shorter than the minimum layout for its
/// declared kind — the caller discards the response in that case. Checksums
/// of incoming packets are not re-validated: the kernel has already verified
/// ICMPv6 checksums, and IPv4 checksum corruption is rare enough that an
/// unmatched or malformed probe already covers the failure mode.
pub fn parse_response(buf: &[u8], family: AddressFamily, identifier: u16) -> Option<ParsedResponse> {
    let icmp = match family {
        AddressFamily::V4 => strip_ipv4_header(buf)?,
        AddressFamily::V6 => buf,
    };

    if icmp.len() < 8 {
        return None;
    }
    let icmp_type = icmp[0];
    let icmp_code = icmp[1];

    let (kind, is_echo_reply) = match (family, icmp_type) {
        (AddressFamily::V4, ICMP_ECHO_REPLY_V4) => (ResponseKind::EchoReply, true),
        (AddressFamily::V4, ICMP_TIME_EXCEEDED_V4) if icmp_code == 0 => {
            (ResponseKind::TimeExceeded, false)
        }
        (AddressFamily::V4, ICMP_DEST_UNREACH_V4) => (ResponseKind::DestUnreach, false),
        (AddressFamily::V6, ICMPV6_ECHO_REPLY) => (ResponseKind::EchoReply, true),
        (AddressFamily::V6, ICMPV6_TIME_EXCEEDED) if icmp_code == 0 => {
            (ResponseKind::TimeExceeded, false)
        }
        (AddressFamily::V6, ICMPV6_DEST_UNREACH) => (ResponseKind::DestUnreach, false),
        _ => return Some(ParsedResponse {
            kind: ResponseKind::Other,
            identifier_matches: false,
            sequence: 0,
            icmp_code,
        }),
    };

    let (resp_identifier, sequence) = if is_echo_reply {
        (
            u16::from_be_bytes([icmp[4], icmp[5]]),
            u16::from_be_bytes([icmp[6], icmp[7]]),
        )
    } else {
        let (embedded_id, embedded_seq) = extract_embedded_echo(icmp, family)?;
        (embedded_id, embedded_seq)
    };

    Some(ParsedResponse {
        kind,
        identifier_matches: resp_identifier == identifier,
        sequence,
        icmp_code,
    })
}

/// Strips the IPv4 header (length = IHL * 4) from a raw-socket read. A raw
/// `AF_INET` socket on Linux hands back the IPv4 header along with the ICMP
/// payload; ICMPv6 sockets don't, since the kernel already strips it there.
fn strip_ipv4_header(buf: &[u8]) -> Option<&[u8]> {
    if buf.is_empty() {
        return None;
    }
    let ihl = ((buf[0] & 0x0f) as usize) * 4;
    if ihl < 20 || buf.len() < ihl {
        return None;
    }
    Some(&buf[ihl..])
}

/// Extracts `(identifier, sequence)` from the original Echo Request embedded
/// in a Time Exceeded / Destination Unreachable payload. The payload starting
/// at byte 8 of `icmp` is "original IP header + first 8 bytes of original
/// datagram"; strip that embedded IP header (IHL for v4, fixed 40 bytes for
/// v6) to reach the embedded Echo header.
fn extract_embedded_echo(icmp: &[u8], family: AddressFamily) -> Option<(u16, u16)> {
    let embedded = icmp.get(8..)?;
    let embedded_icmp = match family {
        AddressFamily::V4 => strip_ipv4_header(embedded)?,
        AddressFamily::V6 => embedded.get(40..)?,
    };
    if embedded_icmp.len() < 8 {
        return None;
    }
    let identifier = u16::from_be_bytes([embedded_icmp[4], embedded_icmp[5]]);
    let sequence = u16::from_be_bytes([embedded_icmp[6], embedded_icmp[7]]);
    Some((identifier, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_header(total_len: usize) -> Vec<u8> {
        let mut hdr = vec![0u8; 20];
        hdr[0] = 0x45; // version 4, IHL 5 (20 bytes)
        hdr[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        hdr
    }

    #[test]
    fn checksum_matches_precomputed_test_vector() {
        // id=0x1234, seq=0x0001, 16-byte zero payload. Checksum computed
        // offline over {08 00 00 00 12 34 00 01} ++ 16 zero bytes.
        let packet = build_echo_request(0x1234, 1, &[0u8; 16], RequestAddrs::V4);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 0xe5ca);
    }

    #[test]
    fn build_and_parse_echo_request_round_trips_v4() {
        let payload = vec![b'a'; 16];
        let packet = build_echo_request(0x1234, 1, &payload, RequestAddrs::V4);
        assert_eq!(packet.len(), 8 + payload.len());
        assert_eq!(packet[0], ICMP_ECHO_REQUEST_V4);

        // Checksum self-verifies: summing the completed packet folds to 0.
        assert_eq!(internet_checksum(&packet), 0);

        // Wrap as if echoed back (type becomes Echo Reply) and parse.
        let mut reply = packet.clone();
        reply[0] = ICMP_ECHO_REPLY_V4;
        let mut datagram = ipv4_header(reply.len());
        datagram.extend_from_slice(&reply);

        let parsed = parse_response(&datagram, AddressFamily::V4, 0x1234).unwrap();
        assert_eq!(parsed.kind, ResponseKind::EchoReply);
        assert!(parsed.identifier_matches);
        assert_eq!(parsed.sequence, 1);
    }

    #[test]
    fn build_and_parse_echo_request_round_trips_v6() {
        let src: Ipv6Addr = "::1".parse().unwrap();
        let dst: Ipv6Addr = "::1".parse().unwrap();
        let payload = b"abcdefgh".to_vec();
        let packet = build_echo_request(0xBEEF, 1, &payload, RequestAddrs::V6 { src, dst });
        assert_eq!(packet[0], ICMPV6_ECHO_REQUEST);
        assert_eq!(icmpv6_checksum(&src, &dst, &packet), 0);

        let mut reply = packet.clone();
        reply[0] = ICMPV6_ECHO_REPLY;
        let parsed = parse_response(&reply, AddressFamily::V6, 0xBEEF).unwrap();
        assert_eq!(parsed.kind, ResponseKind::EchoReply);
        assert!(parsed.identifier_matches);
        assert_eq!(parsed.sequence, 1);
    }

    #[test]
    fn parses_time_exceeded_with_embedded_datagram_v4() {
        let original = build_echo_request(0xAAAA, 7, &[0u8; 16], RequestAddrs::V4);
        let mut embedded = ipv4_header(original.len());
        embedded.extend_from_slice(&original[..8]); // only first 8 bytes preserved

        let mut icmp = vec![ICMP_TIME_EXCEEDED_V4, 0, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&embedded);

        let mut datagram = ipv4_header(icmp.len());
        datagram.extend_from_slice(&icmp);

        let parsed = parse_response(&datagram, AddressFamily::V4, 0xAAAA).unwrap();
        assert_eq!(parsed.kind, ResponseKind::TimeExceeded);
        assert!(parsed.identifier_matches);
        assert_eq!(parsed.sequence, 7);
    }

    #[test]
    fn parses_dest_unreach_with_embedded_datagram_v6() {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let original = build_echo_request(0x0102, 3, b"abcdefgh", RequestAddrs::V6 { src, dst });

        let mut icmp = vec![ICMPV6_DEST_UNREACH, 0, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&[0u8; 40]); // fixed IPv6 header
        icmp.extend_from_slice(&original[..8]);

        let parsed = parse_response(&icmp, AddressFamily::V6, 0x0102).unwrap();
        assert_eq!(parsed.kind, ResponseKind::DestUnreach);
        assert!(parsed.identifier_matches);
        assert_eq!(parsed.sequence, 3);
    }

    #[test]
    fn identifier_mismatch_is_reported_not_discarded() {
        let original = build_echo_request(0x1111, 1, &[0u8; 16], RequestAddrs::V4);
        let mut reply = original.clone();
        reply[0] = ICMP_ECHO_REPLY_V4;
        let mut datagram = ipv4_header(reply.len());
        datagram.extend_from_slice(&reply);

        let parsed = parse_response(&datagram, AddressFamily::V4, 0x1111 ^ 0xFFFF).unwrap();
        assert!(!parsed.identifier_matches);
    }

    #[test]
    fn truncated_buffer_is_discarded() {
        assert!(parse_response(&[0x45, 0, 0, 8], AddressFamily::V4, 0).is_none());
        assert!(parse_response(&[], AddressFamily::V6, 0).is_none());
    }

    #[test]
    fn unrecognized_type_is_other() {
        let mut icmp = vec![200u8, 0, 0, 0, 0, 0, 0, 0];
        let mut datagram = ipv4_header(icmp.len());
        datagram.append(&mut icmp);
        let parsed = parse_response(&datagram, AddressFamily::V4, 0).unwrap();
        assert_eq!(parsed.kind, ResponseKind::Other);
    }
}
