//! Internet checksum (RFC 1071) and the ICMPv6 pseudo-header.

use std::net::Ipv6Addr;

/// Computes the Internet checksum over `data`: sum 16-bit big-endian words,
/// fold carries into the low 16 bits, then take the one's complement. An odd
/// trailing byte is padded with a zero low byte.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = *chunks.remainder() {
        sum += (last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// The ICMPv6 upper-layer protocol number (RFC 4443), used as `next_header`
/// in the pseudo-header.
pub const IPPROTO_ICMPV6: u8 = 58;

/// Computes the checksum of an ICMPv6 message including its pseudo-header,
/// per RFC 4443 §2.3 / RFC 8200 §8.1: {src addr (16), dst addr (16),
/// upper-layer length (4, big-endian), zeros (3), next-header (1)} followed
/// by the message itself.
pub fn icmpv6_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, message: &[u8]) -> u16 {
    let mut buf = Vec::with_capacity(40 + message.len());
    buf.extend_from_slice(&src.octets());
    buf.extend_from_slice(&dst.octets());
    buf.extend_from_slice(&(message.len() as u32).to_be_bytes());
    buf.extend_from_slice(&[0, 0, 0]);
    buf.push(IPPROTO_ICMPV6);
    buf.extend_from_slice(message);
    internet_checksum(&buf)
}
