//! Owns one raw ICMP/ICMPv6 socket and moves bytes on and off the wire.
//!
//! A traceroute run commits to one address family at construction, so one
//! [`ProbeSocket`] instance owns exactly one raw socket for the run's
//! lifetime rather than juggling a v4 and a v6 socket side by side.

use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::codec::AddressFamily;

/// The seam between the engine's hop loop and the network, so the hop loop
/// can be unit-tested without the `CAP_NET_RAW`/administrator privilege a
/// real raw socket requires. [`ProbeSocket`] is the production implementor.
pub trait Transport {
    /// Sets the per-send hop limit and transmits `buffer` to `destination`.
    /// The option is re-applied before each send to allow reuse across hops.
    fn send(&mut self, buffer: &[u8], destination: SocketAddr, ttl_or_hop_limit: u32) -> io::Result<()>;

    /// Waits up to `timeout` for one datagram. Returns `Ok(None)` on timeout.
    fn receive(&mut self, timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>>;

    /// The source address the kernel would route this socket's traffic
    /// from, used as the `src` half of the ICMPv6 pseudo-header when
    /// computing an outgoing packet's checksum. `V4` transports never call
    /// this, since the ICMPv4 checksum has no pseudo-header.
    fn local_source(&self) -> IpAddr;
}

/// One raw datagram socket for ICMP (v4) or ICMPv6 (v6).
pub struct ProbeSocket {
    socket: Socket,
    family: AddressFamily,
    local_source: IpAddr,
}

impl ProbeSocket {
    /// Opens a raw socket for `family`. For `V6`, connects to `destination`
    /// so the kernel selects an outbound source address via its routing
    /// table, then reads that address back with `getsockname` — the same
    /// "connect a connectionless socket to learn the route" trick real ping
    /// implementations use, since nothing else on this host can tell us
    /// which of our addresses the kernel would actually send from. `connect`
    /// on a raw socket only sets the default peer; `send_to` can still target
    /// a different address per call, so per-hop destinations are unaffected.
    pub fn open(family: AddressFamily, destination: SocketAddr) -> io::Result<Self> {
        let socket = match family {
            AddressFamily::V4 => Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?,
            AddressFamily::V6 => Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))?,
        };

        let local_source = match family {
            AddressFamily::V4 => IpAddr::V6(Ipv6Addr::UNSPECIFIED), // unused for V4
            AddressFamily::V6 => {
                socket.connect(&destination.into())?;
                match socket.local_addr()?.as_socket() {
                    Some(addr) => addr.ip(),
                    None => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                }
            }
        };

        Ok(Self { socket, family, local_source })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }
}

impl Transport for ProbeSocket {
    fn send(&mut self, buffer: &[u8], destination: SocketAddr, ttl_or_hop_limit: u32) -> io::Result<()> {
        match self.family {
            AddressFamily::V4 => self.socket.set_ttl(ttl_or_hop_limit)?,
            AddressFamily::V6 => self.socket.set_unicast_hops_v6(ttl_or_hop_limit)?,
        }
        self.socket.send_to(buffer, &destination.into())?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        // A zero timeout still needs to poll the socket once; socket2's
        // `set_read_timeout(Some(Duration::ZERO))` means "poll", which is
        // exactly the non-blocking single-read behavior we want here.
        self.socket.set_read_timeout(Some(timeout))?;

        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        match self.socket.recv_from(&mut buf) {
            Ok((len, sock_addr)) => {
                let bytes: Vec<u8> = buf[..len]
                    .iter()
                    .map(|b| unsafe { b.assume_init() })
                    .collect();
                let addr = sock_addr_to_std(&sock_addr, self.family)?;
                Ok(Some((bytes, addr)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn local_source(&self) -> IpAddr {
        self.local_source
    }
}

fn sock_addr_to_std(addr: &SockAddr, family: AddressFamily) -> io::Result<SocketAddr> {
    addr.as_socket().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("received address is not a valid {:?} socket address", family),
        )
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory transport pair for exercising the hop loop without a raw
    /// socket. `inbox` holds datagrams queued to be "received"; sends are
    /// recorded in `sent` for assertion.
    pub struct FakeTransport {
        pub sent: Vec<(Vec<u8>, SocketAddr, u32)>,
        pub inbox: VecDeque<(Vec<u8>, SocketAddr)>,
        pub local_source: IpAddr,
    }

    impl Default for FakeTransport {
        fn default() -> Self {
            Self {
                sent: Vec::new(),
                inbox: VecDeque::new(),
                local_source: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        }
    }

    impl Transport for FakeTransport {
        fn send(&mut self, buffer: &[u8], destination: SocketAddr, ttl_or_hop_limit: u32) -> io::Result<()> {
            self.sent.push((buffer.to_vec(), destination, ttl_or_hop_limit));
            Ok(())
        }

        fn receive(&mut self, _timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
            Ok(self.inbox.pop_front())
        }

        fn local_source(&self) -> IpAddr {
            self.local_source
        }
    }
}
