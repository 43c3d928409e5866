//! A traceroute engine: raw-socket ICMP/ICMPv6 probing, IPv4/IPv6 packet
//! construction and parsing, and a hop-by-hop state machine that reports its
//! progress as a stream of typed events.
//!
//! Name resolution, event delegation, and any run-loop/thread integration
//! are the embedding application's concern; see [`Engine`] and [`Resolver`].

pub mod checksum;
pub mod codec;
pub mod engine;
pub mod error;
pub mod events;
pub mod resolver;
pub mod result;
pub mod table;
pub mod transport;

pub use engine::{Engine, EngineConfig, EngineHandle, EngineState};
pub use error::{ErrorKind, TraceError};
pub use events::{EventSink, TraceEvent};
pub use resolver::{AddressStyle, Resolver, SystemResolver};
pub use result::{HopRecord, ProbeOutcome, TracerouteResult};

pub use std::net::IpAddr;
pub use std::time::Duration;
