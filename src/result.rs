//! The immutable record of a completed (or stopped) traceroute run.
//!
//! Each hop's probe slots are a `Vec` sized to the run's `probes_per_hop`
//! rather than a fixed-size array, since that count is configurable per run
//! (up to a maximum of 8) rather than fixed at compile time.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::ErrorKind;

/// The outcome of a single probe slot within a hop.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// No response or timeout has been recorded yet. Never appears in a
    /// finished [`TracerouteResult`] — every slot reaches a terminal
    /// outcome before the run emits its result.
    Pending,
    /// A response was matched to this probe.
    Responded { router: IpAddr, rtt: Duration },
    /// The probe's deadline elapsed with no matching response.
    TimedOut,
    /// The probe's send failed.
    Errored { kind: ErrorKind },
}

impl ProbeOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// The per-hop record: one slot per probe sent at that hop's TTL/hop-limit.
#[derive(Debug, Clone, PartialEq)]
pub struct HopRecord {
    pub hop_number: u8,
    pub probes: Vec<ProbeOutcome>,
}

impl HopRecord {
    pub fn new(hop_number: u8, probes_per_hop: usize) -> Self {
        Self {
            hop_number,
            probes: vec![ProbeOutcome::Pending; probes_per_hop],
        }
    }

    /// A hop is complete when every slot is terminal (non-pending).
    pub fn is_complete(&self) -> bool {
        self.probes.iter().all(|p| !p.is_pending())
    }

    /// Whether any probe in this hop responded from `target`.
    pub fn reaches(&self, target: IpAddr) -> bool {
        self.probes.iter().any(|p| matches!(p, ProbeOutcome::Responded { router, .. } if *router == target))
    }
}

/// The immutable result of a completed traceroute run.
#[derive(Debug, Clone, PartialEq)]
pub struct TracerouteResult {
    pub target_name: String,
    pub target_address: SocketAddr,
    pub max_hops: u8,
    pub actual_hops: u8,
    pub total_time: Duration,
    pub hops: Vec<HopRecord>,
    pub reached_target: bool,
}
