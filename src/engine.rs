//! Orchestrates the hop loop: schedules probes, consumes responses and
//! timeouts, decides termination, and emits events.
//!
//! One pass through the loop resolves the target, opens a socket, then
//! walks hops from 1 upward: send `probes_per_hop` Echo Requests at that
//! hop's TTL/hop-limit, collect responses until every probe for the hop is
//! either matched or has timed out, and stop once the target replies or
//! `max_hops` is reached. The loop owns its blocking I/O directly rather
//! than depending on an externally driven run loop, so it can be stopped
//! from another thread at any point between probes.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::codec::{self, AddressFamily, RequestAddrs, ResponseKind};
use crate::error::ErrorKind;
use crate::events::{EventSink, TraceEvent};
use crate::resolver::{pick_preferred, AddressStyle, Resolver};
use crate::result::{HopRecord, ProbeOutcome, TracerouteResult};
use crate::table::{InFlightProbe, ProbeTable};
use crate::transport::{ProbeSocket, Transport};

/// Default Echo Request payload: deterministic, at least 16 bytes, never
/// read back by the engine — its only purpose is to pad the probe to a
/// realistic size.
pub const DEFAULT_PAYLOAD: &[u8] = b"tracecore-probe!";

const MIN_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_PROBES_PER_HOP: usize = 8;
/// Upper bound on how long a single `receive` call blocks, so an external
/// `stop()` is noticed promptly even while a probe's deadline is still far
/// off.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Construction parameters for a traceroute run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host_name: String,
    pub address_style: AddressStyle,
    pub max_hops: u8,
    pub timeout_per_probe: Duration,
    pub probes_per_hop: usize,
    pub payload: Vec<u8>,
}

impl EngineConfig {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            ..Self::default()
        }
    }

    pub fn with_address_style(mut self, style: AddressStyle) -> Self {
        self.address_style = style;
        self
    }

    pub fn with_max_hops(mut self, max_hops: u8) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }

    pub fn with_timeout_per_probe(mut self, timeout: Duration) -> Self {
        self.timeout_per_probe = timeout.max(MIN_TIMEOUT);
        self
    }

    pub fn with_probes_per_hop(mut self, probes_per_hop: usize) -> Self {
        self.probes_per_hop = probes_per_hop.clamp(1, MAX_PROBES_PER_HOP);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            address_style: AddressStyle::Any,
            max_hops: 30,
            timeout_per_probe: Duration::from_secs(5),
            probes_per_hop: 3,
            payload: DEFAULT_PAYLOAD.to_vec(),
        }
    }
}

/// The engine's lifecycle state. `Failed` is reachable only from
/// `Resolving` (resolution or socket-open failure); every other run ends in
/// `Finished`, whether by reaching the target, exhausting `max_hops`, or an
/// external `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Resolving,
    Running,
    Finished,
    Failed,
}

/// A handle that can signal `stop()` from a different thread than the one
/// running the engine's hop loop. Stopping is synchronous from the caller's
/// perspective (the hop loop notices and tears down promptly) and
/// idempotent — calling it more than once has no additional effect.
#[derive(Clone)]
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

type TransportFactory =
    Box<dyn FnMut(AddressFamily, SocketAddr) -> std::io::Result<Box<dyn Transport>> + Send>;

fn default_transport_factory() -> TransportFactory {
    Box::new(|family, destination| {
        ProbeSocket::open(family, destination).map(|s| Box::new(s) as Box<dyn Transport>)
    })
}

/// Orchestrates one traceroute run. Single-use: calling `run` a second time
/// after `Finished`/`Failed` is a contract violation — construct a new
/// `Engine` for another run instead.
pub struct Engine {
    config: EngineConfig,
    resolver: Box<dyn Resolver>,
    open_transport: TransportFactory,
    state: EngineState,
    stop: Arc<AtomicBool>,
    identifier: u16,
}

impl Engine {
    /// Builds an engine with the production `ProbeSocket` transport and a
    /// freshly-generated random identifier.
    pub fn new(config: EngineConfig, resolver: impl Resolver + 'static) -> Self {
        Self::with_transport_factory(config, resolver, default_transport_factory())
    }

    fn with_transport_factory(
        config: EngineConfig,
        resolver: impl Resolver + 'static,
        open_transport: TransportFactory,
    ) -> Self {
        Self {
            config,
            resolver: Box::new(resolver),
            open_transport,
            state: EngineState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            identifier: rand::thread_rng().gen(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Runs the engine to completion (or until externally stopped),
    /// delivering events to `sink` in the order they occur: `Started`,
    /// then `ProbeSent`/`ResponseReceived`/`ProbeTimeout`/`HopProbeCompleted`
    /// per hop, then `HopCompleted` for that hop, and finally `Finished`
    /// once the target replies or `max_hops` is exhausted.
    pub fn run(&mut self, sink: &mut dyn EventSink) {
        assert_eq!(
            self.state,
            EngineState::Idle,
            "Engine::run called on an already-started engine"
        );

        self.state = EngineState::Resolving;
        if self.is_stopped() {
            self.state = EngineState::Finished;
            return;
        }

        let (target_addr, family) = match self.resolve_target() {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::warn!("traceroute resolution failed: {err}");
                self.state = EngineState::Failed;
                sink.handle(TraceEvent::Failed {
                    kind: ErrorKind::ResolutionFailed,
                    message: err.to_string(),
                });
                return;
            }
        };

        let mut transport = match (self.open_transport)(family, target_addr) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!("opening raw socket failed: {err}");
                self.state = EngineState::Failed;
                sink.handle(TraceEvent::Failed {
                    kind: ErrorKind::SocketOpenFailed,
                    message: err.to_string(),
                });
                return;
            }
        };

        tracing::info!("starting traceroute to {target_addr} ({family:?})");
        self.state = EngineState::Running;
        sink.handle(TraceEvent::Started { address: target_addr });

        let started_at = Instant::now();
        let mut sequence: u16 = 0;
        let mut current_hop: u8 = 1;
        let mut hops: Vec<HopRecord> = Vec::new();
        let mut reached_target = false;

        'hops: while current_hop <= self.config.max_hops {
            if self.is_stopped() {
                break 'hops;
            }

            let mut record = HopRecord::new(current_hop, self.config.probes_per_hop);
            let mut table = ProbeTable::new();
            let mut consecutive_send_failures = 0usize;

            for probe_index in 0..self.config.probes_per_hop {
                if self.is_stopped() {
                    break 'hops;
                }

                sequence += 1;
                let addrs = match (family, target_addr.ip()) {
                    (AddressFamily::V4, _) => RequestAddrs::V4,
                    (AddressFamily::V6, IpAddr::V6(dst)) => {
                        let src = match transport.local_source() {
                            IpAddr::V6(src) => src,
                            IpAddr::V4(_) => std::net::Ipv6Addr::UNSPECIFIED,
                        };
                        RequestAddrs::V6 { src, dst }
                    }
                    (AddressFamily::V6, IpAddr::V4(_)) => unreachable!("family/address mismatch"),
                };
                let packet = codec::build_echo_request(self.identifier, sequence, &self.config.payload, addrs);

                let now = Instant::now();
                match transport.send(&packet, target_addr, current_hop as u32) {
                    Ok(()) => {
                        consecutive_send_failures = 0;
                        table.insert(InFlightProbe {
                            sequence,
                            hop: current_hop,
                            probe_index,
                            sent_at: now,
                            deadline: now + self.config.timeout_per_probe,
                        });
                        tracing::debug!("sent probe hop={current_hop} seq={sequence}");
                        sink.handle(TraceEvent::ProbeSent {
                            hop: current_hop,
                            sequence,
                        });
                    }
                    Err(err) => {
                        tracing::debug!("send failed hop={current_hop} seq={sequence}: {err}");
                        record.probes[probe_index] = ProbeOutcome::Errored {
                            kind: ErrorKind::SendFailed,
                        };
                        consecutive_send_failures += 1;
                        if consecutive_send_failures >= self.config.probes_per_hop {
                            self.state = EngineState::Failed;
                            sink.handle(TraceEvent::Failed {
                                kind: ErrorKind::SendFailed,
                                message: format!("{consecutive_send_failures} consecutive send failures"),
                            });
                            return;
                        }
                    }
                }
            }

            let mut hop_reached_target = false;

            while !table.is_empty() {
                if self.is_stopped() {
                    break 'hops;
                }

                let now = Instant::now();
                let deadline = table.next_deadline().unwrap_or(now);
                let remaining = deadline.saturating_duration_since(now);
                let wait = remaining.min(STOP_POLL_INTERVAL);

                match transport.receive(wait) {
                    Ok(Some((buf, source))) => {
                        if self.handle_incoming(&buf, source, family, target_addr, &mut table, &mut record, sink) {
                            hop_reached_target = true;
                        }
                    }
                    Ok(None) => {
                        for expired in table.expire(Instant::now()) {
                            record.probes[expired.probe_index] = ProbeOutcome::TimedOut;
                            tracing::debug!("probe timed out hop={} seq={}", expired.hop, expired.sequence);
                            sink.handle(TraceEvent::ProbeTimeout { hop: expired.hop });
                        }
                    }
                    Err(err) => {
                        tracing::debug!("receive failed: {err}");
                        // Treated as a transient zero-byte read; the loop just retries
                        // until the probe's own deadline expires.
                    }
                }
            }

            if hop_reached_target {
                reached_target = true;
            }

            tracing::info!("hop {current_hop} complete");
            let record_for_event = record.clone();
            hops.push(record);
            sink.handle(TraceEvent::HopCompleted {
                record: record_for_event,
            });

            if reached_target || current_hop == self.config.max_hops {
                break 'hops;
            }
            current_hop += 1;
        }

        self.state = EngineState::Finished;

        if self.is_stopped() {
            tracing::info!("traceroute stopped externally");
            return;
        }

        let result = TracerouteResult {
            target_name: self.config.host_name.clone(),
            target_address: target_addr,
            max_hops: self.config.max_hops,
            actual_hops: hops.len() as u8,
            total_time: started_at.elapsed(),
            hops,
            reached_target,
        };
        tracing::info!(
            "traceroute finished: reached_target={reached_target} actual_hops={}",
            result.actual_hops
        );
        sink.handle(TraceEvent::Finished { result });
    }

    fn resolve_target(&self) -> anyhow::Result<(SocketAddr, AddressFamily)> {
        let addrs = self.resolver.resolve(&self.config.host_name, self.config.address_style)?;
        let chosen = pick_preferred(&addrs, self.config.address_style)
            .ok_or_else(|| anyhow::anyhow!("resolver returned no usable address"))?;
        let family = match chosen {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        };
        Ok((SocketAddr::new(chosen, 0), family))
    }

    /// Matches an incoming datagram to an in-flight probe and updates
    /// `record` accordingly. Returns whether this response means the target
    /// was reached — either an Echo Reply from the target itself, or a
    /// Destination Unreachable, which is treated the same way: the router
    /// reporting it is the effective end of the path, since further probing
    /// at the same or a higher TTL would only draw the same response.
    #[allow(clippy::too_many_arguments)]
    fn handle_incoming(
        &self,
        buf: &[u8],
        source: SocketAddr,
        family: AddressFamily,
        target_addr: SocketAddr,
        table: &mut ProbeTable,
        record: &mut HopRecord,
        sink: &mut dyn EventSink,
    ) -> bool {
        let parsed = match codec::parse_response(buf, family, self.identifier) {
            Some(p) => p,
            None => {
                tracing::debug!("malformed response discarded");
                return false;
            }
        };

        if parsed.kind == ResponseKind::Other || !parsed.identifier_matches {
            tracing::debug!(
                "discarding response: kind={:?} matches={}",
                parsed.kind,
                parsed.identifier_matches
            );
            return false;
        }

        let Some(probe) = table.match_probe(parsed.sequence) else {
            tracing::debug!("no in-flight probe for sequence {}", parsed.sequence);
            return false;
        };

        let rtt = Instant::now().saturating_duration_since(probe.sent_at);
        let outcome = ProbeOutcome::Responded {
            router: source.ip(),
            rtt,
        };
        record.probes[probe.probe_index] = outcome.clone();

        tracing::debug!("response hop={} rtt={:?} from={}", probe.hop, rtt, source.ip());
        sink.handle(TraceEvent::ResponseReceived { hop: probe.hop, rtt });
        sink.handle(TraceEvent::HopProbeCompleted {
            hop: probe.hop,
            outcome,
        });

        let is_target_reply = parsed.kind == ResponseKind::EchoReply && source.ip() == target_addr.ip();
        let is_dest_unreach = parsed.kind == ResponseKind::DestUnreach;
        is_target_reply || is_dest_unreach
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    impl Engine {
        /// Test-only constructor: fixes the identifier and injects a
        /// transport factory, so scenario tests can pre-seed exact
        /// `(identifier, sequence)` pairs in a
        /// [`crate::transport::test_support::FakeTransport`].
        pub fn new_for_test(
            config: EngineConfig,
            resolver: impl Resolver + 'static,
            identifier: u16,
            open_transport: TransportFactory,
        ) -> Self {
            let mut engine = Self::with_transport_factory(config, resolver, open_transport);
            engine.identifier = identifier;
            engine
        }
    }
}
