//! The typed event stream delivered to the consumer.
//!
//! Progress is reported as one closed sum type dispatched through a single
//! handler, rather than a multi-method callback interface a consumer could
//! partially implement — there is exactly one way to receive every event,
//! and the compiler enforces that the match covers all of them.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::result::{HopRecord, ProbeOutcome, TracerouteResult};

/// One event in the stream a single engine run produces. Events for a given
/// engine are totally ordered and delivered on the engine's owning thread:
/// `ProbeSent(hop, k)` precedes any event for that probe, `HopCompleted(H)`
/// precedes the first `ProbeSent(H+1, _)`, and `Finished` is always last.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// The engine resolved its target and opened a socket.
    Started { address: SocketAddr },
    /// The engine failed to start or hit a terminal error; no further
    /// events follow for this engine's run.
    Failed { kind: ErrorKind, message: String },
    /// A probe datagram was sent.
    ProbeSent { hop: u8, sequence: u16 },
    /// A response was matched to an in-flight probe.
    ResponseReceived { hop: u8, rtt: Duration },
    /// A probe's deadline elapsed with no matching response.
    ProbeTimeout { hop: u8 },
    /// One probe slot within a hop reached a terminal outcome.
    HopProbeCompleted { hop: u8, outcome: ProbeOutcome },
    /// Every probe slot for a hop reached a terminal outcome.
    HopCompleted { record: HopRecord },
    /// The run reached the target or `max_hops`; this is always the last
    /// event emitted by a run that was not externally stopped.
    Finished { result: TracerouteResult },
}

/// The consumer interface: the engine calls `handle` once per event, on its
/// own thread, in the order described above.
pub trait EventSink {
    fn handle(&mut self, event: TraceEvent);
}

/// Adapts any `FnMut(TraceEvent)` closure into an [`EventSink`], so callers
/// can pass a closure instead of implementing the trait.
impl<F: FnMut(TraceEvent)> EventSink for F {
    fn handle(&mut self, event: TraceEvent) {
        self(event)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Collects every event delivered to it, for assertion in tests.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Vec<TraceEvent>,
    }

    impl EventSink for RecordingSink {
        fn handle(&mut self, event: TraceEvent) {
            self.events.push(event);
        }
    }
}
