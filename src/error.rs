//! Error types for the traceroute engine.

use std::io;

/// The classification of an error, as reported to the consumer via
/// [`crate::events::TraceEvent::Failed`] or recorded per-probe as
/// [`crate::result::ProbeOutcome::Errored`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Name resolution returned no address of the requested family.
    ResolutionFailed,
    /// Raw-socket creation was refused, most often for lack of privilege.
    SocketOpenFailed,
    /// A specific probe send returned a system error.
    SendFailed,
    /// A receive attempt failed transiently; treated as a zero-byte read and retried.
    ReceiveFailed,
    /// The response buffer was shorter than the minimum layout for its declared kind.
    MalformedResponse,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ResolutionFailed => "resolution_failed",
            Self::SocketOpenFailed => "socket_open_failed",
            Self::SendFailed => "send_failed",
            Self::ReceiveFailed => "receive_failed",
            Self::MalformedResponse => "malformed_response",
        };
        f.write_str(s)
    }
}

/// The library's error type.
///
/// Resolver and socket-open failures are terminal (they end a run); send
/// failures are per-probe and are folded into the hop's outcome instead of
/// propagating, since one bad send shouldn't abort a run that can still
/// make progress on its remaining probes.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to resolve target: {0}")]
    Resolution(#[source] anyhow::Error),

    #[error("failed to open raw socket: {0}")]
    SocketOpen(#[source] io::Error),

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
}

impl TraceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution(_) => ErrorKind::ResolutionFailed,
            Self::SocketOpen(_) => ErrorKind::SocketOpenFailed,
            Self::Send(_) => ErrorKind::SendFailed,
            Self::Receive(_) => ErrorKind::ReceiveFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
