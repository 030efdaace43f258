use crate::protocol::{FlowId, PeerAddress, SeqNo};
use thiserror::Error;

/// Errors that can occur in the link layer.
///
/// None of these are fatal: the offending frame or unit is discarded and the
/// affected flow keeps a consistent state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlcError {
    #[error("Queue capacity exceeded")]
    CapacityExceeded,
    /// The header is corrupt or the declared length does not match the frame.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unexpected fragment")]
    UnexpectedFragment,
    #[error("Sequence number {seq} outside of receive window starting at {expected}")]
    SequenceOutOfBounds { seq: SeqNo, expected: SeqNo },
    #[error("Retransmission limit exceeded for sequence number {seq}")]
    RetransmissionLimitExceeded { seq: SeqNo },
    /// The receiver stopped waiting for a missing sequence number.
    #[error("Sequence number {seq} skipped after the receive waiting time")]
    FrameSkipped { seq: SeqNo },
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerAddress),
    #[error("Unknown flow {0}")]
    UnknownFlow(FlowId),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while loading or storing an [`LlcConfig`](crate::config::LlcConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] LlcError),
}
