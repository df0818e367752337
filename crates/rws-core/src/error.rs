use crate::message::CSeq;
use thiserror::Error;

/// Errors produced by the signalling layer.
///
/// Connection pumps treat any `Err` as a reason to close the socket;
/// [`SignalError::Terminated`] marks a deliberate, clean close and is
/// logged at debug rather than error level.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("parse error: {0}")]
    Parse(String),

    /// The start line named a method outside the supported set. Carries
    /// the CSeq when it was readable so a server pump can answer 501
    /// before closing.
    #[error("unknown method")]
    UnknownMethod { cseq: Option<CSeq> },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("peer error: {0}")]
    Peer(String),

    #[error("authorization failed: {0}")]
    Unauthorized(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Clean, deliberate end of a session (e.g. after TEARDOWN).
    #[error("session terminated")]
    Terminated,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignalError {
    /// Shorthand for a protocol violation with a formatted message.
    pub fn protocol(msg: impl Into<String>) -> SignalError {
        SignalError::Protocol(msg.into())
    }
}

pub type SignalResult<T> = Result<T, SignalError>;
