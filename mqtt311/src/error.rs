//! Error types for mqtt311.

use std::io;
use std::sync::Arc;

/// Result type alias for mqtt311.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level decoding and encoding faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Remaining length did not terminate within 4 bytes.
    #[error("malformed remaining length")]
    MalformedRemainingLength,

    /// Remaining length above 268,435,455.
    #[error("remaining length too large")]
    RemainingLengthTooLarge,

    /// A length-prefixed field exceeds 65,535 bytes.
    #[error("field too long: {0} bytes")]
    FieldTooLong(usize),

    /// Keep-alive does not fit in a 16-bit seconds field.
    #[error("keep alive too large: {0}s")]
    KeepAliveTooLarge(u64),
}

/// Error type for mqtt311 operations.
///
/// Errors are cloneable so one disconnect cause can be handed to the
/// connection observer, the pending `run` and every queued publish.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// IO error from the transport.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// CONNACK was missing, malformed or carried an unknown return code.
    #[error("invalid connect response")]
    InvalidConnectResponse,

    /// CONNACK return code 1.
    #[error("connection refused: unacceptable protocol version")]
    UnacceptableProtocolVersion,

    /// CONNACK return code 2.
    #[error("connection refused: identifier rejected")]
    IdentifierRejected,

    /// CONNACK return code 3.
    #[error("connection refused: server unavailable")]
    ServerUnavailable,

    /// CONNACK return code 4.
    #[error("connection refused: bad username or password")]
    BadUsernameOrPassword,

    /// CONNACK return code 5.
    #[error("connection refused: not authorized")]
    Unauthorized,

    /// Frame does not fit the output buffer.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The client was dropped with operations still pending.
    #[error("client aborted")]
    ClientAborted,

    /// The client was stopped.
    #[error("client stopped")]
    ClientStopped,

    /// The underlying socket disconnected.
    #[error("underlying socket disconnected")]
    SocketDisconnected,

    /// `run` was called on a client that is not idle.
    #[error("client already running")]
    AlreadyRunning,

    /// Attempted to read into a full read buffer.
    #[error("read buffer full")]
    ReadBufferFull,

    /// Output span is shorter than the encoded size.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl Error {
    /// Whether this is one of the CONNACK refusal codes.
    pub fn is_connection_refused(&self) -> bool {
        matches!(
            self,
            Error::UnacceptableProtocolVersion
                | Error::IdentifierRejected
                | Error::ServerUnavailable
                | Error::BadUsernameOrPassword
                | Error::Unauthorized
        )
    }
}
