//! Error types for the IEC 60870-5 protocol stack.

use thiserror::Error;

/// Result type alias for IEC 60870-5 operations.
pub type Result<T> = std::result::Result<T, Iec60870Error>;

/// IEC 60870-5 protocol error types.
#[derive(Debug, Error)]
pub enum Iec60870Error {
    /// Value outside the domain of an information element or address field
    #[error("Domain error: {0}")]
    Domain(String),

    /// Invalid parameter set (field widths, timers, window sizes)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// Data transfer or link is not active
    #[error("Data transfer not active")]
    NotActive,

    /// Connection timeout
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid frame format (start/end byte, length, checksum)
    #[error("Invalid frame: {0}")]
    Framing(String),

    /// Invalid ASDU
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(String),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown COT: {0}")]
    UnknownCot(u8),

    /// T1 timeout (acknowledgment or confirmation not received)
    #[error("T1 timeout: no confirmation received")]
    T1Timeout,

    /// Serial link did not answer within the configured time
    #[error("Link timeout: {0}")]
    LinkTimeout(String),

    /// Confirmed user data was not acknowledged after all retries
    #[error("Retries exhausted for link address {address}")]
    RetriesExhausted {
        /// Link address of the secondary station
        address: u16,
    },

    /// Too many unconfirmed frames
    #[error("Too many unconfirmed frames (K={0})")]
    TooManyUnconfirmed(u16),

    /// Outbound queue is full
    #[error("Queue full")]
    QueueFull,

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

impl Iec60870Error {
    /// Create a domain error with a message.
    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }

    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a framing error.
    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    /// Create an invalid ASDU error.
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(msg.into())
    }

    /// Check if this error was raised while decoding received bytes.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::Framing(_) | Self::InvalidAsdu(_) | Self::UnknownTypeId(_) | Self::UnknownCot(_)
        )
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectionTimeout
                | Self::Io(_)
                | Self::T1Timeout
                | Self::ChannelClosed
        )
    }

    /// Check if this error is retryable without reopening the connection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TooManyUnconfirmed(_) | Self::QueueFull | Self::RetriesExhausted { .. }
        )
    }
}

/// Why a connection was closed, as reported by [`ConnectionEvent::Lost`].
///
/// [`ConnectionEvent::Lost`]: crate::connection::ConnectionEvent::Lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by the local application
    LocalClose,
    /// Remote end closed the byte stream
    RemoteClosed,
    /// No acknowledgment within T1
    T1Timeout,
    /// TESTFR con not received within T1 after a T3 test frame
    TestFrameTimeout,
    /// STARTDT or STOPDT confirmation missing
    HandshakeTimeout,
    /// Malformed frame received
    Framing(String),
    /// Protocol violation
    Protocol(String),
    /// Read or write failure
    Io(String),
}

impl CloseReason {
    /// Map a fatal error observed on the read or write path to a close reason.
    pub fn from_error(err: &Iec60870Error) -> Self {
        match err {
            Iec60870Error::Io(e) => Self::Io(e.to_string()),
            Iec60870Error::T1Timeout => Self::T1Timeout,
            Iec60870Error::NotConnected => Self::RemoteClosed,
            Iec60870Error::LinkTimeout(_) => Self::HandshakeTimeout,
            e if e.is_framing_error() => Self::Framing(e.to_string()),
            e => Self::Protocol(e.to_string()),
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalClose => f.write_str("closed locally"),
            Self::RemoteClosed => f.write_str("closed by peer"),
            Self::T1Timeout => f.write_str("T1 timeout"),
            Self::TestFrameTimeout => f.write_str("test frame timeout"),
            Self::HandshakeTimeout => f.write_str("handshake timeout"),
            Self::Framing(msg) => write!(f, "framing error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Iec60870Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected");

        let err = Iec60870Error::UnknownTypeId(255);
        assert_eq!(err.to_string(), "Unknown type ID: 255");

        let err = Iec60870Error::RetriesExhausted { address: 3 };
        assert_eq!(err.to_string(), "Retries exhausted for link address 3");
    }

    #[test]
    fn test_is_framing_error() {
        assert!(Iec60870Error::framing("bad checksum").is_framing_error());
        assert!(Iec60870Error::invalid_asdu("truncated").is_framing_error());
        assert!(Iec60870Error::UnknownCot(0).is_framing_error());
        assert!(!Iec60870Error::domain("range").is_framing_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Iec60870Error::NotConnected.is_connection_error());
        assert!(Iec60870Error::ConnectionTimeout.is_connection_error());
        assert!(Iec60870Error::T1Timeout.is_connection_error());
        assert!(!Iec60870Error::TooManyUnconfirmed(12).is_connection_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Iec60870Error::TooManyUnconfirmed(3).is_retryable());
        assert!(Iec60870Error::QueueFull.is_retryable());
        assert!(!Iec60870Error::NotConnected.is_retryable());
        assert!(!Iec60870Error::T1Timeout.is_retryable());
    }

    #[test]
    fn test_close_reason_from_error() {
        assert_eq!(
            CloseReason::from_error(&Iec60870Error::T1Timeout),
            CloseReason::T1Timeout
        );
        assert!(matches!(
            CloseReason::from_error(&Iec60870Error::framing("end byte")),
            CloseReason::Framing(_)
        ));
        assert!(matches!(
            CloseReason::from_error(&Iec60870Error::protocol("seq")),
            CloseReason::Protocol(_)
        ));
        assert_eq!(
            CloseReason::from_error(&Iec60870Error::NotConnected),
            CloseReason::RemoteClosed
        );
        assert_eq!(
            CloseReason::from_error(&Iec60870Error::LinkTimeout("reset".into())),
            CloseReason::HandshakeTimeout
        );
    }
}
