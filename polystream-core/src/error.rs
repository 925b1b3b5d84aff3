/// Polystream Error Types
///
/// One taxonomy for every socket-level failure, so callers can tell a
/// scheduling signal (would-block) from a dead association or a codec bug.

use std::io;
use thiserror::Error;

use crate::address::AddressError;
use crate::assoc::AssocId;
use crate::mode::SocketState;

/// Main error type for polystream operations
#[derive(Error, Debug)]
pub enum SctpError {
    /// Malformed address literal or inconsistent family
    #[error("Address format error: {0}")]
    AddressFormat(#[from] AddressError),

    /// Transport rejected bind/listen
    #[error("Bind to {address} failed: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Transport rejected the association attempt
    #[error("Connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Non-blocking call found no data or no buffer space
    #[error("Operation would block")]
    WouldBlock,

    /// Non-blocking connect has started but not completed
    #[error("Connect in progress")]
    InProgress,

    /// Association or descriptor is no longer usable
    #[error("Connection terminated: {0}")]
    Terminal(#[source] io::Error),

    /// Peer shut the association down
    #[error("End of stream")]
    EndOfStream,

    /// Buffer too short for the notification's fixed layout
    #[error("Truncated notification (type {tag:#06x}): need {needed} bytes, got {available}")]
    TruncatedNotification {
        tag: u16,
        needed: usize,
        available: usize,
    },

    /// Unknown tag or impossible field value in kernel-provided bytes
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Reassembled message outgrew the configured limit
    #[error("Message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// Association is not tracked as live on this socket
    #[error("Unknown association: {0}")]
    UnknownAssociation(AssocId),

    /// One-to-many write without an association id while several are live
    #[error("Association id required: {live} associations are live")]
    AmbiguousAssociation { live: usize },

    /// Operation not valid in the socket's current lifecycle state
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SocketState,
    },

    /// Socket closed
    #[error("Socket closed")]
    Closed,

    /// Any other IO error
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
}

/// Result type alias for polystream operations
pub type Result<T> = std::result::Result<T, SctpError>;

impl SctpError {
    /// Classify a raw transport error.
    pub fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::WouldBlock {
            return Self::WouldBlock;
        }
        if let Some(code) = err.raw_os_error() {
            if code == libc::EINPROGRESS {
                return Self::InProgress;
            }
            if matches!(code, libc::EBADF | libc::ESHUTDOWN) {
                return Self::Terminal(err);
            }
        }
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => Self::Terminal(err),
            _ => Self::Io(err),
        }
    }

    /// Wrap a bind failure with the address that was rejected.
    pub fn bind(address: impl ToString, source: io::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            source,
        }
    }

    /// Wrap a connect failure. `EINPROGRESS` is not a failure and maps to
    /// [`SctpError::InProgress`].
    pub fn connect(address: impl ToString, source: io::Error) -> Self {
        match source.raw_os_error() {
            Some(code) if code == libc::EINPROGRESS => Self::InProgress,
            _ => Self::Connect {
                address: address.to_string(),
                source,
            },
        }
    }

    /// Create a protocol decode error with a message
    pub fn protocol_decode(msg: impl Into<String>) -> Self {
        Self::ProtocolDecode(msg.into())
    }

    /// Scheduling signal: retry later, nothing is broken.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::InProgress)
    }

    /// The association or handle is finished; equivalent to end-of-stream
    /// for callers that only care about payload.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_) | Self::EndOfStream | Self::Closed)
    }

    /// Grow the read buffer and re-read.
    #[must_use]
    pub const fn is_retryable_decode(&self) -> bool {
        matches!(self, Self::TruncatedNotification { .. })
    }
}

impl From<io::Error> for SctpError {
    fn from(err: io::Error) -> Self {
        Self::from_io(err)
    }
}
