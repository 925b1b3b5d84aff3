//! Socket style and lifecycle state.
//!
//! `SocketMode` is the RFC 6458 socket style chosen at creation;
//! `SocketState` is where a handle sits in its lifecycle.

use std::fmt;

/// RFC 6458 socket style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SocketMode {
    /// One handle, one association (`SOCK_STREAM`)
    #[default]
    OneToOne = 0,

    /// One handle demultiplexing many associations (`SOCK_SEQPACKET`)
    OneToMany = 1,
}

impl SocketMode {
    /// Get the socket mode as a string name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "one-to-one",
            Self::OneToMany => "one-to-many",
        }
    }

    /// Raw `SOCK_*` type used when creating the descriptor.
    #[must_use]
    pub const fn to_raw(self) -> i32 {
        match self {
            Self::OneToOne => libc::SOCK_STREAM,
            Self::OneToMany => libc::SOCK_SEQPACKET,
        }
    }
}

impl fmt::Display for SocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a socket handle.
///
/// `Unbound -> Bound -> {Listening | Connecting} -> Established -> Closed`.
/// A one-to-many handle goes straight to `Established` once bound and
/// subscribed; its associations are tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketState {
    Unbound = 0,
    Bound = 1,
    Listening = 2,
    Connecting = 3,
    Established = 4,
    Closed = 5,
}

impl SocketState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "UNBOUND",
            Self::Bound => "BOUND",
            Self::Listening => "LISTENING",
            Self::Connecting => "CONNECTING",
            Self::Established => "ESTABLISHED",
            Self::Closed => "CLOSED",
        }
    }

    /// Inverse of `as u8`; out-of-range values read as `Closed`.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unbound,
            1 => Self::Bound,
            2 => Self::Listening,
            3 => Self::Connecting,
            4 => Self::Established,
            _ => Self::Closed,
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unbound, Self::Bound)
                | (Self::Unbound, Self::Connecting)
                | (Self::Bound, Self::Listening)
                | (Self::Bound, Self::Connecting)
                | (Self::Bound, Self::Established)
                | (Self::Listening, Self::Established)
                | (Self::Connecting, Self::Established)
                | (Self::Connecting, Self::Bound)
                | (Self::Connecting, Self::Unbound)
                | (Self::Unbound, Self::Closed)
                | (Self::Bound, Self::Closed)
                | (Self::Listening, Self::Closed)
                | (Self::Connecting, Self::Closed)
                | (Self::Established, Self::Closed)
        )
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
