//! Socket event monitoring.
//!
//! Provides event streams for tracking socket and association lifecycle
//! events like binds, accepted associations, peel-offs, and close.

use crate::address::Address;
use crate::assoc::AssocId;
use std::fmt;

/// Socket lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Socket bound to a (possibly multi-homed) local address.
    Bound(Address),

    /// Socket is listening for incoming associations.
    Listening(Address),

    /// Association established to a remote address.
    Connected(Address),

    /// One-to-one listener accepted an association.
    Accepted(Address),

    /// One-to-many socket observed a new association.
    AssociationUp(AssocId),

    /// One-to-many socket observed an association going away.
    AssociationDown(AssocId),

    /// Association moved to its own descriptor.
    PeeledOff(AssocId),

    /// Descriptor released.
    Closed,
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound(addr) => write!(f, "Bound to {addr}"),
            Self::Listening(addr) => write!(f, "Listening on {addr}"),
            Self::Connected(addr) => write!(f, "Connected to {addr}"),
            Self::Accepted(addr) => write!(f, "Accepted association from {addr}"),
            Self::AssociationUp(id) => write!(f, "Association {id} up"),
            Self::AssociationDown(id) => write!(f, "Association {id} down"),
            Self::PeeledOff(id) => write!(f, "Association {id} peeled off"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// Handle for receiving socket events.
pub type SocketMonitor = flume::Receiver<SocketEvent>;

/// Sender half held by the socket.
pub type SocketEventSender = flume::Sender<SocketEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (SocketEventSender, SocketMonitor) {
    flume::unbounded()
}
