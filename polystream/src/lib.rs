//! # Polystream
//!
//! SCTP sockets for Rust, on the Linux kernel's SCTP stack.
//!
//! ## Features
//!
//! - **Multi-homing**: one address literal names several hosts
//!   (`10.0.0.1/10.0.1.1:5000`); the association fails over between paths
//! - **One-to-one and one-to-many** socket styles behind one handle type
//! - **Per-message metadata**: stream id, payload protocol id and flags on
//!   every send and receive
//! - **Notifications** decoded into a typed enum
//! - **Peel-off**: move one association of a one-to-many socket onto its own
//!   handle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use polystream::prelude::*;
//!
//! # #[compio::main]
//! # async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let addr: Address = "127.0.0.1:5000".parse()?;
//! let listener = SctpListener::listen(&addr, InitParameters::with_streams(10), SocketMode::OneToOne, false)?;
//!
//! let conn = listener.accept().await?;
//! let mut buf = vec![0u8; 8192];
//! loop {
//!     match conn.read_event(&mut buf).await? {
//!         Incoming::Data { len, metadata, .. } => {
//!             let stream = metadata.map_or(0, |m| m.stream);
//!             conn.write(&buf[..len], &MessageMetadata::new().with_stream(stream)).await?;
//!         }
//!         Incoming::Notification(n) => println!("notification: {n:?}"),
//!         Incoming::Partial { .. } => {}
//!     }
//! }
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `sctp` (default): kernel SCTP sockets

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export core types
pub use bytes::Bytes;
pub use polystream_core::{address, assoc, error, events, mode, monitor, options};
pub use polystream_core::address::{Address, AddressFamily};
pub use polystream_core::error::{Result, SctpError};

/// Kernel SCTP sockets.
#[cfg(feature = "sctp")]
pub mod sctp {
    pub use polystream_sctp::codec::{MessageMetadata, NextInfo, SendFlags};
    pub use polystream_sctp::notification::{AssociationState, Notification, PeerAddrState};
    pub use polystream_sctp::reassembly::{Assembled, MessageReassembler};
    pub use polystream_sctp::registry::{AssocEntry, AssociationRegistry, MAX_TOMBSTONES};
    pub use polystream_sctp::socket::{
        AssociationStatus, Incoming, PeerAddrInfo, ReadOutcome, RecvFlags, RtoInfo, SctpSocket,
    };
    pub use polystream_sctp::{SctpConnection, SctpListener};
}

pub mod dev_tracing;

/// Convenient imports.
///
/// ```rust
/// use polystream::prelude::*;
///
/// let addr: Address = "[fe80::1%eth0]:9000".parse().unwrap();
/// assert_eq!(addr.family(), AddressFamily::Ipv6);
/// ```
pub mod prelude {
    pub use polystream_core::prelude::*;

    #[cfg(feature = "sctp")]
    pub use crate::sctp::{
        Assembled, AssociationState, Incoming, MessageMetadata, MessageReassembler, Notification,
        ReadOutcome, SctpConnection, SctpListener, SctpSocket, SendFlags,
    };
}
