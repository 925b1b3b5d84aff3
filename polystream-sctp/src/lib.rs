//! # Polystream SCTP
//!
//! Linux SCTP socket API (RFC 6458) over the kernel's `IPPROTO_SCTP`.
//!
//! ## Overview
//!
//! - **One-to-one** (`SOCK_STREAM`): one association per handle, TCP-like
//!   `listen`/`accept`/`connect`
//! - **One-to-many** (`SOCK_SEQPACKET`): many associations on one handle,
//!   demultiplexed by association id, with peel-off to a one-to-one handle
//! - Per-message metadata (stream id, payload protocol id, flags) travels as
//!   ancillary data next to each payload
//! - Notifications arrive in-band on the data channel, flagged on receive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use polystream_sctp::prelude::*;
//!
//! # #[compio::main]
//! # async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let remote: Address = "10.0.0.1/10.0.1.1:5000".parse()?;
//! let conn = SctpConnection::new(
//!     remote.family(),
//!     InitParameters::with_streams(10),
//!     SocketMode::OneToOne,
//!     false,
//! )?;
//! conn.connect(&remote).await?;
//! conn.write(b"hello", &MessageMetadata::new().with_stream(7)).await?;
//!
//! let mut buf = [0u8; 1024];
//! let outcome = conn.read(&mut buf).await?;
//! println!("{} bytes on stream {:?}", outcome.len, outcome.metadata.map(|m| m.stream));
//! # Ok(())
//! # }
//! ```
//!
//! I/O runs on the compio runtime. A blocking handle awaits readiness; a
//! non-blocking one returns `WouldBlock` instead. A concurrent `close`
//! wakes every pending call.

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

// Internal modules (not part of public API)
mod descriptor;

pub mod codec;
pub mod notification;
pub mod reassembly;
pub mod registry;
pub mod sockaddr;
pub mod sys;

// Socket handles
pub mod connection;
pub mod listener;
pub mod socket;

// Re-export socket types for clean API
pub use codec::{MessageMetadata, SendFlags};
pub use connection::SctpConnection;
pub use listener::SctpListener;
pub use notification::{AssociationState, Notification, PeerAddrState};
pub use reassembly::{Assembled, MessageReassembler};
pub use registry::AssociationRegistry;
pub use socket::{
    AssociationStatus, Incoming, PeerAddrInfo, ReadOutcome, RecvFlags, RtoInfo, SctpSocket,
};

/// Convenient imports for SCTP sockets.
pub mod prelude {
    pub use super::{
        Assembled, AssociationState, Incoming, MessageMetadata, MessageReassembler, Notification,
        ReadOutcome, RecvFlags, SctpConnection, SctpListener, SctpSocket, SendFlags,
    };
    pub use polystream_core::prelude::*;
}
