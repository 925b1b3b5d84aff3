//! Polystream Core
//!
//! This crate contains the transport-agnostic building blocks:
//! - Multi-homed address model and its text format (`address`)
//! - Association identifiers (`assoc`)
//! - Error taxonomy (`error`)
//! - Notification subscription mask (`events`)
//! - Socket style and lifecycle state (`mode`)
//! - Lifecycle event monitoring (`monitor`)
//! - Creation-time options and INIT parameters (`options`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
pub mod address;
pub mod assoc;
pub mod error;
pub mod events;
pub mod mode;
pub mod monitor;
pub mod options;

// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::address::{Address, AddressError, AddressFamily, HostAddr};
    pub use crate::assoc::AssocId;
    pub use crate::error::{Result, SctpError};
    pub use crate::events::EventMask;
    pub use crate::mode::{SocketMode, SocketState};
    pub use crate::monitor::{SocketEvent, SocketMonitor};
    pub use crate::options::{InitParameters, SctpOptions};
}
