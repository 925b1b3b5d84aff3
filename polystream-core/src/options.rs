//! Socket configuration options
//!
//! This module provides the creation-time configuration for SCTP handles:
//! the INIT parameters negotiated with peers plus the handle's own knobs
//! (style, blocking mode, subscriptions, buffer sizing).

use crate::events::EventMask;
use crate::mode::SocketMode;

/// Default read buffer size (8KB)
pub const DEFAULT_READ_BUF_SIZE: usize = 8192;

/// Default ancillary-data buffer size.
///
/// Room for a combined send/receive record plus receive-info and
/// next-info records, each with its control-message header.
pub const DEFAULT_CONTROL_BUF_SIZE: usize = 256;

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 128;

/// Association INIT parameters (`SCTP_INITMSG`).
///
/// Zero in any field means "use the endpoint default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InitParameters {
    /// Streams this endpoint wants to send on
    pub outbound_streams: u16,
    /// Maximum inbound streams this endpoint accepts
    pub max_inbound_streams: u16,
    /// INIT retransmissions before giving up
    pub max_init_attempts: u16,
    /// Upper bound for the INIT retransmission timeout, in milliseconds
    pub max_init_timeout_ms: u16,
}

impl InitParameters {
    pub const fn new() -> Self {
        Self {
            outbound_streams: 0,
            max_inbound_streams: 0,
            max_init_attempts: 0,
            max_init_timeout_ms: 0,
        }
    }

    /// Same count for outbound and maximum inbound streams.
    pub const fn with_streams(streams: u16) -> Self {
        Self {
            outbound_streams: streams,
            max_inbound_streams: streams,
            max_init_attempts: 0,
            max_init_timeout_ms: 0,
        }
    }

    pub const fn with_outbound_streams(mut self, n: u16) -> Self {
        self.outbound_streams = n;
        self
    }

    pub const fn with_max_inbound_streams(mut self, n: u16) -> Self {
        self.max_inbound_streams = n;
        self
    }

    pub const fn with_max_init_attempts(mut self, n: u16) -> Self {
        self.max_init_attempts = n;
        self
    }

    pub const fn with_max_init_timeout_ms(mut self, ms: u16) -> Self {
        self.max_init_timeout_ms = ms;
        self
    }

    /// All fields zero: the socket option call can be skipped.
    pub const fn is_default(&self) -> bool {
        self.outbound_streams == 0
            && self.max_inbound_streams == 0
            && self.max_init_attempts == 0
            && self.max_init_timeout_ms == 0
    }
}

/// Handle creation options.
///
/// # Examples
///
/// ```
/// use polystream_core::events::EventMask;
/// use polystream_core::mode::SocketMode;
/// use polystream_core::options::{InitParameters, SctpOptions};
///
/// let opts = SctpOptions::new()
///     .with_mode(SocketMode::OneToMany)
///     .with_init(InitParameters::with_streams(100))
///     .with_events(EventMask::DATA_IO | EventMask::ASSOCIATION)
///     .with_nonblocking(true);
/// assert_eq!(opts.init.outbound_streams, 100);
/// ```
#[derive(Debug, Clone)]
pub struct SctpOptions {
    /// INIT parameters, applied once before bind/connect
    pub init: InitParameters,

    /// Socket style; fixed for the handle's lifetime
    pub mode: SocketMode,

    /// Non-blocking I/O
    ///
    /// - `false` (default): calls wait for data, space, or a new association
    /// - `true`: calls return `SctpError::WouldBlock` instead of waiting
    pub nonblocking: bool,

    /// Initial event subscription. Empty selects data-I/O metadata only;
    /// one-to-many sockets always add association events.
    pub events: EventMask,

    /// Listen backlog
    pub backlog: i32,

    /// Read buffer size (bytes) used by the convenience readers
    pub read_buffer_size: usize,

    /// Ancillary-data buffer size (bytes) handed to each receive call
    pub control_buffer_size: usize,

    /// Disable Nagle-like bundling delay (`SCTP_NODELAY`)
    pub nodelay: bool,

    /// `SO_REUSEADDR` before bind
    pub reuse_address: bool,
}

impl Default for SctpOptions {
    fn default() -> Self {
        Self {
            init: InitParameters::new(),
            mode: SocketMode::OneToOne,
            nonblocking: false,
            events: EventMask::empty(),
            backlog: DEFAULT_BACKLOG,
            read_buffer_size: DEFAULT_READ_BUF_SIZE,
            control_buffer_size: DEFAULT_CONTROL_BUF_SIZE,
            nodelay: false,
            reuse_address: false,
        }
    }
}

impl SctpOptions {
    /// Create new socket options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init(mut self, init: InitParameters) -> Self {
        self.init = init;
        self
    }

    pub fn with_mode(mut self, mode: SocketMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }

    pub fn with_events(mut self, events: EventMask) -> Self {
        self.events = events;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set read buffer size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the ancillary-data buffer size. Values below the default are
    /// raised to it, since a receive record that does not fit is silently
    /// dropped by the kernel (`MSG_CTRUNC`).
    pub fn with_control_buffer_size(mut self, size: usize) -> Self {
        self.control_buffer_size = size.max(DEFAULT_CONTROL_BUF_SIZE);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SctpOptions::default();
        assert!(opts.init.is_default());
        assert_eq!(opts.mode, SocketMode::OneToOne);
        assert!(!opts.nonblocking);
        assert!(opts.events.is_empty());
        assert_eq!(opts.backlog, 128);
        assert_eq!(opts.read_buffer_size, 8192);
        assert_eq!(opts.control_buffer_size, DEFAULT_CONTROL_BUF_SIZE);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = SctpOptions::new()
            .with_mode(SocketMode::OneToMany)
            .with_backlog(16)
            .with_nodelay(true)
            .with_read_buffer_size(512);

        assert_eq!(opts.mode, SocketMode::OneToMany);
        assert_eq!(opts.backlog, 16);
        assert!(opts.nodelay);
        assert_eq!(opts.read_buffer_size, 512);
    }

    #[test]
    fn test_control_buffer_floor() {
        let opts = SctpOptions::new().with_control_buffer_size(8);
        assert_eq!(opts.control_buffer_size, DEFAULT_CONTROL_BUF_SIZE);

        let opts = SctpOptions::new().with_control_buffer_size(1024);
        assert_eq!(opts.control_buffer_size, 1024);
    }

    #[test]
    fn test_init_parameters() {
        let init = InitParameters::with_streams(100)
            .with_max_init_attempts(4)
            .with_max_init_timeout_ms(3000);
        assert_eq!(init.outbound_streams, 100);
        assert_eq!(init.max_inbound_streams, 100);
        assert_eq!(init.max_init_attempts, 4);
        assert_eq!(init.max_init_timeout_ms, 3000);
        assert!(!init.is_default());
        assert!(InitParameters::default().is_default());
    }
}
