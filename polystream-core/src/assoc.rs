//! Association identifiers.

use std::fmt;

/// Kernel-assigned handle of one association inside a one-to-many socket.
///
/// Polystream never invents ids; it only carries the values the kernel
/// reports in notifications and ancillary data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct AssocId(pub i32);

impl AssocId {
    /// "No particular association" (one-to-one sockets, or future
    /// associations when used in socket options).
    pub const NONE: Self = Self(0);

    /// `SCTP_CURRENT_ASSOC`
    pub const CURRENT: Self = Self(1);

    /// `SCTP_ALL_ASSOC`
    pub const ALL: Self = Self(2);

    #[inline]
    pub const fn get(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<i32> for AssocId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
