//! Notification subscription mask.

use bitflags::bitflags;

bitflags! {
    /// Event classes a socket can subscribe to (`SCTP_EVENTS`).
    ///
    /// `DATA_IO` is not a notification: it turns on per-message ancillary
    /// data on receive, without which reads carry no stream/association info.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u16 {
        const DATA_IO          = 1 << 0;
        const ASSOCIATION      = 1 << 1;
        const ADDRESS          = 1 << 2;
        const SEND_FAILURE     = 1 << 3;
        const PEER_ERROR       = 1 << 4;
        const SHUTDOWN         = 1 << 5;
        const PARTIAL_DELIVERY = 1 << 6;
        const ADAPTATION_LAYER = 1 << 7;
        const AUTHENTICATION   = 1 << 8;
        const SENDER_DRY       = 1 << 9;

        const ALL = Self::DATA_IO.bits()
            | Self::ASSOCIATION.bits()
            | Self::ADDRESS.bits()
            | Self::SEND_FAILURE.bits()
            | Self::PEER_ERROR.bits()
            | Self::SHUTDOWN.bits()
            | Self::PARTIAL_DELIVERY.bits()
            | Self::ADAPTATION_LAYER.bits()
            | Self::AUTHENTICATION.bits()
            | Self::SENDER_DRY.bits();
    }
}

impl EventMask {
    /// Number of subscribable classes, in kernel subscription order.
    pub const CLASSES: usize = 10;

    /// One on/off byte per class, in the order of `sctp_event_subscribe`.
    #[must_use]
    pub fn subscription_bytes(self) -> [u8; Self::CLASSES] {
        let mut out = [0u8; Self::CLASSES];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = u8::from(self.bits() & (1 << i) != 0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_bytes_order() {
        let mask = EventMask::DATA_IO | EventMask::ASSOCIATION;
        assert_eq!(mask.subscription_bytes(), [1, 1, 0, 0, 0, 0, 0, 0, 0, 0]);

        let dry = EventMask::SENDER_DRY;
        assert_eq!(dry.subscription_bytes()[9], 1);
        assert_eq!(dry.subscription_bytes().iter().map(|b| u32::from(*b)).sum::<u32>(), 1);

        assert_eq!(EventMask::ALL.subscription_bytes(), [1; 10]);
        assert_eq!(EventMask::empty().subscription_bytes(), [0; 10]);
    }
}
