//! Kernel notification decoder.
//!
//! Notifications arrive on the data channel with `MSG_NOTIFICATION` set.
//! Each record starts with a common header:
//!
//! ```text
//! +-----------+------------+----------------+---------------------+
//! | type: u16 | flags: u16 | length: u32    | type-specific body  |
//! +-----------+------------+----------------+---------------------+
//! ```
//!
//! [`Notification::decode`] is a pure function over bytes already read:
//! a buffer shorter than the variant's fixed layout is a
//! [`SctpError::TruncatedNotification`] (grow the buffer and re-read),
//! an unknown tag or impossible state value is a
//! [`SctpError::ProtocolDecode`].

use bytes::{Buf, Bytes};
use polystream_core::assoc::AssocId;
use polystream_core::error::{Result, SctpError};
use std::fmt;
use std::net::SocketAddr;

use crate::codec::{MessageMetadata, SendFlags};
use crate::sockaddr;
use crate::sys;

const HEADER_LEN: usize = 8;
const SOCKADDR_STORAGE_LEN: usize = 128;

const ASSOC_CHANGE_LEN: usize = 20;
const PADDR_CHANGE_LEN: usize = HEADER_LEN + SOCKADDR_STORAGE_LEN + 12;
const SEND_FAILED_LEN: usize = 48;
const REMOTE_ERROR_LEN: usize = 16;
const SHUTDOWN_EVENT_LEN: usize = 12;
const PDAPI_EVENT_LEN: usize = 24;
const ADAPTATION_EVENT_LEN: usize = 16;
const AUTHKEY_EVENT_LEN: usize = 20;
const SENDER_DRY_LEN: usize = 12;

/// `sac_state` of an association-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AssociationState {
    CommUp = sys::SCTP_COMM_UP,
    CommLost = sys::SCTP_COMM_LOST,
    Restart = sys::SCTP_RESTART,
    ShutdownComplete = sys::SCTP_SHUTDOWN_COMP,
    CantStartAssoc = sys::SCTP_CANT_STR_ASSOC,
}

impl AssociationState {
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            sys::SCTP_COMM_UP => Some(Self::CommUp),
            sys::SCTP_COMM_LOST => Some(Self::CommLost),
            sys::SCTP_RESTART => Some(Self::Restart),
            sys::SCTP_SHUTDOWN_COMP => Some(Self::ShutdownComplete),
            sys::SCTP_CANT_STR_ASSOC => Some(Self::CantStartAssoc),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CommUp => "COMM_UP",
            Self::CommLost => "COMM_LOST",
            Self::Restart => "RESTART",
            Self::ShutdownComplete => "SHUTDOWN_COMP",
            Self::CantStartAssoc => "CANT_STR_ASSOC",
        }
    }

    /// The association no longer exists after this event.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CommLost | Self::ShutdownComplete | Self::CantStartAssoc
        )
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `spc_state` of a peer-address-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PeerAddrState {
    Available = sys::SCTP_ADDR_AVAILABLE,
    Unreachable = sys::SCTP_ADDR_UNREACHABLE,
    Removed = sys::SCTP_ADDR_REMOVED,
    Added = sys::SCTP_ADDR_ADDED,
    MadePrimary = sys::SCTP_ADDR_MADE_PRIM,
    Confirmed = sys::SCTP_ADDR_CONFIRMED,
    PotentiallyFailed = sys::SCTP_ADDR_POTENTIALLY_FAILED,
}

impl PeerAddrState {
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            sys::SCTP_ADDR_AVAILABLE => Some(Self::Available),
            sys::SCTP_ADDR_UNREACHABLE => Some(Self::Unreachable),
            sys::SCTP_ADDR_REMOVED => Some(Self::Removed),
            sys::SCTP_ADDR_ADDED => Some(Self::Added),
            sys::SCTP_ADDR_MADE_PRIM => Some(Self::MadePrimary),
            sys::SCTP_ADDR_CONFIRMED => Some(Self::Confirmed),
            sys::SCTP_ADDR_POTENTIALLY_FAILED => Some(Self::PotentiallyFailed),
            _ => None,
        }
    }
}

/// A decoded kernel event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AssociationChange {
        state: AssociationState,
        error: u16,
        outbound_streams: u16,
        inbound_streams: u16,
        assoc_id: AssocId,
    },
    PeerAddressChange {
        /// `None` if the kernel left the address unset
        address: Option<SocketAddr>,
        state: PeerAddrState,
        error: i32,
        assoc_id: AssocId,
    },
    SendFailed {
        error: u32,
        /// Metadata of the message that was not delivered
        info: MessageMetadata,
        assoc_id: AssocId,
        /// Undelivered payload bytes present in this record
        data: Bytes,
    },
    RemoteError {
        /// Cause code reported by the peer
        error: u16,
        assoc_id: AssocId,
        /// Raw ERROR chunk causes
        data: Bytes,
    },
    Shutdown {
        assoc_id: AssocId,
    },
    PartialDelivery {
        indication: u32,
        assoc_id: AssocId,
        stream: u32,
        sequence: u32,
    },
    AdaptationIndication {
        indication: u32,
        assoc_id: AssocId,
    },
    Authentication {
        key_number: u16,
        alt_key_number: u16,
        indication: u32,
        assoc_id: AssocId,
    },
    SenderDry {
        assoc_id: AssocId,
    },
}

/// Fixed length for each known tag.
const fn required_len(tag: u16) -> Option<usize> {
    match tag {
        sys::SCTP_ASSOC_CHANGE => Some(ASSOC_CHANGE_LEN),
        sys::SCTP_PEER_ADDR_CHANGE => Some(PADDR_CHANGE_LEN),
        sys::SCTP_SEND_FAILED => Some(SEND_FAILED_LEN),
        sys::SCTP_REMOTE_ERROR => Some(REMOTE_ERROR_LEN),
        sys::SCTP_SHUTDOWN_EVENT => Some(SHUTDOWN_EVENT_LEN),
        sys::SCTP_PARTIAL_DELIVERY_EVENT => Some(PDAPI_EVENT_LEN),
        sys::SCTP_ADAPTATION_INDICATION => Some(ADAPTATION_EVENT_LEN),
        sys::SCTP_AUTHENTICATION_EVENT => Some(AUTHKEY_EVENT_LEN),
        sys::SCTP_SENDER_DRY_EVENT => Some(SENDER_DRY_LEN),
        _ => None,
    }
}

impl Notification {
    /// Decode one notification record.
    ///
    /// # Examples
    ///
    /// ```
    /// use polystream_sctp::notification::{AssociationState, Notification};
    /// use polystream_core::assoc::AssocId;
    ///
    /// let mut buf = Vec::new();
    /// buf.extend_from_slice(&0x8001u16.to_ne_bytes()); // SCTP_ASSOC_CHANGE
    /// buf.extend_from_slice(&0u16.to_ne_bytes());
    /// buf.extend_from_slice(&20u32.to_ne_bytes());
    /// buf.extend_from_slice(&0u16.to_ne_bytes()); // COMM_UP
    /// buf.extend_from_slice(&0u16.to_ne_bytes());
    /// buf.extend_from_slice(&10u16.to_ne_bytes());
    /// buf.extend_from_slice(&10u16.to_ne_bytes());
    /// buf.extend_from_slice(&5i32.to_ne_bytes());
    ///
    /// let n = Notification::decode(&buf).unwrap();
    /// assert_eq!(n.assoc_id(), AssocId(5));
    /// assert!(matches!(n, Notification::AssociationChange { state: AssociationState::CommUp, .. }));
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(SctpError::TruncatedNotification {
                tag: 0,
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        let tag = u16::from_ne_bytes([buf[0], buf[1]]);
        let needed = required_len(tag).ok_or_else(|| {
            SctpError::protocol_decode(format!("unknown notification type {tag:#06x}"))
        })?;
        if buf.len() < needed {
            return Err(SctpError::TruncatedNotification {
                tag,
                needed,
                available: buf.len(),
            });
        }

        // Trailing variable data is bounded by the record's own length.
        let declared = u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let record_end = declared.clamp(needed, buf.len());

        let mut body = &buf[HEADER_LEN..];
        let notification = match tag {
            sys::SCTP_ASSOC_CHANGE => {
                let raw_state = body.get_u16_ne();
                let state = AssociationState::from_raw(raw_state).ok_or_else(|| {
                    SctpError::protocol_decode(format!("association state {raw_state}"))
                })?;
                Self::AssociationChange {
                    state,
                    error: body.get_u16_ne(),
                    outbound_streams: body.get_u16_ne(),
                    inbound_streams: body.get_u16_ne(),
                    assoc_id: AssocId(body.get_i32_ne()),
                }
            }
            sys::SCTP_PEER_ADDR_CHANGE => {
                let address = sockaddr::decode_storage(&body[..SOCKADDR_STORAGE_LEN])?;
                body.advance(SOCKADDR_STORAGE_LEN);
                let raw_state = body.get_i32_ne();
                let state = PeerAddrState::from_raw(raw_state).ok_or_else(|| {
                    SctpError::protocol_decode(format!("peer address state {raw_state}"))
                })?;
                Self::PeerAddressChange {
                    address,
                    state,
                    error: body.get_i32_ne(),
                    assoc_id: AssocId(body.get_i32_ne()),
                }
            }
            sys::SCTP_SEND_FAILED => {
                let error = body.get_u32_ne();
                let info = decode_sndrcvinfo(&mut body);
                Self::SendFailed {
                    error,
                    info,
                    assoc_id: AssocId(body.get_i32_ne()),
                    data: Bytes::copy_from_slice(&buf[SEND_FAILED_LEN..record_end]),
                }
            }
            sys::SCTP_REMOTE_ERROR => {
                // sre_error is in network byte order
                let error = body.get_u16();
                body.advance(2);
                Self::RemoteError {
                    error,
                    assoc_id: AssocId(body.get_i32_ne()),
                    data: Bytes::copy_from_slice(&buf[REMOTE_ERROR_LEN..record_end]),
                }
            }
            sys::SCTP_SHUTDOWN_EVENT => Self::Shutdown {
                assoc_id: AssocId(body.get_i32_ne()),
            },
            sys::SCTP_PARTIAL_DELIVERY_EVENT => Self::PartialDelivery {
                indication: body.get_u32_ne(),
                assoc_id: AssocId(body.get_i32_ne()),
                stream: body.get_u32_ne(),
                sequence: body.get_u32_ne(),
            },
            sys::SCTP_ADAPTATION_INDICATION => Self::AdaptationIndication {
                indication: body.get_u32_ne(),
                assoc_id: AssocId(body.get_i32_ne()),
            },
            sys::SCTP_AUTHENTICATION_EVENT => Self::Authentication {
                key_number: body.get_u16_ne(),
                alt_key_number: body.get_u16_ne(),
                indication: body.get_u32_ne(),
                assoc_id: AssocId(body.get_i32_ne()),
            },
            _ => Self::SenderDry {
                assoc_id: AssocId(body.get_i32_ne()),
            },
        };

        Ok(notification)
    }

    /// Association the event refers to.
    pub fn assoc_id(&self) -> AssocId {
        match self {
            Self::AssociationChange { assoc_id, .. }
            | Self::PeerAddressChange { assoc_id, .. }
            | Self::SendFailed { assoc_id, .. }
            | Self::RemoteError { assoc_id, .. }
            | Self::Shutdown { assoc_id }
            | Self::PartialDelivery { assoc_id, .. }
            | Self::AdaptationIndication { assoc_id, .. }
            | Self::Authentication { assoc_id, .. }
            | Self::SenderDry { assoc_id } => *assoc_id,
        }
    }

    /// Kernel type tag of this variant.
    pub const fn tag(&self) -> u16 {
        match self {
            Self::AssociationChange { .. } => sys::SCTP_ASSOC_CHANGE,
            Self::PeerAddressChange { .. } => sys::SCTP_PEER_ADDR_CHANGE,
            Self::SendFailed { .. } => sys::SCTP_SEND_FAILED,
            Self::RemoteError { .. } => sys::SCTP_REMOTE_ERROR,
            Self::Shutdown { .. } => sys::SCTP_SHUTDOWN_EVENT,
            Self::PartialDelivery { .. } => sys::SCTP_PARTIAL_DELIVERY_EVENT,
            Self::AdaptationIndication { .. } => sys::SCTP_ADAPTATION_INDICATION,
            Self::Authentication { .. } => sys::SCTP_AUTHENTICATION_EVENT,
            Self::SenderDry { .. } => sys::SCTP_SENDER_DRY_EVENT,
        }
    }
}

fn decode_sndrcvinfo(body: &mut &[u8]) -> MessageMetadata {
    let stream = body.get_u16_ne();
    let ssn = body.get_u16_ne();
    let flags = SendFlags::from_bits_retain(body.get_u16_ne());
    body.advance(2);
    MessageMetadata {
        stream,
        ssn,
        flags,
        ppid: body.get_u32_ne(),
        context: body.get_u32_ne(),
        time_to_live: body.get_u32_ne(),
        tsn: body.get_u32_ne(),
        cumulative_tsn: body.get_u32_ne(),
        assoc_id: AssocId(body.get_i32_ne()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn header(tag: u16, len: usize) -> BytesMut {
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u16_ne(tag);
        buf.put_u16_ne(0);
        buf.put_u32_ne(len as u32);
        buf
    }

    fn assoc_change(state: u16, assoc: i32) -> BytesMut {
        let mut buf = header(sys::SCTP_ASSOC_CHANGE, ASSOC_CHANGE_LEN);
        buf.put_u16_ne(state);
        buf.put_u16_ne(0);
        buf.put_u16_ne(10);
        buf.put_u16_ne(12);
        buf.put_i32_ne(assoc);
        buf
    }

    #[test]
    fn test_assoc_change_comm_up() {
        let buf = assoc_change(sys::SCTP_COMM_UP, 42);
        let n = Notification::decode(&buf).unwrap();
        assert_eq!(
            n,
            Notification::AssociationChange {
                state: AssociationState::CommUp,
                error: 0,
                outbound_streams: 10,
                inbound_streams: 12,
                assoc_id: AssocId(42),
            }
        );
        assert_eq!(n.assoc_id(), AssocId(42));
        assert_eq!(n.tag(), sys::SCTP_ASSOC_CHANGE);
    }

    #[test]
    fn test_truncated_is_distinct() {
        let buf = assoc_change(sys::SCTP_COMM_UP, 42);
        for cut in [2, 8, 12, 19] {
            match Notification::decode(&buf[..cut]) {
                Err(SctpError::TruncatedNotification {
                    tag,
                    needed,
                    available,
                }) => {
                    assert_eq!(tag, sys::SCTP_ASSOC_CHANGE);
                    assert_eq!(needed, ASSOC_CHANGE_LEN);
                    assert_eq!(available, cut);
                }
                other => panic!("cut {cut}: expected truncation, got {other:?}"),
            }
        }
        assert!(Notification::decode(&[0x01]).unwrap_err().is_retryable_decode());
    }

    #[test]
    fn test_unknown_tag_and_state() {
        let buf = header(0x7fff, 8);
        assert!(matches!(
            Notification::decode(&buf),
            Err(SctpError::ProtocolDecode(_))
        ));

        let buf = assoc_change(9, 1);
        let err = Notification::decode(&buf).unwrap_err();
        assert!(matches!(err, SctpError::ProtocolDecode(_)));
        assert!(!err.is_retryable_decode());
    }

    #[test]
    fn test_peer_addr_change() {
        let addr: SocketAddr = "10.0.0.2:3868".parse().unwrap();
        let mut buf = header(sys::SCTP_PEER_ADDR_CHANGE, PADDR_CHANGE_LEN);
        let mut storage = BytesMut::new();
        sockaddr::encode(&addr, &mut storage);
        storage.resize(SOCKADDR_STORAGE_LEN, 0);
        buf.extend_from_slice(&storage);
        buf.put_i32_ne(sys::SCTP_ADDR_UNREACHABLE);
        buf.put_i32_ne(110);
        buf.put_i32_ne(3);
        assert_eq!(buf.len(), 148);

        let n = Notification::decode(&buf).unwrap();
        assert_eq!(
            n,
            Notification::PeerAddressChange {
                address: Some(addr),
                state: PeerAddrState::Unreachable,
                error: 110,
                assoc_id: AssocId(3),
            }
        );
    }

    #[test]
    fn test_send_failed_carries_payload() {
        let mut buf = header(sys::SCTP_SEND_FAILED, SEND_FAILED_LEN + 5);
        buf.put_u32_ne(1);
        // sctp_sndrcvinfo
        buf.put_u16_ne(7);
        buf.put_u16_ne(0);
        buf.put_u16_ne(sys::SCTP_UNORDERED);
        buf.put_u16_ne(0);
        buf.put_u32_ne(99);
        buf.put_u32_ne(0);
        buf.put_u32_ne(250);
        buf.put_u32_ne(0);
        buf.put_u32_ne(0);
        buf.put_i32_ne(4);
        // ssf_assoc_id
        buf.put_i32_ne(4);
        buf.put_slice(b"hello");

        match Notification::decode(&buf).unwrap() {
            Notification::SendFailed {
                error,
                info,
                assoc_id,
                data,
            } => {
                assert_eq!(error, 1);
                assert_eq!(info.stream, 7);
                assert_eq!(info.ppid, 99);
                assert_eq!(info.time_to_live, 250);
                assert!(info.flags.contains(SendFlags::UNORDERED));
                assert_eq!(assoc_id, AssocId(4));
                assert_eq!(&data[..], b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fixed_size_events() {
        let mut buf = header(sys::SCTP_SHUTDOWN_EVENT, SHUTDOWN_EVENT_LEN);
        buf.put_i32_ne(8);
        assert_eq!(
            Notification::decode(&buf).unwrap(),
            Notification::Shutdown { assoc_id: AssocId(8) }
        );

        let mut buf = header(sys::SCTP_PARTIAL_DELIVERY_EVENT, PDAPI_EVENT_LEN);
        buf.put_u32_ne(0);
        buf.put_i32_ne(8);
        buf.put_u32_ne(3);
        buf.put_u32_ne(17);
        assert_eq!(
            Notification::decode(&buf).unwrap(),
            Notification::PartialDelivery {
                indication: 0,
                assoc_id: AssocId(8),
                stream: 3,
                sequence: 17,
            }
        );

        let mut buf = header(sys::SCTP_AUTHENTICATION_EVENT, AUTHKEY_EVENT_LEN);
        buf.put_u16_ne(1);
        buf.put_u16_ne(2);
        buf.put_u32_ne(3);
        buf.put_i32_ne(8);
        assert_eq!(
            Notification::decode(&buf).unwrap(),
            Notification::Authentication {
                key_number: 1,
                alt_key_number: 2,
                indication: 3,
                assoc_id: AssocId(8),
            }
        );

        let mut buf = header(sys::SCTP_SENDER_DRY_EVENT, SENDER_DRY_LEN);
        buf.put_i32_ne(8);
        assert_eq!(
            Notification::decode(&buf).unwrap(),
            Notification::SenderDry { assoc_id: AssocId(8) }
        );

        let mut buf = header(sys::SCTP_ADAPTATION_INDICATION, ADAPTATION_EVENT_LEN);
        buf.put_u32_ne(0x0102_0304);
        buf.put_i32_ne(8);
        assert_eq!(
            Notification::decode(&buf).unwrap(),
            Notification::AdaptationIndication {
                indication: 0x0102_0304,
                assoc_id: AssocId(8),
            }
        );
    }

    #[test]
    fn test_remote_error_bounded_by_declared_length() {
        let mut buf = header(sys::SCTP_REMOTE_ERROR, REMOTE_ERROR_LEN + 4);
        // Cause 1 (invalid stream identifier), big-endian on the wire
        buf.put_u16(0x0001);
        buf.put_u16_ne(0);
        buf.put_i32_ne(6);
        buf.put_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
        // Trailing garbage beyond sre_length
        buf.put_slice(&[0xee; 8]);

        match Notification::decode(&buf).unwrap() {
            Notification::RemoteError { error, assoc_id, data } => {
                assert_eq!(error, 1);
                assert_eq!(assoc_id, AssocId(6));
                assert_eq!(&data[..], &[0xaa, 0xbb, 0xcc, 0xdd]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_remote_error_cause_is_network_order() {
        let mut buf = header(sys::SCTP_REMOTE_ERROR, REMOTE_ERROR_LEN);
        buf.put_slice(&[0x00, 0x0c]);
        buf.put_u16_ne(0);
        buf.put_i32_ne(2);

        match Notification::decode(&buf).unwrap() {
            Notification::RemoteError { error, data, .. } => {
                assert_eq!(error, 12);
                assert!(data.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(AssociationState::CommLost.is_terminal());
        assert!(AssociationState::ShutdownComplete.is_terminal());
        assert!(AssociationState::CantStartAssoc.is_terminal());
        assert!(!AssociationState::CommUp.is_terminal());
        assert!(!AssociationState::Restart.is_terminal());
    }
}
