//! Ancillary-data (control message) codec.
//!
//! Every send and receive on an SCTP socket can carry per-message metadata
//! as `cmsghdr` records at level `IPPROTO_SCTP`. This module encodes the
//! records the send path attaches and decodes what the kernel hands back:
//!
//! ```text
//! +-----------------+-------+------+-----------------+---------+
//! | cmsg_len (size) | level | type | record          | padding |
//! +-----------------+-------+------+-----------------+---------+
//!  <--------- CMSG_HDR_LEN ------->  <- record len ->  to usize
//! ```
//!
//! Records are native-endian and follow the kernel struct layout exactly
//! (see [`crate::sys`]). An empty control buffer is not an error: it means
//! the message carried no metadata, which is the normal case for
//! notifications and for sockets without data-I/O events enabled.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use polystream_core::assoc::AssocId;
use polystream_core::error::{Result, SctpError};
use polystream_core::options::InitParameters;
use smallvec::SmallVec;
use std::mem::size_of;

use crate::sys;

bitflags! {
    /// Per-message flags (`sinfo_flags` / `snd_flags` / `rcv_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SendFlags: u16 {
        /// Deliver without regard to stream sequence
        const UNORDERED        = sys::SCTP_UNORDERED;
        /// Send to the address in `msg_name`, overriding the primary path
        const ADDR_OVER        = sys::SCTP_ADDR_OVER;
        /// Abort the association
        const ABORT            = sys::SCTP_ABORT;
        /// Ask the peer to SACK immediately
        const SACK_IMMEDIATELY = sys::SCTP_SACK_IMMEDIATELY;
        /// One-to-many: send to every association
        const SENDALL          = sys::SCTP_SENDALL;
        /// Graceful shutdown after this message
        const EOF              = sys::SCTP_EOF;
    }
}

const CMSG_ALIGN_TO: usize = size_of::<usize>();

#[inline]
const fn cmsg_align(len: usize) -> usize {
    (len + CMSG_ALIGN_TO - 1) & !(CMSG_ALIGN_TO - 1)
}

/// Aligned `cmsghdr` size.
pub const CMSG_HDR_LEN: usize = cmsg_align(size_of::<libc::cmsghdr>());

/// `CMSG_LEN`: header plus unpadded record.
#[inline]
pub const fn cmsg_len(record: usize) -> usize {
    CMSG_HDR_LEN + record
}

/// `CMSG_SPACE`: header plus padded record.
#[inline]
pub const fn cmsg_space(record: usize) -> usize {
    CMSG_HDR_LEN + cmsg_align(record)
}

pub const INITMSG_LEN: usize = 8;
pub const SNDRCVINFO_LEN: usize = 32;
pub const SNDINFO_LEN: usize = 16;
pub const RCVINFO_LEN: usize = 28;
pub const NXTINFO_LEN: usize = 16;

/// Control space needed for one outgoing message.
pub const SEND_CONTROL_LEN: usize = cmsg_space(SNDRCVINFO_LEN);

/// Per-message metadata.
///
/// On send, `stream`, `flags`, `ppid`, `context`, `time_to_live` and
/// `assoc_id` are honoured; the kernel fills `ssn`, `tsn` and
/// `cumulative_tsn` on receive. The payload protocol id is carried
/// opaquely (the kernel does not reorder its bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageMetadata {
    pub stream: u16,
    pub ssn: u16,
    pub flags: SendFlags,
    pub ppid: u32,
    pub context: u32,
    pub time_to_live: u32,
    pub tsn: u32,
    pub cumulative_tsn: u32,
    pub assoc_id: AssocId,
}

impl MessageMetadata {
    pub const fn new() -> Self {
        Self {
            stream: 0,
            ssn: 0,
            flags: SendFlags::empty(),
            ppid: 0,
            context: 0,
            time_to_live: 0,
            tsn: 0,
            cumulative_tsn: 0,
            assoc_id: AssocId::NONE,
        }
    }

    pub const fn with_stream(mut self, stream: u16) -> Self {
        self.stream = stream;
        self
    }

    pub const fn with_ppid(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }

    pub const fn with_flags(mut self, flags: SendFlags) -> Self {
        self.flags = flags;
        self
    }

    pub const fn with_context(mut self, context: u32) -> Self {
        self.context = context;
        self
    }

    /// Partial-reliability lifetime in milliseconds; 0 means reliable.
    pub const fn with_time_to_live(mut self, ms: u32) -> Self {
        self.time_to_live = ms;
        self
    }

    pub const fn with_assoc(mut self, assoc_id: AssocId) -> Self {
        self.assoc_id = assoc_id;
        self
    }
}

/// Look-ahead information about the next queued message (`SCTP_NXTINFO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NextInfo {
    pub stream: u16,
    pub flags: u16,
    pub ppid: u32,
    pub length: u32,
    pub assoc_id: AssocId,
}

/// One decoded `IPPROTO_SCTP` ancillary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// `SCTP_INIT`: INIT parameters for an implicitly set-up association
    Init(InitParameters),
    /// `SCTP_SNDRCV`: combined send/receive record
    SndRcv(MessageMetadata),
    /// `SCTP_SNDINFO`: send-only record (no lifetime, no sequence fields)
    SndInfo(MessageMetadata),
    /// `SCTP_RCVINFO`: receive-only record
    RcvInfo(MessageMetadata),
    /// `SCTP_NXTINFO`: next message look-ahead
    NxtInfo(NextInfo),
}

impl ControlMessage {
    const fn kind(&self) -> libc::c_int {
        match self {
            Self::Init(_) => sys::SCTP_INIT,
            Self::SndRcv(_) => sys::SCTP_SNDRCV,
            Self::SndInfo(_) => sys::SCTP_SNDINFO,
            Self::RcvInfo(_) => sys::SCTP_RCVINFO,
            Self::NxtInfo(_) => sys::SCTP_NXTINFO,
        }
    }

    const fn record_len(&self) -> usize {
        match self {
            Self::Init(_) => INITMSG_LEN,
            Self::SndRcv(_) => SNDRCVINFO_LEN,
            Self::SndInfo(_) => SNDINFO_LEN,
            Self::RcvInfo(_) => RCVINFO_LEN,
            Self::NxtInfo(_) => NXTINFO_LEN,
        }
    }

    /// Receive metadata carried by this record, if any.
    pub const fn metadata(&self) -> Option<&MessageMetadata> {
        match self {
            Self::SndRcv(m) | Self::RcvInfo(m) => Some(m),
            _ => None,
        }
    }
}

/// Append `msg` (header, record, padding) to `out`.
pub fn encode(msg: &ControlMessage, out: &mut BytesMut) {
    let record = msg.record_len();
    out.reserve(cmsg_space(record));
    let start = out.len();

    out.put_slice(&cmsg_len(record).to_ne_bytes());
    out.put_i32_ne(sys::IPPROTO_SCTP);
    out.put_i32_ne(msg.kind());
    out.put_bytes(0, CMSG_HDR_LEN - (out.len() - start));

    match msg {
        ControlMessage::Init(init) => {
            out.put_u16_ne(init.outbound_streams);
            out.put_u16_ne(init.max_inbound_streams);
            out.put_u16_ne(init.max_init_attempts);
            out.put_u16_ne(init.max_init_timeout_ms);
        }
        ControlMessage::SndRcv(m) => {
            out.put_u16_ne(m.stream);
            out.put_u16_ne(m.ssn);
            out.put_u16_ne(m.flags.bits());
            out.put_u16_ne(0);
            out.put_u32_ne(m.ppid);
            out.put_u32_ne(m.context);
            out.put_u32_ne(m.time_to_live);
            out.put_u32_ne(m.tsn);
            out.put_u32_ne(m.cumulative_tsn);
            out.put_i32_ne(m.assoc_id.get());
        }
        ControlMessage::SndInfo(m) => {
            out.put_u16_ne(m.stream);
            out.put_u16_ne(m.flags.bits());
            out.put_u32_ne(m.ppid);
            out.put_u32_ne(m.context);
            out.put_i32_ne(m.assoc_id.get());
        }
        ControlMessage::RcvInfo(m) => {
            out.put_u16_ne(m.stream);
            out.put_u16_ne(m.ssn);
            out.put_u16_ne(m.flags.bits());
            out.put_u16_ne(0);
            out.put_u32_ne(m.ppid);
            out.put_u32_ne(m.tsn);
            out.put_u32_ne(m.cumulative_tsn);
            out.put_u32_ne(m.context);
            out.put_i32_ne(m.assoc_id.get());
        }
        ControlMessage::NxtInfo(n) => {
            out.put_u16_ne(n.stream);
            out.put_u16_ne(n.flags);
            out.put_u32_ne(n.ppid);
            out.put_u32_ne(n.length);
            out.put_i32_ne(n.assoc_id.get());
        }
    }

    out.put_bytes(0, cmsg_space(record) - (out.len() - start));
}

/// Encode the send-side record for one outgoing message.
pub fn encode_send(meta: &MessageMetadata, out: &mut BytesMut) {
    encode(&ControlMessage::SndRcv(*meta), out);
}

/// Decode every `IPPROTO_SCTP` record in `buf`.
///
/// Records at other levels are skipped. An unknown SCTP record type or a
/// record shorter than its fixed layout is a [`SctpError::ProtocolDecode`].
pub fn decode_all(buf: &[u8]) -> Result<SmallVec<[ControlMessage; 2]>> {
    let mut out = SmallVec::new();
    let mut rest = buf;

    while rest.len() >= CMSG_HDR_LEN {
        let mut hdr = rest;
        let len = read_usize(&mut hdr);
        let level = hdr.get_i32_ne();
        let kind = hdr.get_i32_ne();

        if len < CMSG_HDR_LEN || len > rest.len() {
            return Err(SctpError::protocol_decode(format!(
                "cmsg length {len} outside [{CMSG_HDR_LEN}, {}]",
                rest.len()
            )));
        }

        if level == sys::IPPROTO_SCTP {
            out.push(decode_record(kind, &rest[CMSG_HDR_LEN..len])?);
        }

        rest = &rest[cmsg_align(len).min(rest.len())..];
    }

    Ok(out)
}

/// Receive metadata from `buf`, or `None` if it carries none.
///
/// A combined send/receive record wins over a receive-info record when the
/// kernel attaches both.
pub fn decode_control(buf: &[u8]) -> Result<Option<MessageMetadata>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let records = decode_all(buf)?;
    let sndrcv = records.iter().find_map(|r| match r {
        ControlMessage::SndRcv(m) => Some(*m),
        _ => None,
    });
    Ok(sndrcv.or_else(|| records.iter().find_map(|r| r.metadata().copied())))
}

fn read_usize(buf: &mut &[u8]) -> usize {
    let mut raw = [0u8; size_of::<usize>()];
    buf.copy_to_slice(&mut raw);
    usize::from_ne_bytes(raw)
}

fn decode_record(kind: libc::c_int, mut data: &[u8]) -> Result<ControlMessage> {
    let needed = match kind {
        sys::SCTP_INIT => INITMSG_LEN,
        sys::SCTP_SNDRCV => SNDRCVINFO_LEN,
        sys::SCTP_SNDINFO => SNDINFO_LEN,
        sys::SCTP_RCVINFO => RCVINFO_LEN,
        sys::SCTP_NXTINFO => NXTINFO_LEN,
        other => {
            return Err(SctpError::protocol_decode(format!(
                "unknown SCTP control message type {other}"
            )))
        }
    };
    if data.len() < needed {
        return Err(SctpError::protocol_decode(format!(
            "control message type {kind}: need {needed} bytes, got {}",
            data.len()
        )));
    }

    let msg = match kind {
        sys::SCTP_INIT => ControlMessage::Init(InitParameters {
            outbound_streams: data.get_u16_ne(),
            max_inbound_streams: data.get_u16_ne(),
            max_init_attempts: data.get_u16_ne(),
            max_init_timeout_ms: data.get_u16_ne(),
        }),
        sys::SCTP_SNDRCV => {
            let stream = data.get_u16_ne();
            let ssn = data.get_u16_ne();
            let flags = SendFlags::from_bits_retain(data.get_u16_ne());
            data.advance(2);
            ControlMessage::SndRcv(MessageMetadata {
                stream,
                ssn,
                flags,
                ppid: data.get_u32_ne(),
                context: data.get_u32_ne(),
                time_to_live: data.get_u32_ne(),
                tsn: data.get_u32_ne(),
                cumulative_tsn: data.get_u32_ne(),
                assoc_id: AssocId(data.get_i32_ne()),
            })
        }
        sys::SCTP_SNDINFO => ControlMessage::SndInfo(MessageMetadata {
            stream: data.get_u16_ne(),
            flags: SendFlags::from_bits_retain(data.get_u16_ne()),
            ppid: data.get_u32_ne(),
            context: data.get_u32_ne(),
            assoc_id: AssocId(data.get_i32_ne()),
            ..MessageMetadata::new()
        }),
        sys::SCTP_RCVINFO => {
            let stream = data.get_u16_ne();
            let ssn = data.get_u16_ne();
            let flags = SendFlags::from_bits_retain(data.get_u16_ne());
            data.advance(2);
            ControlMessage::RcvInfo(MessageMetadata {
                stream,
                ssn,
                flags,
                ppid: data.get_u32_ne(),
                tsn: data.get_u32_ne(),
                cumulative_tsn: data.get_u32_ne(),
                context: data.get_u32_ne(),
                assoc_id: AssocId(data.get_i32_ne()),
                time_to_live: 0,
            })
        }
        _ => ControlMessage::NxtInfo(NextInfo {
            stream: data.get_u16_ne(),
            flags: data.get_u16_ne(),
            ppid: data.get_u32_ne(),
            length: data.get_u32_ne(),
            assoc_id: AssocId(data.get_i32_ne()),
        }),
    };
    Ok(msg)
}
