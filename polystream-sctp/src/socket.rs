//! SCTP socket handle.
//!
//! [`SctpSocket`] is the part every handle shares: the descriptor slot, the
//! lifecycle state, the association registry (one-to-many only) and the
//! monitor. [`SctpConnection`](crate::SctpConnection) and
//! [`SctpListener`](crate::SctpListener) add bind/connect and listen/accept on
//! top and deref to it.
//!
//! The handle is `Clone`; clones share one descriptor, so a pool of workers
//! can each call [`read`](SctpSocket::read) or [`write`](SctpSocket::write)
//! on the same socket. Each receive or send is a single `recvmsg(2)` /
//! `sendmsg(2)` carrying both payload and metadata, so concurrent writers
//! interleave at message granularity.

use bitflags::bitflags;
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use polystream_core::address::{Address, AddressFamily};
use polystream_core::assoc::AssocId;
use polystream_core::error::{Result, SctpError};
use polystream_core::events::EventMask;
use polystream_core::mode::{SocketMode, SocketState};
use polystream_core::monitor::{create_monitor, SocketEvent, SocketEventSender, SocketMonitor};
use polystream_core::options::{InitParameters, SctpOptions, DEFAULT_CONTROL_BUF_SIZE};
use smallvec::SmallVec;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::codec::{self, MessageMetadata, CMSG_HDR_LEN, SEND_CONTROL_LEN, SNDRCVINFO_LEN};
use crate::connection::SctpConnection;
use crate::descriptor::{Descriptor, Interest};
use crate::notification::Notification;
use crate::registry::AssociationRegistry;
use crate::sockaddr;
use crate::sys;

bitflags! {
    /// Flags the kernel reports on a receive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecvFlags: libc::c_int {
        /// The bytes are a notification, not payload
        const NOTIFICATION = sys::MSG_NOTIFICATION;
        /// The bytes complete one message
        const EOR          = sys::MSG_EOR;
        /// Ancillary data did not fit the control buffer
        const CTRUNC       = libc::MSG_CTRUNC;
        /// Payload did not fit (one-to-many partial delivery)
        const TRUNC        = libc::MSG_TRUNC;
    }
}

/// Result of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes written into the caller's buffer
    pub len: usize,
    /// Per-message metadata, when the kernel attached any
    pub metadata: Option<MessageMetadata>,
    pub flags: RecvFlags,
}

impl ReadOutcome {
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.flags.contains(RecvFlags::NOTIFICATION)
    }

    /// This read completed a whole message (or notification).
    #[inline]
    pub fn end_of_record(&self) -> bool {
        self.flags.contains(RecvFlags::EOR)
    }

    /// Association the message belongs to, or `NONE` if unknown.
    pub fn assoc_id(&self) -> AssocId {
        self.metadata.map_or(AssocId::NONE, |m| m.assoc_id)
    }
}

/// One receive, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Payload bytes; accumulate until `end_of_record`.
    Data {
        len: usize,
        metadata: Option<MessageMetadata>,
        end_of_record: bool,
    },
    /// A complete, decoded notification.
    Notification(Notification),
    /// A notification fragment; the caller holds the bytes and reads on.
    Partial { len: usize },
}

/// `SCTP_RTOINFO` values in milliseconds. Zero leaves a value unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtoInfo {
    pub initial: u32,
    pub max: u32,
    pub min: u32,
}

/// One peer transport address as `SCTP_STATUS` reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddrInfo {
    pub address: Option<SocketAddr>,
    /// Raw `spinfo_state`
    pub state: i32,
    pub cwnd: u32,
    pub srtt: u32,
    pub rto: u32,
    pub mtu: u32,
}

/// Snapshot of one association (`SCTP_STATUS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationStatus {
    pub assoc_id: AssocId,
    /// Raw `sstat_state`
    pub state: i32,
    pub rwnd: u32,
    pub unacked: u16,
    pub pending: u16,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub fragmentation_point: u32,
    pub primary: PeerAddrInfo,
}

impl AssociationStatus {
    #[inline]
    pub fn is_established(&self) -> bool {
        self.state == sys::SCTP_ESTABLISHED
    }

    /// INIT or COOKIE-ECHO sent, no answer yet.
    pub fn is_handshaking(&self) -> bool {
        matches!(self.state, sys::SCTP_COOKIE_WAIT | sys::SCTP_COOKIE_ECHOED)
    }
}

#[derive(Debug)]
pub(crate) struct SocketInner {
    desc: Descriptor,
    mode: SocketMode,
    family: AddressFamily,
    state: AtomicU8,
    registry: AssociationRegistry,
    events: Mutex<EventMask>,
    options: SctpOptions,
    monitor: Mutex<Option<SocketEventSender>>,
}

/// Shared SCTP socket; see the [module docs](self).
#[derive(Debug, Clone)]
pub struct SctpSocket {
    inner: Arc<SocketInner>,
}

const ADDRS_INITIAL: usize = 512;
const ADDRS_MAX: usize = 64 * 1024;
const GETADDRS_HDR_LEN: usize = std::mem::size_of::<sys::sctp_getaddrs>();

impl SctpSocket {
    /// Open a fresh descriptor and apply `options`.
    pub(crate) fn open(family: AddressFamily, options: &SctpOptions) -> Result<Self> {
        let socket = Socket::new(
            Domain::from(family.to_raw()),
            Type::from(options.mode.to_raw()),
            Some(Protocol::from(sys::IPPROTO_SCTP)),
        )?;
        if options.reuse_address {
            socket.set_reuse_address(true)?;
        }
        let handle = Self::from_socket(socket, family, options.clone(), SocketState::Unbound)?;
        if !options.init.is_default() {
            handle.set_init_parameters(&options.init)?;
        }
        if options.nodelay {
            handle.set_nodelay(true)?;
        }
        handle.set_events(options.events)?;
        trace!(
            "[SCTP] opened {} {} socket",
            family,
            options.mode
        );
        Ok(handle)
    }

    pub(crate) fn from_socket(
        socket: Socket,
        family: AddressFamily,
        options: SctpOptions,
        state: SocketState,
    ) -> Result<Self> {
        let desc = Descriptor::new(socket, options.nonblocking)?;
        Ok(Self {
            inner: Arc::new(SocketInner {
                desc,
                mode: options.mode,
                family,
                state: AtomicU8::new(state as u8),
                registry: AssociationRegistry::new(),
                events: Mutex::new(options.events),
                options,
                monitor: Mutex::new(None),
            }),
        })
    }

    pub(crate) fn descriptor(&self) -> &Descriptor {
        &self.inner.desc
    }

    pub(crate) fn options(&self) -> &SctpOptions {
        &self.inner.options
    }

    #[inline]
    pub fn mode(&self) -> SocketMode {
        self.inner.mode
    }

    #[inline]
    pub fn family(&self) -> AddressFamily {
        self.inner.family
    }

    #[inline]
    pub fn state(&self) -> SocketState {
        SocketState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Current event subscription.
    pub fn events(&self) -> EventMask {
        *self.inner.events.lock()
    }

    /// Live associations (one-to-many).
    pub fn associations(&self) -> &AssociationRegistry {
        &self.inner.registry
    }

    /// Scratch size for convenience readers such as
    /// [`MessageReassembler`](crate::reassembly::MessageReassembler).
    pub fn read_buffer_size(&self) -> usize {
        self.inner.options.read_buffer_size
    }

    pub fn is_nonblocking(&self) -> bool {
        self.inner.desc.is_nonblocking()
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.inner.desc.acquire()?;
        self.inner.desc.set_nonblocking(nonblocking);
        Ok(())
    }

    /// Move to `next` if the lifecycle allows it from the current state.
    pub(crate) fn transition(&self, next: SocketState) -> bool {
        let mut cur = self.inner.state.load(Ordering::Acquire);
        loop {
            if !SocketState::from_u8(cur).can_transition(next) {
                return false;
            }
            match self.inner.state.compare_exchange_weak(
                cur,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub(crate) fn invalid_state(&self, operation: &'static str) -> SctpError {
        if self.inner.desc.is_closed() {
            return SctpError::Closed;
        }
        SctpError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    fn require_one_to_many(&self, operation: &'static str) -> Result<()> {
        if self.inner.mode == SocketMode::OneToMany {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    /// Receive one message or notification into `buf`.
    ///
    /// A read that does not set `end_of_record` returned part of a message;
    /// the rest follows on later reads and reassembly is up to the caller.
    /// On a one-to-many socket association-change notifications update
    /// [`associations`](Self::associations) before they are returned, and
    /// data still queued for a peeled-off association is discarded.
    ///
    /// Peer shutdown on a one-to-one socket reads as
    /// [`SctpError::EndOfStream`].
    pub async fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let inner = &self.inner;
        let mut control: SmallVec<[u8; DEFAULT_CONTROL_BUF_SIZE]> =
            SmallVec::from_elem(0, inner.options.control_buffer_size);

        loop {
            let (len, control_len, raw_flags) = inner
                .desc
                .io(Interest::Readable, |fd| recv_once(fd, buf, &mut control))
                .await?;
            let flags = RecvFlags::from_bits_truncate(raw_flags);
            let notification = flags.contains(RecvFlags::NOTIFICATION);

            if len == 0 && !notification && !buf.is_empty() {
                if inner.desc.is_closed() {
                    return Err(SctpError::Closed);
                }
                return Err(SctpError::EndOfStream);
            }

            let metadata = codec::decode_control(&control[..control_len.min(control.len())])?;

            if inner.mode == SocketMode::OneToMany {
                if notification {
                    if flags.contains(RecvFlags::EOR) {
                        self.observe(&buf[..len]);
                    }
                } else if let Some(meta) = &metadata {
                    if inner.registry.is_peeled(meta.assoc_id) {
                        trace!(
                            "[SCTP] dropped {} bytes for peeled-off association {}",
                            len,
                            meta.assoc_id
                        );
                        continue;
                    }
                }
            }

            trace!(
                "[SCTP] read {} bytes (flags {:?}, stream {:?})",
                len,
                flags,
                metadata.map(|m| m.stream)
            );
            return Ok(ReadOutcome {
                len,
                metadata,
                flags,
            });
        }
    }

    fn observe(&self, bytes: &[u8]) {
        match Notification::decode(bytes) {
            Ok(n) => {
                if let Some(event) = self.inner.registry.observe(&n) {
                    debug!("[SCTP] {}", event);
                    self.emit_event(event);
                }
            }
            // Returned to the caller undecoded; it sees the same error.
            Err(e) => trace!("[SCTP] notification not tracked: {}", e),
        }
    }

    /// [`read`](Self::read), decoding notifications.
    pub async fn read_event(&self, buf: &mut [u8]) -> Result<Incoming> {
        let outcome = self.read(buf).await?;
        if !outcome.is_notification() {
            return Ok(Incoming::Data {
                len: outcome.len,
                metadata: outcome.metadata,
                end_of_record: outcome.end_of_record(),
            });
        }
        if !outcome.end_of_record() {
            return Ok(Incoming::Partial { len: outcome.len });
        }
        Notification::decode(&buf[..outcome.len]).map(Incoming::Notification)
    }

    /// Send one message tagged with `metadata`.
    ///
    /// On a one-to-many socket `metadata.assoc_id` picks the association.
    /// `NONE` is accepted while at most one association is live and fails
    /// with [`SctpError::AmbiguousAssociation`] otherwise.
    pub async fn write(&self, buf: &[u8], metadata: &MessageMetadata) -> Result<usize> {
        let mut meta = *metadata;
        if self.inner.mode == SocketMode::OneToMany {
            meta.assoc_id = self.inner.registry.resolve_target(meta.assoc_id)?;
        }
        self.send(buf, &meta, None).await
    }

    /// Send one message addressed to `remote` (one-to-many).
    ///
    /// The kernel sets up an association implicitly if none exists yet.
    /// Only the first host of `remote` is used as the destination.
    pub async fn write_to(
        &self,
        buf: &[u8],
        metadata: &MessageMetadata,
        remote: &Address,
    ) -> Result<usize> {
        self.require_one_to_many("write to an address")?;
        let addrs = sockaddr::resolve(remote)?;
        let first = addrs
            .first()
            .copied()
            .ok_or(polystream_core::address::AddressError::EmptyHostList)?;
        let name = SockAddr::from(first);
        self.send(buf, metadata, Some(&name)).await
    }

    async fn send(
        &self,
        buf: &[u8],
        meta: &MessageMetadata,
        name: Option<&SockAddr>,
    ) -> Result<usize> {
        let mut control = BytesMut::with_capacity(SEND_CONTROL_LEN);
        codec::encode_send(meta, &mut control);
        let n = self
            .inner
            .desc
            .io(Interest::Writable, |fd| send_once(fd, buf, &control, name))
            .await?;
        trace!(
            "[SCTP] wrote {} bytes (stream {}, assoc {})",
            n,
            meta.stream,
            meta.assoc_id
        );
        Ok(n)
    }

    /// Subscribe to the notification classes in `mask`. An empty mask
    /// selects data-I/O metadata only. One-to-many sockets always keep
    /// association events, which the registry depends on.
    ///
    /// A bound one-to-many socket is `Established` once subscribed.
    pub fn set_events(&self, mask: EventMask) -> Result<()> {
        let mut mask = if mask.is_empty() {
            EventMask::DATA_IO
        } else {
            mask
        };
        if self.inner.mode == SocketMode::OneToMany {
            mask |= EventMask::ASSOCIATION;
        }
        let bytes = mask.subscription_bytes();
        self.sockopt(|fd| sys::setsockopt_bytes(fd, sys::SOL_SCTP, sys::SCTP_EVENTS, &bytes))?;
        *self.inner.events.lock() = mask;

        if self.inner.mode == SocketMode::OneToMany && self.state() == SocketState::Bound {
            self.transition(SocketState::Established);
        }
        debug!("[SCTP] subscribed to {:?}", mask);
        Ok(())
    }

    fn sockopt<T>(&self, op: impl FnOnce(RawFd) -> io::Result<T>) -> Result<T> {
        let fd = self.inner.desc.acquire()?;
        op(fd.fd()).map_err(SctpError::from_io)
    }

    fn set_int(&self, opt: libc::c_int, value: libc::c_int) -> Result<()> {
        // SAFETY: `opt` takes an int.
        self.sockopt(|fd| unsafe { sys::setsockopt(fd, sys::SOL_SCTP, opt, &value) })
            .map(|_| ())
    }

    /// INIT parameters for associations set up from now on.
    pub fn set_init_parameters(&self, init: &InitParameters) -> Result<()> {
        let raw = sys::sctp_initmsg {
            sinit_num_ostreams: init.outbound_streams,
            sinit_max_instreams: init.max_inbound_streams,
            sinit_max_attempts: init.max_init_attempts,
            sinit_max_init_timeo: init.max_init_timeout_ms,
        };
        // SAFETY: SCTP_INITMSG takes a sctp_initmsg.
        self.sockopt(|fd| unsafe { sys::setsockopt(fd, sys::SOL_SCTP, sys::SCTP_INITMSG, &raw) })?;
        Ok(())
    }

    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.set_int(sys::SCTP_NODELAY, libc::c_int::from(nodelay))
    }

    pub fn nodelay(&self) -> Result<bool> {
        // SAFETY: SCTP_NODELAY yields an int.
        let v: libc::c_int =
            self.sockopt(|fd| unsafe { sys::getsockopt(fd, sys::SOL_SCTP, sys::SCTP_NODELAY) })?;
        Ok(v != 0)
    }

    pub fn set_disable_fragments(&self, disable: bool) -> Result<()> {
        self.set_int(sys::SCTP_DISABLE_FRAGMENTS, libc::c_int::from(disable))
    }

    /// Close idle associations after `seconds` (one-to-many; 0 disables).
    pub fn set_autoclose(&self, seconds: u32) -> Result<()> {
        self.require_one_to_many("set autoclose")?;
        let value = libc::c_int::try_from(seconds).unwrap_or(libc::c_int::MAX);
        self.set_int(sys::SCTP_AUTOCLOSE, value)
    }

    pub fn rto_info(&self, assoc: AssocId) -> Result<RtoInfo> {
        let mut raw = sys::sctp_rtoinfo {
            srto_assoc_id: assoc.get(),
            ..sys::zeroed()
        };
        // SAFETY: SCTP_RTOINFO reads and writes a sctp_rtoinfo.
        self.sockopt(|fd| unsafe {
            sys::getsockopt_inout(fd, sys::SOL_SCTP, sys::SCTP_RTOINFO, &mut raw)
        })?;
        Ok(RtoInfo {
            initial: raw.srto_initial,
            max: raw.srto_max,
            min: raw.srto_min,
        })
    }

    pub fn set_rto_info(&self, assoc: AssocId, rto: RtoInfo) -> Result<()> {
        let raw = sys::sctp_rtoinfo {
            srto_assoc_id: assoc.get(),
            srto_initial: rto.initial,
            srto_max: rto.max,
            srto_min: rto.min,
        };
        // SAFETY: SCTP_RTOINFO takes a sctp_rtoinfo.
        self.sockopt(|fd| unsafe { sys::setsockopt(fd, sys::SOL_SCTP, sys::SCTP_RTOINFO, &raw) })?;
        Ok(())
    }

    /// Delayed-SACK timing: `delay_ms` before acking, or every `frequency`
    /// packets. `frequency == 1` disables delayed acks.
    pub fn set_delayed_ack(&self, assoc: AssocId, delay_ms: u32, frequency: u32) -> Result<()> {
        let raw = sys::sctp_sack_info {
            sack_assoc_id: assoc.get(),
            sack_delay: delay_ms,
            sack_freq: frequency,
        };
        // SAFETY: SCTP_DELAYED_SACK takes a sctp_sack_info.
        self.sockopt(|fd| unsafe {
            sys::setsockopt(fd, sys::SOL_SCTP, sys::SCTP_DELAYED_SACK, &raw)
        })?;
        Ok(())
    }

    /// Metadata applied to sends that carry none of their own.
    pub fn set_default_send_params(&self, metadata: &MessageMetadata) -> Result<()> {
        let mut encoded = BytesMut::with_capacity(SEND_CONTROL_LEN);
        codec::encode_send(metadata, &mut encoded);
        let record = &encoded[CMSG_HDR_LEN..CMSG_HDR_LEN + SNDRCVINFO_LEN];
        self.sockopt(|fd| {
            sys::setsockopt_bytes(fd, sys::SOL_SCTP, sys::SCTP_DEFAULT_SEND_PARAM, record)
        })?;
        Ok(())
    }

    /// Association status. `assoc` is ignored on one-to-one sockets.
    pub fn status(&self, assoc: AssocId) -> Result<AssociationStatus> {
        let mut raw: sys::sctp_status = sys::zeroed();
        raw.sstat_assoc_id = assoc.get();
        // SAFETY: SCTP_STATUS reads and writes a sctp_status.
        self.sockopt(|fd| unsafe {
            sys::getsockopt_inout(fd, sys::SOL_SCTP, sys::SCTP_STATUS, &mut raw)
        })?;

        let primary = raw.sstat_primary;
        let storage = primary.spinfo_address;
        Ok(AssociationStatus {
            assoc_id: AssocId(raw.sstat_assoc_id),
            state: raw.sstat_state,
            rwnd: raw.sstat_rwnd,
            unacked: raw.sstat_unackdata,
            pending: raw.sstat_penddata,
            inbound_streams: raw.sstat_instrms,
            outbound_streams: raw.sstat_outstrms,
            fragmentation_point: raw.sstat_fragmentation_point,
            primary: PeerAddrInfo {
                address: sockaddr::decode_storage(storage_bytes(&storage))?,
                state: primary.spinfo_state,
                cwnd: primary.spinfo_cwnd,
                srtt: primary.spinfo_srtt,
                rto: primary.spinfo_rto,
                mtu: primary.spinfo_mtu,
            },
        })
    }

    /// Make `addr` the primary path of `assoc`.
    pub fn set_primary_addr(&self, assoc: AssocId, addr: &SocketAddr) -> Result<()> {
        let raw = sys::sctp_prim {
            ssp_assoc_id: assoc.get(),
            ssp_addr: sockaddr::to_storage(addr),
        };
        // SAFETY: SCTP_PRIMARY_ADDR takes a sctp_prim.
        self.sockopt(|fd| unsafe {
            sys::setsockopt(fd, sys::SOL_SCTP, sys::SCTP_PRIMARY_ADDR, &raw)
        })?;
        Ok(())
    }

    /// Bind an unbound socket to every host of `address`.
    ///
    /// The kernel picks the primary path; the first host is only a hint.
    pub(crate) fn bind_to(&self, address: &Address) -> Result<()> {
        if self.state() != SocketState::Unbound {
            return Err(self.invalid_state("bind"));
        }
        self.bindx(address, sys::SCTP_SOCKOPT_BINDX_ADD)?;
        self.transition(SocketState::Bound);
        debug!("[SCTP] bound to {}", address);
        self.emit_event(SocketEvent::Bound(address.clone()));
        Ok(())
    }

    /// Add local addresses to the bound set (`sctp_bindx` add).
    pub fn bind_add(&self, address: &Address) -> Result<()> {
        self.bindx(address, sys::SCTP_SOCKOPT_BINDX_ADD)?;
        debug!("[SCTP] added local address {}", address);
        Ok(())
    }

    /// Remove local addresses from the bound set (`sctp_bindx` remove).
    pub fn bind_remove(&self, address: &Address) -> Result<()> {
        self.bindx(address, sys::SCTP_SOCKOPT_BINDX_REM)?;
        debug!("[SCTP] removed local address {}", address);
        Ok(())
    }

    pub(crate) fn bindx(&self, address: &Address, opt: libc::c_int) -> Result<()> {
        let addrs = sockaddr::resolve(address)?;
        let packed = sockaddr::encode_all(&addrs);
        let fd = self.inner.desc.acquire()?;
        sys::setsockopt_bytes(fd.fd(), sys::SOL_SCTP, opt, &packed)
            .map(|_| ())
            .map_err(|e| SctpError::bind(address, e))
    }

    /// Every local address the socket is bound to.
    pub fn local_addr(&self) -> Result<Address> {
        self.get_addrs(sys::SCTP_GET_LOCAL_ADDRS, AssocId::NONE)
    }

    /// Local addresses in use by one association.
    pub fn local_addr_for(&self, assoc: AssocId) -> Result<Address> {
        self.get_addrs(sys::SCTP_GET_LOCAL_ADDRS, assoc)
    }

    /// Peer addresses of the association. On a one-to-many socket this
    /// needs exactly one live association; see [`peer_addr_for`](Self::peer_addr_for).
    pub fn peer_addr(&self) -> Result<Address> {
        let assoc = match self.inner.mode {
            SocketMode::OneToOne => AssocId::NONE,
            SocketMode::OneToMany => self.inner.registry.resolve_target(AssocId::NONE)?,
        };
        self.get_addrs(sys::SCTP_GET_PEER_ADDRS, assoc)
    }

    pub fn peer_addr_for(&self, assoc: AssocId) -> Result<Address> {
        self.get_addrs(sys::SCTP_GET_PEER_ADDRS, assoc)
    }

    fn get_addrs(&self, opt: libc::c_int, assoc: AssocId) -> Result<Address> {
        let fd = self.inner.desc.acquire()?;
        let mut capacity = ADDRS_INITIAL;
        loop {
            let mut buf = vec![0u8; GETADDRS_HDR_LEN + capacity];
            buf[..4].copy_from_slice(&assoc.get().to_ne_bytes());

            match sys::getsockopt_bytes(fd.fd(), sys::SOL_SCTP, opt, &mut buf) {
                Ok(_) => {
                    let count = (&buf[4..8]).get_u32_ne() as usize;
                    let addrs = sockaddr::decode_packed(&buf[GETADDRS_HDR_LEN..], count)?;
                    return Self::kernel_address(&addrs);
                }
                Err(e) if e.raw_os_error() == Some(libc::ENOMEM) && capacity < ADDRS_MAX => {
                    capacity *= 4;
                }
                Err(e) => return Err(SctpError::from_io(e)),
            }
        }
    }

    /// Build an address from a kernel-reported list. An IPv6 address may
    /// carry IPv4 paths but must lead with an IPv6 host.
    fn kernel_address(addrs: &[SocketAddr]) -> Result<Address> {
        if addrs.is_empty() {
            return Err(SctpError::from_io(io::Error::from_raw_os_error(libc::ENOTCONN)));
        }
        let mut ordered: SmallVec<[SocketAddr; 4]> = addrs.iter().copied().collect();
        if ordered[0].is_ipv4() && ordered.iter().any(SocketAddr::is_ipv6) {
            ordered.sort_by_key(SocketAddr::is_ipv4);
        }
        sockaddr::to_address(&ordered)
    }

    /// Branch `assoc` off into its own one-to-one handle.
    ///
    /// The association is retired from this socket before the new handle
    /// is returned: no later read here yields its data.
    pub fn peel_off(&self, assoc: AssocId) -> Result<SctpConnection> {
        self.require_one_to_many("peel off")?;
        let fd = self.inner.desc.acquire()?;

        let socket = self.inner.registry.peel_off(assoc, || {
            let mut arg = sys::sctp_peeloff_arg_t {
                associd: assoc.get(),
                sd: -1,
            };
            // SAFETY: SCTP_SOCKOPT_PEELOFF reads and writes a sctp_peeloff_arg_t.
            unsafe {
                sys::getsockopt_inout(fd.fd(), sys::SOL_SCTP, sys::SCTP_SOCKOPT_PEELOFF, &mut arg)
            }
            .map_err(SctpError::from_io)?;
            // SAFETY: the kernel returned a fresh descriptor that nothing else owns.
            Ok(unsafe { Socket::from_raw_fd(arg.sd) })
        })?;
        drop(fd);

        let peeled = self.adopt_peeled(assoc, socket)?;
        debug!("[SCTP] peeled off association {}", assoc);
        self.emit_event(SocketEvent::PeeledOff(assoc));
        Ok(SctpConnection::from_socket(peeled))
    }

    /// Wrap a peeled-off descriptor. The registry has already retired
    /// `assoc`, so a failure here loses the association.
    fn adopt_peeled(&self, assoc: AssocId, socket: Socket) -> Result<SctpSocket> {
        let options = self.inner.options.clone().with_mode(SocketMode::OneToOne);
        let adopted =
            SctpSocket::from_socket(socket, self.inner.family, options, SocketState::Established)
                .and_then(|peeled| peeled.set_events(self.events()).map(|_| peeled));
        if let Err(e) = &adopted {
            warn!(
                "[SCTP] association {} lost: peeled off but its handle failed setup: {}",
                assoc, e
            );
        }
        adopted
    }

    /// Create a monitoring stream for this socket's lifecycle events.
    ///
    /// Replaces any earlier monitor.
    pub fn monitor(&self) -> SocketMonitor {
        let (sender, receiver) = create_monitor();
        *self.inner.monitor.lock() = Some(sender);
        receiver
    }

    pub(crate) fn emit_event(&self, event: SocketEvent) {
        if let Some(monitor) = self.inner.monitor.lock().as_ref() {
            let _ = monitor.send(event);
        }
    }

    /// Close the handle. Blocked calls on any clone return
    /// [`SctpError::Closed`]; so does every later call, `close` included.
    pub fn close(&self) -> Result<()> {
        self.inner.desc.close()?;
        self.inner
            .state
            .store(SocketState::Closed as u8, Ordering::Release);
        self.inner.registry.clear();
        debug!("[SCTP] {} socket closed", self.inner.mode);
        self.emit_event(SocketEvent::Closed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.desc.is_closed()
    }
}

fn storage_bytes(storage: &libc::sockaddr_storage) -> &[u8] {
    // SAFETY: sockaddr_storage is plain data; the slice covers exactly it.
    unsafe {
        std::slice::from_raw_parts(
            (storage as *const libc::sockaddr_storage).cast::<u8>(),
            std::mem::size_of::<libc::sockaddr_storage>(),
        )
    }
}

fn recv_once(fd: RawFd, buf: &mut [u8], control: &mut [u8]) -> io::Result<(usize, usize, libc::c_int)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let mut msg: libc::msghdr = sys::zeroed();
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = control.len() as _;

    // SAFETY: every pointer in `msg` refers to a live buffer of the stated length.
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((n as usize, msg.msg_controllen as usize, msg.msg_flags))
}

fn send_once(fd: RawFd, buf: &[u8], control: &[u8], name: Option<&SockAddr>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr().cast_mut().cast(),
        iov_len: buf.len(),
    };
    let mut msg: libc::msghdr = sys::zeroed();
    if let Some(name) = name {
        msg.msg_name = name.as_ptr().cast_mut().cast();
        msg.msg_namelen = name.len();
    }
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_ptr().cast_mut().cast();
    msg.msg_controllen = control.len() as _;

    // SAFETY: the kernel only reads through the pointers in `msg`.
    let n = unsafe { libc::sendmsg(fd, &msg, libc::MSG_NOSIGNAL) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

impl AsRawFd for SctpSocket {
    /// The descriptor number; it stays valid only until [`close`](Self::close).
    fn as_raw_fd(&self) -> RawFd {
        self.inner.desc.raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_flags_match_kernel_bits() {
        let flags = RecvFlags::from_bits_truncate(0x8000 | libc::MSG_EOR);
        assert!(flags.contains(RecvFlags::NOTIFICATION));
        assert!(flags.contains(RecvFlags::EOR));
        assert!(!flags.contains(RecvFlags::TRUNC));
    }

    #[test]
    fn test_read_outcome_accessors() {
        let outcome = ReadOutcome {
            len: 5,
            metadata: Some(MessageMetadata::new().with_assoc(AssocId(9))),
            flags: RecvFlags::EOR,
        };
        assert!(outcome.end_of_record());
        assert!(!outcome.is_notification());
        assert_eq!(outcome.assoc_id(), AssocId(9));

        let bare = ReadOutcome {
            len: 0,
            metadata: None,
            flags: RecvFlags::NOTIFICATION,
        };
        assert_eq!(bare.assoc_id(), AssocId::NONE);
    }

    #[test]
    fn test_status_established() {
        let status = AssociationStatus {
            assoc_id: AssocId(1),
            state: sys::SCTP_ESTABLISHED,
            rwnd: 0,
            unacked: 0,
            pending: 0,
            inbound_streams: 10,
            outbound_streams: 10,
            fragmentation_point: 0,
            primary: PeerAddrInfo {
                address: None,
                state: 0,
                cwnd: 0,
                srtt: 0,
                rto: 0,
                mtu: 0,
            },
        };
        assert!(status.is_established());
        assert!(!status.is_handshaking());
        let waiting = AssociationStatus {
            state: sys::SCTP_COOKIE_WAIT,
            ..status
        };
        assert!(!waiting.is_established());
        assert!(waiting.is_handshaking());
    }

    #[test]
    fn test_failed_peel_setup_is_reported() {
        let udp = || Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        let options = SctpOptions::new().with_mode(SocketMode::OneToMany);
        let parent =
            SctpSocket::from_socket(udp(), AddressFamily::Ipv4, options, SocketState::Established)
                .unwrap();

        // SCTP_EVENTS is refused on a non-SCTP descriptor
        let err = parent.adopt_peeled(AssocId(3), udp()).unwrap_err();
        assert!(!matches!(err, SctpError::Closed), "got {err:?}");
        assert!(!parent.is_closed());
    }

    #[test]
    fn test_kernel_address_leads_with_ipv6() {
        let addrs: Vec<SocketAddr> = ["10.0.0.1:5000", "[2001:db8::1]:5000", "10.0.0.2:5000"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let address = SctpSocket::kernel_address(&addrs).unwrap();
        assert_eq!(address.family(), AddressFamily::Ipv6);
        assert_eq!(address.hosts().len(), 3);
        assert!(address.primary().ip.is_ipv6());
        assert_eq!(address.port(), 5000);

        let v4: Vec<SocketAddr> = vec!["10.0.0.1:7".parse().unwrap()];
        assert_eq!(
            SctpSocket::kernel_address(&v4).unwrap().family(),
            AddressFamily::Ipv4
        );
        assert!(SctpSocket::kernel_address(&[]).is_err());
    }
}
