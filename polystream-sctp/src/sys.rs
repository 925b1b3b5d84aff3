//! Linux `<linux/sctp.h>` constants and `#[repr(C)]` mirrors.
//!
//! Everything here must agree byte for byte with the running kernel. The
//! layouts are checked in the tests below and again by the codec tests,
//! which decode bytes produced from these mirrors.

#![allow(non_camel_case_types)]

use std::io;
use std::mem::{size_of, MaybeUninit};
use std::os::unix::io::RawFd;

pub type sctp_assoc_t = i32;

pub const IPPROTO_SCTP: libc::c_int = libc::IPPROTO_SCTP;
pub const SOL_SCTP: libc::c_int = 132;

/// Receive flag: the buffer holds a notification, not payload.
pub const MSG_NOTIFICATION: libc::c_int = 0x8000;
pub const MSG_EOR: libc::c_int = libc::MSG_EOR;

pub const SCTP_MAX_STREAM: u16 = 0xffff;

pub const SCTP_BINDX_ADD_ADDR: libc::c_int = 1;
pub const SCTP_BINDX_REM_ADDR: libc::c_int = 2;

// Socket options
pub const SCTP_RTOINFO: libc::c_int = 0;
pub const SCTP_ASSOCINFO: libc::c_int = 1;
pub const SCTP_INITMSG: libc::c_int = 2;
pub const SCTP_NODELAY: libc::c_int = 3;
pub const SCTP_AUTOCLOSE: libc::c_int = 4;
pub const SCTP_SET_PEER_PRIMARY_ADDR: libc::c_int = 5;
pub const SCTP_PRIMARY_ADDR: libc::c_int = 6;
pub const SCTP_ADAPTATION_LAYER: libc::c_int = 7;
pub const SCTP_DISABLE_FRAGMENTS: libc::c_int = 8;
pub const SCTP_PEER_ADDR_PARAMS: libc::c_int = 9;
pub const SCTP_DEFAULT_SEND_PARAM: libc::c_int = 10;
pub const SCTP_EVENTS: libc::c_int = 11;
pub const SCTP_I_WANT_MAPPED_V4_ADDR: libc::c_int = 12;
pub const SCTP_MAXSEG: libc::c_int = 13;
pub const SCTP_STATUS: libc::c_int = 14;
pub const SCTP_GET_PEER_ADDR_INFO: libc::c_int = 15;
pub const SCTP_DELAYED_ACK_TIME: libc::c_int = 16;
pub const SCTP_DELAYED_ACK: libc::c_int = SCTP_DELAYED_ACK_TIME;
pub const SCTP_DELAYED_SACK: libc::c_int = SCTP_DELAYED_ACK_TIME;

// Administrative options
pub const SCTP_SOCKOPT_BINDX_ADD: libc::c_int = 100;
pub const SCTP_SOCKOPT_BINDX_REM: libc::c_int = 101;
pub const SCTP_SOCKOPT_PEELOFF: libc::c_int = 102;
pub const SCTP_GET_PEER_ADDRS: libc::c_int = 108;
pub const SCTP_GET_LOCAL_ADDRS: libc::c_int = 109;
pub const SCTP_SOCKOPT_CONNECTX: libc::c_int = 110;
pub const SCTP_SOCKOPT_CONNECTX3: libc::c_int = 111;

// Ancillary data types
pub const SCTP_INIT: libc::c_int = 0;
pub const SCTP_SNDRCV: libc::c_int = 1;
pub const SCTP_SNDINFO: libc::c_int = 2;
pub const SCTP_RCVINFO: libc::c_int = 3;
pub const SCTP_NXTINFO: libc::c_int = 4;

// Notification tags
pub const SCTP_SN_TYPE_BASE: u16 = 1 << 15;
pub const SCTP_ASSOC_CHANGE: u16 = SCTP_SN_TYPE_BASE + 1;
pub const SCTP_PEER_ADDR_CHANGE: u16 = SCTP_SN_TYPE_BASE + 2;
pub const SCTP_SEND_FAILED: u16 = SCTP_SN_TYPE_BASE + 3;
pub const SCTP_REMOTE_ERROR: u16 = SCTP_SN_TYPE_BASE + 4;
pub const SCTP_SHUTDOWN_EVENT: u16 = SCTP_SN_TYPE_BASE + 5;
pub const SCTP_PARTIAL_DELIVERY_EVENT: u16 = SCTP_SN_TYPE_BASE + 6;
pub const SCTP_ADAPTATION_INDICATION: u16 = SCTP_SN_TYPE_BASE + 7;
pub const SCTP_AUTHENTICATION_EVENT: u16 = SCTP_SN_TYPE_BASE + 8;
pub const SCTP_SENDER_DRY_EVENT: u16 = SCTP_SN_TYPE_BASE + 9;

// sctp_assoc_change.sac_state
pub const SCTP_COMM_UP: u16 = 0;
pub const SCTP_COMM_LOST: u16 = 1;
pub const SCTP_RESTART: u16 = 2;
pub const SCTP_SHUTDOWN_COMP: u16 = 3;
pub const SCTP_CANT_STR_ASSOC: u16 = 4;

// sctp_paddr_change.spc_state
pub const SCTP_ADDR_AVAILABLE: i32 = 0;
pub const SCTP_ADDR_UNREACHABLE: i32 = 1;
pub const SCTP_ADDR_REMOVED: i32 = 2;
pub const SCTP_ADDR_ADDED: i32 = 3;
pub const SCTP_ADDR_MADE_PRIM: i32 = 4;
pub const SCTP_ADDR_CONFIRMED: i32 = 5;
pub const SCTP_ADDR_POTENTIALLY_FAILED: i32 = 6;

// sctp_sstat_state
pub const SCTP_EMPTY: i32 = 0;
pub const SCTP_CLOSED: i32 = 1;
pub const SCTP_COOKIE_WAIT: i32 = 2;
pub const SCTP_COOKIE_ECHOED: i32 = 3;
pub const SCTP_ESTABLISHED: i32 = 4;
pub const SCTP_SHUTDOWN_PENDING: i32 = 5;
pub const SCTP_SHUTDOWN_SENT: i32 = 6;
pub const SCTP_SHUTDOWN_RECEIVED: i32 = 7;
pub const SCTP_SHUTDOWN_ACK_SENT: i32 = 8;

// Per-message flags (sinfo_flags / snd_flags)
pub const SCTP_UNORDERED: u16 = 1;
pub const SCTP_ADDR_OVER: u16 = 2;
pub const SCTP_ABORT: u16 = 4;
pub const SCTP_SACK_IMMEDIATELY: u16 = 8;
pub const SCTP_SENDALL: u16 = 64;
pub const SCTP_EOF: u16 = libc::MSG_FIN as u16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_initmsg {
    pub sinit_num_ostreams: u16,
    pub sinit_max_instreams: u16,
    pub sinit_max_attempts: u16,
    pub sinit_max_init_timeo: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_sndrcvinfo {
    pub sinfo_stream: u16,
    pub sinfo_ssn: u16,
    pub sinfo_flags: u16,
    pub sinfo_ppid: u32,
    pub sinfo_context: u32,
    pub sinfo_timetolive: u32,
    pub sinfo_tsn: u32,
    pub sinfo_cumtsn: u32,
    pub sinfo_assoc_id: sctp_assoc_t,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_sndinfo {
    pub snd_sid: u16,
    pub snd_flags: u16,
    pub snd_ppid: u32,
    pub snd_context: u32,
    pub snd_assoc_id: sctp_assoc_t,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_rcvinfo {
    pub rcv_sid: u16,
    pub rcv_ssn: u16,
    pub rcv_flags: u16,
    pub rcv_ppid: u32,
    pub rcv_tsn: u32,
    pub rcv_cumtsn: u32,
    pub rcv_context: u32,
    pub rcv_assoc_id: sctp_assoc_t,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_nxtinfo {
    pub nxt_sid: u16,
    pub nxt_flags: u16,
    pub nxt_ppid: u32,
    pub nxt_length: u32,
    pub nxt_assoc_id: sctp_assoc_t,
}

/// One on/off byte per event class, in subscription order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_event_subscribe {
    pub sctp_data_io_event: u8,
    pub sctp_association_event: u8,
    pub sctp_address_event: u8,
    pub sctp_send_failure_event: u8,
    pub sctp_peer_error_event: u8,
    pub sctp_shutdown_event: u8,
    pub sctp_partial_delivery_event: u8,
    pub sctp_adaptation_layer_event: u8,
    pub sctp_authentication_event: u8,
    pub sctp_sender_dry_event: u8,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct sctp_peeloff_arg_t {
    pub associd: sctp_assoc_t,
    pub sd: libc::c_int,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_rtoinfo {
    pub srto_assoc_id: sctp_assoc_t,
    pub srto_initial: u32,
    pub srto_max: u32,
    pub srto_min: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_sack_info {
    pub sack_assoc_id: sctp_assoc_t,
    pub sack_delay: u32,
    pub sack_freq: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct sctp_assoc_value {
    pub assoc_id: sctp_assoc_t,
    pub assoc_value: u32,
}

#[derive(Clone, Copy)]
#[repr(C, packed(4))]
pub struct sctp_prim {
    pub ssp_assoc_id: sctp_assoc_t,
    pub ssp_addr: libc::sockaddr_storage,
}

#[derive(Clone, Copy)]
#[repr(C, packed(4))]
pub struct sctp_paddrinfo {
    pub spinfo_assoc_id: sctp_assoc_t,
    pub spinfo_address: libc::sockaddr_storage,
    pub spinfo_state: i32,
    pub spinfo_cwnd: u32,
    pub spinfo_srtt: u32,
    pub spinfo_rto: u32,
    pub spinfo_mtu: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct sctp_status {
    pub sstat_assoc_id: sctp_assoc_t,
    pub sstat_state: i32,
    pub sstat_rwnd: u32,
    pub sstat_unackdata: u16,
    pub sstat_penddata: u16,
    pub sstat_instrms: u16,
    pub sstat_outstrms: u16,
    pub sstat_fragmentation_point: u32,
    pub sstat_primary: sctp_paddrinfo,
}

/// Header of `struct sctp_getaddrs`; the packed address list follows.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct sctp_getaddrs {
    pub assoc_id: sctp_assoc_t,
    pub addr_num: u32,
}

/// Argument of `SCTP_SOCKOPT_CONNECTX3`; `addr_num` is the byte length of
/// the packed list at `addrs`. The kernel writes the association id back
/// even when the connect is still in progress.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct sctp_getaddrs_old {
    pub assoc_id: sctp_assoc_t,
    pub addr_num: libc::c_int,
    pub addrs: *mut libc::sockaddr,
}

/// All-zero value of a plain-data mirror.
pub(crate) fn zeroed<T: Copy>() -> T {
    // SAFETY: only instantiated with plain C structs (the mirrors above,
    // `msghdr`, `sockaddr_storage`) for which all-zero is a valid value.
    unsafe { MaybeUninit::<T>::zeroed().assume_init() }
}

/// Caller must ensure `T` is the correct type for `opt`.
pub(crate) unsafe fn setsockopt<T>(
    fd: RawFd,
    level: libc::c_int,
    opt: libc::c_int,
    payload: &T,
) -> io::Result<libc::c_int> {
    let ptr = (payload as *const T).cast::<libc::c_void>();
    match libc::setsockopt(fd, level, opt, ptr, size_of::<T>() as libc::socklen_t) {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n),
    }
}

/// Set an option whose value is an opaque byte blob.
pub(crate) fn setsockopt_bytes(
    fd: RawFd,
    level: libc::c_int,
    opt: libc::c_int,
    payload: &[u8],
) -> io::Result<libc::c_int> {
    // SAFETY: the kernel reads at most `payload.len()` bytes.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            payload.as_ptr().cast(),
            payload.len() as libc::socklen_t,
        )
    };
    match rc {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n),
    }
}

/// Read an option in place. `payload` carries the input fields (usually the
/// association id) and receives the kernel's answer.
///
/// Caller must ensure `T` is the correct type for `opt`.
pub(crate) unsafe fn getsockopt_inout<T>(
    fd: RawFd,
    level: libc::c_int,
    opt: libc::c_int,
    payload: &mut T,
) -> io::Result<()> {
    let mut len = size_of::<T>() as libc::socklen_t;
    match libc::getsockopt(fd, level, opt, (payload as *mut T).cast(), &mut len) {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Caller must ensure `T` is the correct type for `opt`.
pub(crate) unsafe fn getsockopt<T>(fd: RawFd, level: libc::c_int, opt: libc::c_int) -> io::Result<T> {
    let mut payload: MaybeUninit<T> = MaybeUninit::zeroed();
    let mut len = size_of::<T>() as libc::socklen_t;
    match libc::getsockopt(fd, level, opt, payload.as_mut_ptr().cast(), &mut len) {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(payload.assume_init()),
    }
}

/// Read an option into a byte buffer, returning the length the kernel wrote.
pub(crate) fn getsockopt_bytes(
    fd: RawFd,
    level: libc::c_int,
    opt: libc::c_int,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut len = buf.len() as libc::socklen_t;
    // SAFETY: the kernel writes at most `len` bytes into `buf`.
    let rc = unsafe { libc::getsockopt(fd, level, opt, buf.as_mut_ptr().cast(), &mut len) };
    match rc {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(len as usize),
    }
}
