//! Socket address marshalling.
//!
//! The SCTP administrative options (bindx, connectx, get-local/peer-addrs)
//! exchange *packed* address lists: each entry is a `sockaddr_in` (16 bytes)
//! or `sockaddr_in6` (28 bytes), back to back, with no padding to
//! `sockaddr_storage`. Ports and IPv6 flow info are big-endian, the family
//! and scope id are native.

use bytes::{Buf, BufMut, BytesMut};
use polystream_core::address::{Address, AddressError};
use polystream_core::error::{Result, SctpError};
use smallvec::SmallVec;
use std::ffi::CString;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

pub const SOCKADDR_IN_LEN: usize = 16;
pub const SOCKADDR_IN6_LEN: usize = 28;

const AF_INET: u16 = libc::AF_INET as u16;
const AF_INET6: u16 = libc::AF_INET6 as u16;

/// Encoded length of one address.
#[inline]
pub const fn encoded_len(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => SOCKADDR_IN_LEN,
        SocketAddr::V6(_) => SOCKADDR_IN6_LEN,
    }
}

/// Append one address in kernel layout.
pub fn encode(addr: &SocketAddr, out: &mut BytesMut) {
    out.reserve(encoded_len(addr));
    match addr {
        SocketAddr::V4(v4) => {
            out.put_u16_ne(AF_INET);
            out.put_u16(v4.port());
            out.put_slice(&v4.ip().octets());
            out.put_bytes(0, 8);
        }
        SocketAddr::V6(v6) => {
            out.put_u16_ne(AF_INET6);
            out.put_u16(v6.port());
            out.put_u32(v6.flowinfo());
            out.put_slice(&v6.ip().octets());
            out.put_u32_ne(v6.scope_id());
        }
    }
}

/// Pack a list of addresses for bindx/connectx.
pub fn encode_all(addrs: &[SocketAddr]) -> BytesMut {
    let mut out = BytesMut::with_capacity(addrs.iter().map(encoded_len).sum());
    for addr in addrs {
        encode(addr, &mut out);
    }
    out
}

/// Decode one address from the front of `buf`, advancing past it.
///
/// IPv4-mapped IPv6 addresses (reported on IPv6 sockets for IPv4 paths) are
/// returned as plain IPv4.
pub fn decode(buf: &mut &[u8]) -> Result<SocketAddr> {
    if buf.len() < 2 {
        return Err(SctpError::protocol_decode("sockaddr: missing family"));
    }
    let family = u16::from_ne_bytes([buf[0], buf[1]]);
    match family {
        AF_INET => {
            if buf.len() < SOCKADDR_IN_LEN {
                return Err(SctpError::protocol_decode("sockaddr_in: short buffer"));
            }
            buf.advance(2);
            let port = buf.get_u16();
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            buf.advance(8);
            Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port)))
        }
        AF_INET6 => {
            if buf.len() < SOCKADDR_IN6_LEN {
                return Err(SctpError::protocol_decode("sockaddr_in6: short buffer"));
            }
            buf.advance(2);
            let port = buf.get_u16();
            let flowinfo = buf.get_u32();
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let scope_id = buf.get_u32_ne();
            let ip = Ipv6Addr::from(octets);
            Ok(match ip.to_ipv4_mapped() {
                Some(v4) => SocketAddr::V4(SocketAddrV4::new(v4, port)),
                None => SocketAddr::V6(SocketAddrV6::new(ip, port, flowinfo, scope_id)),
            })
        }
        other => Err(SctpError::protocol_decode(format!(
            "sockaddr: unsupported family {other}"
        ))),
    }
}

/// Decode `count` packed addresses.
pub fn decode_packed(mut buf: &[u8], count: usize) -> Result<SmallVec<[SocketAddr; 4]>> {
    let mut out = SmallVec::with_capacity(count);
    for _ in 0..count {
        out.push(decode(&mut buf)?);
    }
    Ok(out)
}

/// Decode a `sockaddr_storage` embedded in a kernel record. An all-zero
/// (unset) storage decodes to `None`.
pub fn decode_storage(bytes: &[u8]) -> Result<Option<SocketAddr>> {
    if bytes.len() >= 2 && bytes[0] == 0 && bytes[1] == 0 {
        return Ok(None);
    }
    let mut buf = bytes;
    decode(&mut buf).map(Some)
}

/// Build a `sockaddr_storage` holding `addr`.
pub fn to_storage(addr: &SocketAddr) -> libc::sockaddr_storage {
    let mut encoded = BytesMut::with_capacity(SOCKADDR_IN6_LEN);
    encode(addr, &mut encoded);
    let mut storage: libc::sockaddr_storage = crate::sys::zeroed();
    // SAFETY: `encoded` is at most 28 bytes and sockaddr_storage is 128.
    unsafe {
        std::ptr::copy_nonoverlapping(
            encoded.as_ptr(),
            (&mut storage as *mut libc::sockaddr_storage).cast::<u8>(),
            encoded.len(),
        );
    }
    storage
}

/// Resolve an interface name to its index (`if_nametoindex(3)`).
pub fn interface_index(name: &str) -> Option<u32> {
    let name = CString::new(name).ok()?;
    // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
    match unsafe { libc::if_nametoindex(name.as_ptr()) } {
        0 => None,
        index => Some(index),
    }
}

/// Socket addresses for `address`, resolving named zones to interface indices.
pub fn resolve(address: &Address) -> std::result::Result<Vec<SocketAddr>, AddressError> {
    address.socket_addrs_with(interface_index)
}

/// Inverse of [`resolve`] for addresses the kernel reports.
pub fn to_address(addrs: &[SocketAddr]) -> Result<Address> {
    Ok(Address::from_socket_addrs(addrs)?)
}
