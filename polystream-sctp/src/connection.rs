//! Connecting side of an SCTP socket.
//!
//! `SctpConnection` is what `connect`, `accept` and `peel_off` hand out. For
//! a one-to-one socket it is exactly one association; a one-to-many socket
//! opened this way can `connect` repeatedly, gaining one association per
//! call.

use parking_lot::Mutex;
use polystream_core::address::{Address, AddressFamily};
use polystream_core::assoc::AssocId;
use polystream_core::error::{Result, SctpError};
use polystream_core::mode::{SocketMode, SocketState};
use polystream_core::monitor::SocketEvent;
use polystream_core::options::{InitParameters, SctpOptions};
use std::io;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::descriptor::Interest;
use crate::sockaddr;
use crate::socket::SctpSocket;
use crate::sys;

/// Recheck interval while a blocking connect waits for the handshake.
const HANDSHAKE_RECHECK: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct SctpConnection {
    socket: SctpSocket,
    /// Remote and prior state of a one-to-one connect still in progress
    pending: Arc<Mutex<Option<(Address, SocketState)>>>,
}

impl SctpConnection {
    /// Open an unbound socket.
    pub fn new(
        family: AddressFamily,
        init: InitParameters,
        mode: SocketMode,
        nonblocking: bool,
    ) -> Result<Self> {
        let options = SctpOptions::new()
            .with_init(init)
            .with_mode(mode)
            .with_nonblocking(nonblocking);
        Self::with_options(family, options)
    }

    pub fn with_options(family: AddressFamily, options: SctpOptions) -> Result<Self> {
        SctpSocket::open(family, &options).map(Self::from_socket)
    }

    pub(crate) fn from_socket(socket: SctpSocket) -> Self {
        Self {
            socket,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Bind to a (possibly multi-homed) local address before connecting.
    pub fn bind(&self, address: &Address) -> Result<()> {
        self.socket.bind_to(address)?;
        if self.mode() == SocketMode::OneToMany {
            self.socket.transition(SocketState::Established);
        }
        Ok(())
    }

    /// Start an association to every host of `remote`.
    ///
    /// - one-to-one, blocking: resolves once the association is up or failed
    /// - one-to-one, non-blocking: returns [`SctpError::InProgress`];
    ///   complete it with [`finish_connect`](Self::finish_connect)
    /// - one-to-many: returns the new association's id as soon as the
    ///   handshake has started; `AssociationUp` follows on a later read
    ///
    /// A failed one-to-one connect leaves the handle in the state it had
    /// before the call.
    pub async fn connect(&self, remote: &Address) -> Result<AssocId> {
        let addrs = sockaddr::resolve(remote)?;
        let mode = self.mode();
        let before = self.state();
        match (mode, before) {
            (SocketMode::OneToOne, SocketState::Unbound | SocketState::Bound) => {
                if !self.socket.transition(SocketState::Connecting) {
                    return Err(self.socket.invalid_state("connect"));
                }
            }
            (
                SocketMode::OneToMany,
                SocketState::Unbound | SocketState::Bound | SocketState::Established,
            ) => {}
            _ => return Err(self.socket.invalid_state("connect")),
        }

        let started = self.connectx(&addrs);
        if mode == SocketMode::OneToMany {
            let id = started.map_err(|e| self.connect_error(remote, e))?;
            self.socket.transition(SocketState::Bound);
            self.socket.transition(SocketState::Established);
            debug!("[SCTP] association {} to {} started", id, remote);
            return Ok(id);
        }

        let id = match started {
            Ok(id) => id,
            Err(e) => {
                self.socket.transition(before);
                return Err(self.connect_error(remote, e));
            }
        };

        if self.is_nonblocking() {
            *self.pending.lock() = Some((remote.clone(), before));
            debug!("[SCTP] connect to {} in progress", remote);
            return Err(SctpError::InProgress);
        }

        if let Err(e) = self.handshake(remote).await {
            self.socket.transition(before);
            return Err(e);
        }
        self.complete(remote);
        Ok(id)
    }

    /// Wait until the one-to-one association leaves the handshake.
    async fn handshake(&self, remote: &Address) -> Result<()> {
        {
            let fd = self.descriptor().acquire()?;
            fd.wait(Interest::Writable).await?;
        }
        while !self.progress(remote)? {
            compio::time::sleep(HANDSHAKE_RECHECK).await;
            if self.is_closed() {
                return Err(SctpError::Closed);
            }
        }
        Ok(())
    }

    /// `true` once established, `false` while the handshake is running.
    fn progress(&self, remote: &Address) -> Result<bool> {
        if let Some(e) = self.descriptor().with_socket(|s| s.take_error())? {
            return Err(self.connect_error(remote, e));
        }
        match self.socket.status(AssocId::NONE) {
            Ok(status) if status.is_established() => Ok(true),
            Ok(status) if status.is_handshaking() => Ok(false),
            _ => Err(self.connect_error(
                remote,
                io::Error::from_raw_os_error(libc::ECONNREFUSED),
            )),
        }
    }

    fn connect_error(&self, remote: &Address, e: io::Error) -> SctpError {
        if self.is_closed() {
            SctpError::Closed
        } else {
            SctpError::connect(remote, e)
        }
    }

    /// Issue `SCTP_SOCKOPT_CONNECTX3`. `EINPROGRESS` still yields the id.
    fn connectx(&self, addrs: &[SocketAddr]) -> io::Result<AssocId> {
        let mut packed = sockaddr::encode_all(addrs);
        let mut arg = sys::sctp_getaddrs_old {
            assoc_id: 0,
            addr_num: packed.len() as libc::c_int,
            addrs: packed.as_mut_ptr().cast(),
        };
        let fd = self
            .descriptor()
            .acquire()
            .map_err(|_| io::Error::from_raw_os_error(libc::EBADF))?;

        // SAFETY: `arg.addrs` points at `packed`, which outlives the call and
        // holds `addr_num` bytes.
        let rc = unsafe {
            sys::getsockopt_inout(fd.fd(), sys::SOL_SCTP, sys::SCTP_SOCKOPT_CONNECTX3, &mut arg)
        };
        match rc {
            Ok(()) => Ok(AssocId(arg.assoc_id)),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(AssocId(arg.assoc_id)),
            Err(e) => Err(e),
        }
    }

    /// Complete a non-blocking connect.
    ///
    /// Returns [`SctpError::InProgress`] until the handshake finishes. On
    /// failure the handle goes back to the state it had before `connect`.
    pub fn finish_connect(&self) -> Result<()> {
        match self.state() {
            SocketState::Established => return Ok(()),
            SocketState::Connecting => {}
            _ => return Err(self.socket.invalid_state("finish connect")),
        }
        let mut pending = self.pending.lock();
        let Some((remote, before)) = pending.clone() else {
            return Err(self.socket.invalid_state("finish connect"));
        };
        match self.progress(&remote) {
            Ok(false) => Err(SctpError::InProgress),
            Ok(true) => {
                *pending = None;
                drop(pending);
                self.complete(&remote);
                Ok(())
            }
            Err(e) => {
                *pending = None;
                self.socket.transition(before);
                Err(e)
            }
        }
    }

    fn complete(&self, remote: &Address) {
        self.socket.transition(SocketState::Established);
        debug!("[SCTP] connected to {}", remote);
        self.emit_event(SocketEvent::Connected(remote.clone()));
    }

    /// The shared socket underneath.
    pub fn socket(&self) -> &SctpSocket {
        &self.socket
    }

    pub fn into_socket(self) -> SctpSocket {
        self.socket
    }
}

impl Deref for SctpConnection {
    type Target = SctpSocket;

    fn deref(&self) -> &SctpSocket {
        &self.socket
    }
}
