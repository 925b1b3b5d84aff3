//! Listening side of an SCTP socket.
//!
//! A one-to-one listener hands out one [`SctpConnection`] per accepted
//! association. A one-to-many listener never accepts: it is `Established`
//! as soon as it listens, and every association arrives on the listener
//! itself, demultiplexed by association id.

use polystream_core::address::Address;
use polystream_core::error::{Result, SctpError};
use polystream_core::mode::{SocketMode, SocketState};
use polystream_core::monitor::SocketEvent;
use polystream_core::options::{InitParameters, SctpOptions};
use socket2::Socket;
use std::io;
use std::ops::Deref;
use std::os::unix::io::FromRawFd;
use tracing::debug;

use crate::connection::SctpConnection;
use crate::descriptor::Interest;
use crate::socket::SctpSocket;

#[derive(Debug, Clone)]
pub struct SctpListener {
    socket: SctpSocket,
}

impl SctpListener {
    /// Bind to `address` (every host, for multi-homing) and listen.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use polystream_sctp::SctpListener;
    /// use polystream_core::prelude::*;
    ///
    /// # #[compio::main]
    /// # async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    /// let addr: Address = "127.0.0.1/127.0.0.2:9999".parse()?;
    /// let listener = SctpListener::listen(&addr, InitParameters::with_streams(10), SocketMode::OneToOne, false)?;
    /// let conn = listener.accept().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn listen(
        address: &Address,
        init: InitParameters,
        mode: SocketMode,
        nonblocking: bool,
    ) -> Result<Self> {
        let options = SctpOptions::new()
            .with_init(init)
            .with_mode(mode)
            .with_nonblocking(nonblocking);
        Self::listen_with_options(address, options)
    }

    pub fn listen_with_options(address: &Address, options: SctpOptions) -> Result<Self> {
        let socket = SctpSocket::open(address.family(), &options)?;
        socket.bind_to(address)?;

        let backlog = options.backlog;
        socket
            .descriptor()
            .with_socket(|s| s.listen(backlog))
            .map_err(|e| match e {
                SctpError::Io(source) | SctpError::Terminal(source) => {
                    SctpError::bind(address, source)
                }
                other => other,
            })?;

        let next = match socket.mode() {
            SocketMode::OneToOne => SocketState::Listening,
            SocketMode::OneToMany => SocketState::Established,
        };
        socket.transition(next);

        let local = socket.local_addr().unwrap_or_else(|_| address.clone());
        debug!("[SCTP] {} listener on {}", socket.mode(), local);
        socket.emit_event(SocketEvent::Listening(local));
        Ok(Self { socket })
    }

    /// Wait for the next association (one-to-one only).
    ///
    /// A concurrent [`close`](SctpSocket::close) makes every blocked
    /// `accept` return [`SctpError::Closed`].
    pub async fn accept(&self) -> Result<SctpConnection> {
        if self.mode() != SocketMode::OneToOne || self.state() != SocketState::Listening {
            return Err(self.socket.invalid_state("accept"));
        }

        let raw = self
            .descriptor()
            .io(Interest::Readable, |fd| {
                // SAFETY: null address arguments are allowed; the returned
                // descriptor is owned below.
                let rc = unsafe {
                    libc::accept4(
                        fd,
                        std::ptr::null_mut(),
                        std::ptr::null_mut(),
                        libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                    )
                };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(rc)
                }
            })
            .await?;
        // SAFETY: `raw` is a fresh descriptor nothing else owns.
        let accepted = unsafe { Socket::from_raw_fd(raw) };
        if self.is_closed() {
            return Err(SctpError::Closed);
        }

        let socket = SctpSocket::from_socket(
            accepted,
            self.family(),
            self.socket.options().clone(),
            SocketState::Established,
        )?;
        socket.set_events(self.events())?;
        let conn = SctpConnection::from_socket(socket);

        match conn.peer_addr() {
            Ok(peer) => {
                debug!("[SCTP] accepted association from {}", peer);
                self.emit_event(SocketEvent::Accepted(peer));
            }
            Err(e) => debug!("[SCTP] accepted association, peer unknown: {}", e),
        }
        Ok(conn)
    }

    /// The shared socket underneath.
    pub fn socket(&self) -> &SctpSocket {
        &self.socket
    }

    pub fn into_socket(self) -> SctpSocket {
        self.socket
    }
}

impl Deref for SctpListener {
    type Target = SctpSocket;

    fn deref(&self) -> &SctpSocket {
        &self.socket
    }
}
