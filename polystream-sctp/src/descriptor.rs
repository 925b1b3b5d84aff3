//! Shared descriptor slot.
//!
//! A handle's socket is used concurrently by every in-flight call, while
//! `close` may run at any moment from another task. The slot keeps this safe:
//!
//! - The socket is always `O_NONBLOCK` at the kernel level. A handle in
//!   blocking mode awaits readiness through the compio runtime's `PollFd`,
//!   raced against the close signal, so a concurrent close wakes every
//!   waiter with `SctpError::Closed`.
//! - Each call holds the socket for its whole duration (`FdRef`). Close only
//!   detaches it from the slot; the descriptor is released when the last
//!   holder drops it, and exactly once.
//!
//! Waiting calls must be polled on a compio runtime. Calls on a
//! non-blocking handle never wait and need no runtime.

use compio::net::PollFd;
use futures::future::{self, Either};
use parking_lot::Mutex;
use polystream_core::error::{Result, SctpError};
use socket2::Socket;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
#[cfg(test)]
use std::sync::Weak;
use tracing::{debug, trace};

/// Readiness a call waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    Writable,
}

/// Borrowed view of the slot's descriptor, handed to the runtime.
///
/// Never closes the descriptor; the slot's `Socket` does.
#[derive(Debug, Clone, Copy)]
struct RawSocket(RawFd);

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl AsFd for RawSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: a `RawSocket` only lives inside a wait that holds an
        // `FdRef`, which keeps the descriptor open.
        unsafe { BorrowedFd::borrow_raw(self.0) }
    }
}

#[derive(Debug)]
pub(crate) struct Descriptor {
    fd: RawFd,
    socket: Mutex<Option<Arc<Socket>>>,
    closed: AtomicBool,
    nonblocking: AtomicBool,
    /// Dropped by `close`; every pending `wake.recv_async()` then resolves.
    close_tx: Mutex<Option<flume::Sender<()>>>,
    wake: flume::Receiver<()>,
    #[cfg(test)]
    weak: Weak<Socket>,
}

/// One in-flight use of the descriptor.
pub(crate) struct FdRef<'a> {
    slot: &'a Descriptor,
    socket: Arc<Socket>,
}

impl FdRef<'_> {
    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Wait until the socket is ready for `interest` or the slot is closed.
    pub(crate) async fn wait(&self, interest: Interest) -> Result<()> {
        self.slot.wait(self.fd(), interest).await
    }
}

impl Descriptor {
    pub(crate) fn new(socket: Socket, nonblocking: bool) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let (close_tx, wake) = flume::bounded(1);
        let socket = Arc::new(socket);
        Ok(Self {
            fd: socket.as_raw_fd(),
            #[cfg(test)]
            weak: Arc::downgrade(&socket),
            socket: Mutex::new(Some(socket)),
            closed: AtomicBool::new(false),
            nonblocking: AtomicBool::new(nonblocking),
            close_tx: Mutex::new(Some(close_tx)),
            wake,
        })
    }

    #[inline]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub(crate) fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Relaxed)
    }

    pub(crate) fn set_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take a reference for the duration of one call.
    pub(crate) fn acquire(&self) -> Result<FdRef<'_>> {
        match self.socket.lock().as_ref() {
            Some(socket) => Ok(FdRef {
                slot: self,
                socket: Arc::clone(socket),
            }),
            None => Err(SctpError::Closed),
        }
    }

    /// Run a short, non-blocking operation against the socket itself.
    pub(crate) fn with_socket<T>(&self, op: impl FnOnce(&Socket) -> io::Result<T>) -> Result<T> {
        let fd = self.acquire()?;
        op(&fd.socket).map_err(SctpError::from_io)
    }

    /// Retry `op` until it stops reporting would-block.
    ///
    /// Blocking handles await `interest` between attempts; non-blocking
    /// handles surface [`SctpError::WouldBlock`]. Any failure after close
    /// began reads as [`SctpError::Closed`].
    pub(crate) async fn io<T>(
        &self,
        interest: Interest,
        mut op: impl FnMut(RawFd) -> io::Result<T>,
    ) -> Result<T> {
        let fd = self.acquire()?;
        loop {
            match op(fd.fd()) {
                Ok(v) => return Ok(v),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.is_closed() {
                        return Err(SctpError::Closed);
                    }
                    if self.is_nonblocking() {
                        return Err(SctpError::WouldBlock);
                    }
                    fd.wait(interest).await?;
                }
                Err(_) if self.is_closed() => return Err(SctpError::Closed),
                Err(e) => return Err(SctpError::from_io(e)),
            }
        }
    }

    async fn wait(&self, fd: RawFd, interest: Interest) -> Result<()> {
        if self.is_closed() {
            return Err(SctpError::Closed);
        }
        let poll = PollFd::new(RawSocket(fd)).map_err(SctpError::from_io)?;
        let ready = pin!(async {
            match interest {
                Interest::Readable => poll.read_ready().await,
                Interest::Writable => poll.write_ready().await,
            }
        });
        // Resolves once `close` drops the sender; nothing is ever sent.
        let woken = pin!(self.wake.recv_async());

        // Losing the race drops the readiness future, cancelling its op.
        match future::select(ready, woken).await {
            Either::Left((Ok(()), _)) if !self.is_closed() => Ok(()),
            Either::Left((Err(e), _)) if !self.is_closed() => Err(SctpError::from_io(e)),
            _ => Err(SctpError::Closed),
        }
    }

    /// Detach the socket and wake every waiter.
    ///
    /// Only the first call succeeds; later calls return
    /// [`SctpError::Closed`].
    pub(crate) fn close(&self) -> Result<()> {
        let socket = self.socket.lock().take().ok_or(SctpError::Closed)?;
        self.closed.store(true, Ordering::Release);
        drop(self.close_tx.lock().take());

        if let Err(e) = socket.shutdown(std::net::Shutdown::Both) {
            if e.raw_os_error() != Some(libc::ENOTCONN) {
                debug!("[DESCRIPTOR] shutdown of fd {} failed: {}", self.fd, e);
            }
        }

        let in_flight = Arc::strong_count(&socket) - 1;
        if in_flight > 0 {
            trace!(
                "[DESCRIPTOR] fd {} closed with {} call(s) in flight",
                self.fd,
                in_flight
            );
        } else {
            trace!("[DESCRIPTOR] releasing fd {}", self.fd);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_released(&self) -> bool {
        self.weak.strong_count() == 0
    }
}
