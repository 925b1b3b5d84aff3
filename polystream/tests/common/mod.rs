//! Shared helpers for the kernel-backed tests.
//!
//! Every test binds to loopback with an ephemeral port. Tests that need
//! kernel SCTP carry `#[ignore = "needs kernel SCTP (modprobe sctp)"]`, so a
//! host without it reports them as ignored rather than passed. Run them with
//! `cargo test -- --ignored`; there a missing SCTP stack fails the test.

#![allow(dead_code)]

use polystream::prelude::*;
use std::future::Future;
use std::time::{Duration, Instant};

pub const STREAMS: u16 = 10;

/// Reason attached to every test that needs the kernel stack.
pub const KERNEL_SCTP: &str = "needs kernel SCTP (modprobe sctp)";

pub fn unsupported(err: &SctpError) -> bool {
    let source = match err {
        SctpError::Io(e) | SctpError::Bind { source: e, .. } => e,
        _ => return false,
    };
    matches!(
        source.raw_os_error(),
        Some(libc::EPROTONOSUPPORT | libc::ESOCKTNOSUPPORT | libc::EAFNOSUPPORT)
    )
}

pub fn listen(addr: &str, mode: SocketMode) -> SctpListener {
    listen_with(
        addr,
        SctpOptions::new()
            .with_mode(mode)
            .with_init(InitParameters::with_streams(STREAMS)),
    )
}

pub fn listen_with(addr: &str, options: SctpOptions) -> SctpListener {
    polystream::dev_tracing::init_tracing();
    let address: Address = addr.parse().expect("valid literal");
    match SctpListener::listen_with_options(&address, options) {
        Err(e) if !unsupported(&e) => panic!("listen on {addr} failed: {e}"),
        other => require_supported(other),
    }
}

/// Unwrap `result`, failing with [`KERNEL_SCTP`] when the stack is missing.
pub fn require_supported<T>(result: Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) if unsupported(&e) => panic!("{KERNEL_SCTP}: {e}"),
        Err(e) => panic!("unexpected error: {e}"),
    }
}

/// The listener's bound address (with the kernel-assigned port).
pub fn local(listener: &SctpListener) -> Address {
    listener.local_addr().expect("local address")
}

pub async fn client(remote: &Address) -> SctpConnection {
    let conn = SctpConnection::new(
        remote.family(),
        InitParameters::with_streams(STREAMS),
        SocketMode::OneToOne,
        false,
    )
    .expect("open client");
    conn.connect(remote).await.expect("connect");
    conn
}

/// Drive `fut` on a runtime of its own; for bodies of spawned threads.
pub fn on_runtime<F: Future>(fut: F) -> F::Output {
    compio::runtime::Runtime::new()
        .expect("runtime")
        .block_on(fut)
}

/// Read the next payload message, skipping notifications.
pub async fn read_message(socket: &SctpSocket, buf: &mut [u8]) -> (Vec<u8>, MessageMetadata) {
    let mut message = Vec::new();
    loop {
        let outcome = socket.read(buf).await.expect("read");
        if outcome.is_notification() {
            continue;
        }
        message.extend_from_slice(&buf[..outcome.len]);
        if outcome.end_of_record() {
            return (message, outcome.metadata.expect("data metadata"));
        }
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        compio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
