//! Non-blocking writes under backpressure report WouldBlock and a retried
//! message still arrives intact.

mod common;

use polystream::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

const MESSAGE: usize = 4096;
const MAX_SENDS: u64 = 100_000;

fn message(seq: u64) -> Vec<u8> {
    let mut payload = vec![(seq % 251) as u8; MESSAGE];
    payload[..8].copy_from_slice(&seq.to_be_bytes());
    payload
}

async fn connect_nonblocking(remote: &Address) -> SctpConnection {
    let conn = SctpConnection::new(
        remote.family(),
        InitParameters::with_streams(common::STREAMS),
        SocketMode::OneToOne,
        true,
    )
    .unwrap();
    match conn.connect(remote).await {
        Ok(_) => {}
        Err(SctpError::InProgress) => {
            assert_eq!(conn.state(), SocketState::Connecting);
            let connected = common::eventually(Duration::from_secs(5), || {
                match conn.finish_connect() {
                    Ok(()) => true,
                    Err(SctpError::InProgress) => false,
                    Err(e) => panic!("connect failed: {e}"),
                }
            })
            .await;
            assert!(connected);
        }
        Err(e) => panic!("connect failed: {e}"),
    }
    assert_eq!(conn.state(), SocketState::Established);
    conn
}

#[compio::test]
#[ignore = "needs kernel SCTP (modprobe sctp)"]
async fn test_saturated_send_would_block_then_recovers() {
    let listener = common::listen("127.0.0.1:0", SocketMode::OneToOne);
    let remote = common::local(&listener);
    let client = connect_nonblocking(&remote).await;
    let server = listener.accept().await.unwrap();

    // Nobody reads yet: fill the peer's window and our send buffer
    let mut sent = 0u64;
    let blocked = loop {
        assert!(sent < MAX_SENDS, "send path never saturated");
        let payload = message(sent);
        match client.write(&payload, &MessageMetadata::new()).await {
            Ok(n) => {
                assert_eq!(n, MESSAGE);
                sent += 1;
            }
            Err(e) => {
                assert!(e.is_transient(), "expected WouldBlock, got {e:?}");
                assert!(matches!(e, SctpError::WouldBlock));
                break payload;
            }
        }
    };
    let last = sent;

    let drain = {
        let server = server.clone();
        thread::spawn(move || {
            common::on_runtime(async move {
                let mut buf = vec![0u8; MESSAGE * 2];
                for expected in 0..=last {
                    let (payload, _) = common::read_message(&server, &mut buf).await;
                    assert_eq!(payload, message(expected), "message {expected} corrupted");
                }
            })
        })
    };

    // Retry the very message that would have blocked
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match client.write(&blocked, &MessageMetadata::new()).await {
            Ok(n) => {
                assert_eq!(n, MESSAGE);
                break;
            }
            Err(SctpError::WouldBlock) => {
                assert!(Instant::now() < deadline, "send path never drained");
                compio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("retry failed: {e}"),
        }
    }

    drain.join().unwrap();
    client.close().unwrap();
    server.close().unwrap();
}

#[compio::test]
#[ignore = "needs kernel SCTP (modprobe sctp)"]
async fn test_nonblocking_read_would_block() {
    let listener = common::listen("127.0.0.1:0", SocketMode::OneToOne);
    let remote = common::local(&listener);
    let client = connect_nonblocking(&remote).await;
    let server = listener.accept().await.unwrap();

    let mut buf = [0u8; 64];
    assert!(matches!(client.read(&mut buf).await, Err(SctpError::WouldBlock)));

    server.set_nonblocking(true).unwrap();
    assert!(server.is_nonblocking());
    assert!(matches!(server.read(&mut buf).await, Err(SctpError::WouldBlock)));

    client.write(b"now", &MessageMetadata::new()).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let got = loop {
        match server.read(&mut buf).await {
            Ok(o) if !o.is_notification() => break buf[..o.len].to_vec(),
            Ok(_) => {}
            Err(SctpError::WouldBlock) => {
                assert!(Instant::now() < deadline, "message never arrived");
                compio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("read failed: {e}"),
        }
    };
    assert_eq!(got, b"now");
}
