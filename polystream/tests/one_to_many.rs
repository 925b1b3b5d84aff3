//! A pool of readers sharing one one-to-many socket.

mod common;

use polystream::prelude::*;
use polystream::sctp::Incoming;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

const PEERS: usize = 3;
const MESSAGES: usize = 20;
const READERS: usize = 4;

#[compio::test]
#[ignore = "needs kernel SCTP (modprobe sctp)"]
async fn test_readers_demultiplex_by_association() {
    let server = common::listen("127.0.0.1:0", SocketMode::OneToMany);
    assert_eq!(server.state(), SocketState::Established);
    let remote = common::local(&server);
    let (msg_tx, msg_rx) = flume::unbounded();

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let server = server.clone();
            let msg_tx = msg_tx.clone();
            thread::spawn(move || {
                common::on_runtime(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        match server.read_event(&mut buf).await {
                            Ok(Incoming::Data { len, metadata, .. }) => {
                                let meta = metadata.expect("data metadata");
                                msg_tx.send((meta.assoc_id, buf[..len].to_vec())).unwrap();
                            }
                            Ok(_) => {}
                            Err(SctpError::Closed) => return,
                            Err(e) => panic!("read failed: {e}"),
                        }
                    }
                })
            })
        })
        .collect();

    let peers: Vec<_> = (0..PEERS)
        .map(|p| {
            let remote = remote.clone();
            thread::spawn(move || {
                common::on_runtime(async move {
                    let conn = common::client(&remote).await;
                    for m in 0..MESSAGES {
                        let payload = format!("peer{p}-msg{m}");
                        conn.write(payload.as_bytes(), &MessageMetadata::new().with_stream(1))
                            .await
                            .unwrap();
                    }
                    conn
                })
            })
        })
        .collect();
    let clients: Vec<SctpConnection> = peers.into_iter().map(|h| h.join().unwrap()).collect();

    // assoc id -> payloads, in arrival order per association
    let mut by_assoc: HashMap<AssocId, Vec<String>> = HashMap::new();
    for _ in 0..PEERS * MESSAGES {
        let (assoc, payload) = compio::time::timeout(Duration::from_secs(10), msg_rx.recv_async())
            .await
            .expect("all messages arrive")
            .unwrap();
        by_assoc
            .entry(assoc)
            .or_default()
            .push(String::from_utf8(payload).unwrap());
    }
    assert_eq!(by_assoc.len(), PEERS);
    for payloads in by_assoc.values() {
        assert_eq!(payloads.len(), MESSAGES);
        let peer = payloads[0].split('-').next().unwrap().to_string();
        assert!(payloads.iter().all(|p| p.starts_with(&peer)));
    }

    assert!(
        common::eventually(Duration::from_secs(2), || {
            server.associations().len() == PEERS
        })
        .await
    );
    let mut ids: Vec<AssocId> = by_assoc.keys().copied().collect();
    ids.sort_unstable();
    assert_eq!(server.associations().live_ids(), ids);

    // Several live associations: an untargeted write is ambiguous
    assert!(matches!(
        server.write(b"?", &MessageMetadata::new()).await,
        Err(SctpError::AmbiguousAssociation { live: PEERS })
    ));

    server.close().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    for c in clients {
        c.close().unwrap();
    }
}

#[compio::test]
#[ignore = "needs kernel SCTP (modprobe sctp)"]
async fn test_reply_to_association() {
    let server = common::listen("127.0.0.1:0", SocketMode::OneToMany);
    let remote = common::local(&server);

    let client = thread::spawn(move || {
        common::on_runtime(async move {
            let conn = common::client(&remote).await;
            conn.write(b"ping", &MessageMetadata::new().with_stream(3))
                .await
                .unwrap();
            let mut buf = [0u8; 64];
            let (reply, meta) = common::read_message(&conn, &mut buf).await;
            assert_eq!(reply, b"pong");
            assert_eq!(meta.stream, 3);
            conn
        })
    });

    let mut buf = [0u8; 512];
    let (payload, meta) = common::read_message(&server, &mut buf).await;
    assert_eq!(payload, b"ping");
    assert!(server.associations().is_live(meta.assoc_id));

    let reply = MessageMetadata::new()
        .with_stream(meta.stream)
        .with_assoc(meta.assoc_id);
    server.write(b"pong", &reply).await.unwrap();

    let peer = server.peer_addr_for(meta.assoc_id).unwrap();
    assert_eq!(peer.family(), AddressFamily::Ipv4);

    client.join().unwrap().close().unwrap();
}

#[compio::test]
#[ignore = "needs kernel SCTP (modprobe sctp)"]
async fn test_one_to_many_connect_returns_association() {
    let server = common::listen("127.0.0.1:0", SocketMode::OneToMany);
    let remote = common::local(&server);

    let client = SctpConnection::with_options(
        AddressFamily::Ipv4,
        SctpOptions::new()
            .with_mode(SocketMode::OneToMany)
            .with_init(InitParameters::with_streams(common::STREAMS)),
    )
    .unwrap();
    let assoc = client.connect(&remote).await.unwrap();
    assert!(!assoc.is_none());
    assert_eq!(client.state(), SocketState::Established);

    // COMM_UP arrives as a notification and registers the id
    let mut buf = [0u8; 512];
    let up = loop {
        match client.read_event(&mut buf).await.unwrap() {
            Incoming::Notification(Notification::AssociationChange {
                state: AssociationState::CommUp,
                assoc_id,
                ..
            }) => break assoc_id,
            _ => continue,
        }
    };
    assert_eq!(up, assoc);
    assert!(client.associations().is_live(assoc));

    // With one live association the id may be left out
    client.write(b"implicit", &MessageMetadata::new()).await.unwrap();
    let (payload, _) = common::read_message(&server, &mut buf).await;
    assert_eq!(payload, b"implicit");

    client.close().unwrap();
    server.close().unwrap();
}
