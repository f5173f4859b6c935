use crate::{
    application::{Peer, PeerError},
    config::{Config, ConfigPorts},
    domain::PeerEvent,
    infra::network::tcp::TcpSender,
    proto::{Frame, FrameKind, wire},
};
use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream, UdpSocket},
    sync::mpsc::UnboundedReceiver,
    time,
};

type Events = UnboundedReceiver<PeerEvent>;

fn test_config(peer_id: &str) -> Config {
    Config {
        peer_id: Some(peer_id.to_string()),
        broadcast_addr: Ipv4Addr::LOCALHOST,
        broadcast_interval_secs: 1,
        chunk_size: 1024,
        control_timeout_secs: 2,
        file_timeout_secs: 5,
        ports: ConfigPorts {
            transport: 0,
            discovery: 0,
        },
        ..Config::default()
    }
}

async fn started(peer_id: &str) -> (Peer, Events) {
    started_with(test_config(peer_id)).await
}

async fn started_with(config: Config) -> (Peer, Events) {
    let (mut peer, events) = Peer::new(config);
    peer.start().await.unwrap();
    (peer, events)
}

fn messaging_addr(peer: &Peer) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, peer.port().unwrap()))
}

/// A bare sender speaking as `peer_id`, for peers that are not a full `Peer`.
fn raw_sender(peer_id: &str) -> TcpSender {
    TcpSender::new(
        peer_id.into(),
        Duration::from_secs(2),
        Duration::from_secs(2),
        1024,
    )
}

/// Makes `listener` hear a discovery broadcast from `speaker`.
async fn announce(listener: &Peer, listener_events: &mut Events, speaker: &Peer) {
    announce_as(
        listener,
        listener_events,
        speaker.peer_id(),
        speaker.port().unwrap(),
    )
    .await;
}

async fn announce_as(listener: &Peer, listener_events: &mut Events, peer_id: &str, port: u16) {
    let frame = Frame::new(
        peer_id,
        FrameKind::PeerDiscovery {
            peer_id: peer_id.to_string(),
            port,
        },
    );
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    socket
        .send_to(
            &wire::encode(&frame).unwrap(),
            (Ipv4Addr::LOCALHOST, listener.discovery_port().unwrap()),
        )
        .await
        .unwrap();

    let id = peer_id.to_string();
    wait_for(listener_events, |e| {
        matches!(e, PeerEvent::PeerDiscovered { peer_id, .. } if *peer_id == id)
    })
    .await;
}

async fn wait_for(events: &mut Events, mut pred: impl FnMut(&PeerEvent) -> bool) -> PeerEvent {
    time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

/// Drains what is queued and fails on any transfer outcome.
async fn assert_no_transfer_events(events: &mut Events) {
    time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                PeerEvent::FileResponse { .. }
                    | PeerEvent::FileProgress { .. }
                    | PeerEvent::FileComplete { .. }
                    | PeerEvent::FileError { .. }
            ),
            "unexpected {event:?}"
        );
    }
}

async fn wait_until_idle(peer: &Peer) {
    for _ in 0..50 {
        if peer.active_transfers().await == 0 {
            return;
        }
        time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_message_round_trip() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, mut bob_events) = started("bob").await;

    announce(&alice, &mut alice_events, &bob).await;
    assert!(alice.get_known_peers().contains_key("bob"));

    alice.send_message("bob", "hello bob").await.unwrap();

    let event = wait_for(&mut bob_events, |e| {
        matches!(e, PeerEvent::MessageReceived { .. })
    })
    .await;
    assert_eq!(
        event,
        PeerEvent::MessageReceived {
            from: "alice".into(),
            text: "hello bob".into(),
        }
    );

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn test_operations_need_a_running_known_peer() {
    let (mut alice, _events) = started("alice").await;

    assert!(matches!(
        alice.send_message("ghost", "hi").await,
        Err(PeerError::UnknownPeer(id)) if id == "ghost"
    ));
    assert!(matches!(
        alice.accept_file("no-such-id", "/tmp/x").await,
        Err(PeerError::UnknownTransfer(_))
    ));
    assert!(matches!(
        alice.reject_file("no-such-id").await,
        Err(PeerError::UnknownTransfer(_))
    ));

    alice.stop().await;
    alice.stop().await;
    assert!(!alice.is_running());
    assert!(alice.get_known_peers().is_empty());
    assert!(matches!(
        alice.send_message("bob", "hi").await,
        Err(PeerError::NotRunning)
    ));
}

#[tokio::test]
async fn test_send_file_validates_the_source() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, _bob_events) = started("bob").await;
    announce(&alice, &mut alice_events, &bob).await;

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.txt");

    assert!(matches!(
        alice.send_file("bob", &missing).await,
        Err(PeerError::FileNotFound(_))
    ));
    assert!(matches!(
        alice.send_file("bob", dir.path()).await,
        Err(PeerError::FileNotFound(_))
    ));
    assert_eq!(alice.pending_requests(), 0);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn test_file_round_trip() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, mut bob_events) = started("bob").await;
    announce(&alice, &mut alice_events, &bob).await;
    announce(&bob, &mut bob_events, &alice).await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("report.bin");
    let destination = dir.path().join("received.bin");
    let contents: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&source, &contents).await.unwrap();

    let file_id = alice.send_file("bob", &source).await.unwrap();
    assert_eq!(alice.pending_requests(), 1);

    let request = wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileRequest { .. })).await;
    assert_eq!(
        request,
        PeerEvent::FileRequest {
            from: "alice".into(),
            file_id: file_id.clone(),
            filename: "report.bin".into(),
            filesize: 5000,
        }
    );

    bob.accept_file(&file_id, &destination).await.unwrap();

    let response =
        wait_for(&mut alice_events, |e| matches!(e, PeerEvent::FileResponse { .. })).await;
    assert!(matches!(
        response,
        PeerEvent::FileResponse { accepted: true, save_path: Some(_), .. }
    ));

    let mut progress = 0;
    let complete = wait_for(&mut bob_events, |e| match e {
        PeerEvent::FileProgress { .. } => {
            progress += 1;
            false
        }
        other => matches!(other, PeerEvent::FileComplete { .. }),
    })
    .await;
    assert_eq!(
        complete,
        PeerEvent::FileComplete {
            from: "alice".into(),
            file_id: file_id.clone(),
            filename: "report.bin".into(),
        }
    );
    assert_eq!(progress, 5);
    assert_eq!(tokio::fs::read(&destination).await.unwrap(), contents);

    // Exactly one completion.
    time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = bob_events.try_recv() {
        assert!(!matches!(event, PeerEvent::FileComplete { .. }));
    }

    assert_eq!(alice.pending_requests(), 0);
    assert_eq!(bob.active_transfers().await, 0);
    // The sender drops its side once the stream task finishes.
    wait_until_idle(&alice).await;
    assert_eq!(alice.active_transfers().await, 0);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn test_rejected_offer() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, mut bob_events) = started("bob").await;
    announce(&alice, &mut alice_events, &bob).await;
    announce(&bob, &mut bob_events, &alice).await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.txt");
    tokio::fs::write(&source, b"nope").await.unwrap();

    let file_id = alice.send_file("bob", &source).await.unwrap();
    wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileRequest { .. })).await;

    bob.reject_file(&file_id).await.unwrap();
    assert_eq!(bob.active_transfers().await, 0);

    let response =
        wait_for(&mut alice_events, |e| matches!(e, PeerEvent::FileResponse { .. })).await;
    assert!(matches!(response, PeerEvent::FileResponse { accepted: false, .. }));

    let error = wait_for(&mut alice_events, |e| matches!(e, PeerEvent::FileError { .. })).await;
    assert_eq!(
        error,
        PeerEvent::FileError {
            from: "bob".into(),
            file_id,
            error: "rejected".into(),
        }
    );
    assert_eq!(alice.pending_requests(), 0);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn test_unwritable_destination_discards_the_transfer() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, mut bob_events) = started("bob").await;
    announce(&alice, &mut alice_events, &bob).await;
    announce(&bob, &mut bob_events, &alice).await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.txt");
    tokio::fs::write(&source, b"data").await.unwrap();

    let file_id = alice.send_file("bob", &source).await.unwrap();
    wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileRequest { .. })).await;

    let unwritable = dir.path().join("no-such-dir").join("a.txt");
    assert!(matches!(
        bob.accept_file(&file_id, &unwritable).await,
        Err(PeerError::Destination { .. })
    ));
    assert_eq!(bob.active_transfers().await, 0);

    // No answer went out, so the offer is still open on the sending side.
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(alice.pending_requests(), 1);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn test_reject_can_be_retried_after_delivery_failure() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, mut bob_events) = started("bob").await;
    announce(&alice, &mut alice_events, &bob).await;
    announce(&bob, &mut bob_events, &alice).await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.txt");
    tokio::fs::write(&source, b"data").await.unwrap();

    let file_id = alice.send_file("bob", &source).await.unwrap();
    wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileRequest { .. })).await;

    alice.stop().await;

    assert!(matches!(
        bob.reject_file(&file_id).await,
        Err(PeerError::Transport(_))
    ));
    assert_eq!(bob.active_transfers().await, 1);

    assert!(bob.reject_file(&file_id).await.is_err());
    assert_eq!(bob.active_transfers().await, 1);

    bob.stop().await;
}

#[tokio::test]
async fn test_remote_error_discards_an_accepted_transfer() {
    let (mut bob, mut bob_events) = started("bob").await;
    let carol_inbox = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let carol_port = carol_inbox.local_addr().unwrap().port();
    announce_as(&bob, &mut bob_events, "carol", carol_port).await;

    let carol = raw_sender("carol");
    let bob_addr = messaging_addr(&bob);
    carol
        .send_file_request(bob_addr, "f-1", "notes.txt", 10)
        .await
        .unwrap();
    wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileRequest { .. })).await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("notes.txt");
    bob.accept_file("f-1", &destination).await.unwrap();
    assert_eq!(bob.active_transfers().await, 1);

    carol
        .send_file_error(bob_addr, "f-1", "source vanished")
        .await
        .unwrap();

    let error = wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileError { .. })).await;
    assert_eq!(
        error,
        PeerEvent::FileError {
            from: "carol".into(),
            file_id: "f-1".into(),
            error: "source vanished".into(),
        }
    );
    assert_eq!(bob.active_transfers().await, 0);

    // A chunk arriving after the discard is dropped without trace.
    let late = Frame::new(
        "carol",
        FrameKind::FileChunk {
            file_id: "f-1".into(),
            chunk_num: 0,
        },
    );
    let mut stream = TcpStream::connect(bob_addr).await.unwrap();
    wire::write_chunk(&mut stream, &late, b"late").await.unwrap();
    drop(stream);

    assert_no_transfer_events(&mut bob_events).await;
    assert_eq!(bob.active_transfers().await, 0);
    assert!(tokio::fs::read(&destination).await.unwrap().is_empty());

    bob.stop().await;
}

#[tokio::test]
async fn test_response_from_another_peer_is_ignored() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, _bob_events) = started("bob").await;
    announce(&alice, &mut alice_events, &bob).await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.txt");
    tokio::fs::write(&source, b"data").await.unwrap();

    let file_id = alice.send_file("bob", &source).await.unwrap();

    raw_sender("mallory")
        .send_file_response(messaging_addr(&alice), &file_id, true, Some("/tmp/a.txt".into()))
        .await
        .unwrap();

    assert_no_transfer_events(&mut alice_events).await;
    assert_eq!(alice.pending_requests(), 1);
    assert_eq!(alice.active_transfers().await, 0);

    alice.stop().await;
    bob.stop().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_failed_disk_write_reports_an_error() {
    let (mut alice, mut alice_events) = started("alice").await;
    let (mut bob, mut bob_events) = started("bob").await;
    announce(&alice, &mut alice_events, &bob).await;
    announce(&bob, &mut bob_events, &alice).await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("s.bin");
    tokio::fs::write(&source, [7u8; 100]).await.unwrap();

    let file_id = alice.send_file("bob", &source).await.unwrap();
    wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileRequest { .. })).await;

    // Every write to /dev/full fails with ENOSPC.
    bob.accept_file(&file_id, "/dev/full").await.unwrap();

    let outcome = wait_for(&mut bob_events, |e| {
        matches!(e, PeerEvent::FileComplete { .. } | PeerEvent::FileError { .. })
    })
    .await;
    assert!(
        matches!(&outcome, PeerEvent::FileError { from, file_id: id, .. } if from == "alice" && *id == file_id),
        "got {outcome:?}"
    );
    assert_eq!(bob.active_transfers().await, 0);
    assert_no_transfer_events(&mut bob_events).await;

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn test_stream_cut_by_frame_cap_is_discarded() {
    let (mut alice, mut alice_events) = started_with(Config {
        chunk_size: 1,
        ..test_config("alice")
    })
    .await;
    let (mut bob, mut bob_events) = started_with(Config {
        max_frames_per_connection: 5,
        ..test_config("bob")
    })
    .await;
    announce(&alice, &mut alice_events, &bob).await;
    announce(&bob, &mut bob_events, &alice).await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("eight.bin");
    let destination = dir.path().join("received.bin");
    tokio::fs::write(&source, b"abcdefgh").await.unwrap();

    let file_id = alice.send_file("bob", &source).await.unwrap();
    wait_for(&mut bob_events, |e| matches!(e, PeerEvent::FileRequest { .. })).await;
    bob.accept_file(&file_id, &destination).await.unwrap();

    let outcome = wait_for(&mut bob_events, |e| {
        matches!(e, PeerEvent::FileComplete { .. } | PeerEvent::FileError { .. })
    })
    .await;
    assert_eq!(
        outcome,
        PeerEvent::FileError {
            from: "alice".into(),
            file_id,
            error: "transfer interrupted: frame limit of 5 reached".into(),
        }
    );
    assert_eq!(bob.active_transfers().await, 0);
    assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"abcde");

    // Whether or not the sender saw the reset, its side is cleaned up.
    wait_until_idle(&alice).await;
    assert_eq!(alice.active_transfers().await, 0);

    alice.stop().await;
    bob.stop().await;
}
