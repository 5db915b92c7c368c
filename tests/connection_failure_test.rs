use std::sync::Arc;
use std::time::Duration;

use peerbeam::protocol::{decode_frame, encode_frame};
use peerbeam::{
    ConnectionManager, ConnectionProvider, EventBus, FailureReason, HandleEvent, InMemoryBroker,
    PeerIdentifier, SelectedFile, SendOrchestrator, SendState, WireMessage,
};

#[tokio::test]
async fn test_unreachable_peer_fails_every_file() {
    let broker = InMemoryBroker::new();
    let manager = Arc::new(ConnectionManager::new(Arc::new(broker.endpoint())));
    let (bus, _events) = EventBus::new();
    let sender = SendOrchestrator::new(manager, bus, Duration::from_secs(5));

    sender.queue_file(SelectedFile::from_bytes("a.txt", "text/plain", b"a".to_vec()));
    sender.queue_file(SelectedFile::from_bytes("b.txt", "text/plain", b"b".to_vec()));

    sender
        .send_to(&PeerIdentifier::new("nobody-here"))
        .await
        .unwrap();

    let outstanding = sender.outstanding();
    assert_eq!(outstanding.len(), 2);
    for entry in outstanding {
        assert!(
            matches!(entry.state, SendState::Failed(FailureReason::ConnectionError(_))),
            "{} ended as {}",
            entry.file.name,
            entry.state
        );
    }
    assert!(sender.acknowledged().is_empty());
}

#[tokio::test]
async fn test_disconnect_mid_transfer_keeps_earlier_ack() {
    let broker = InMemoryBroker::new();

    let receiver = broker.endpoint();
    let identifier = receiver.allocate_identifier().await.unwrap();
    let mut inbound = receiver.listen().await.unwrap();

    let manager = Arc::new(ConnectionManager::new(Arc::new(broker.endpoint())));
    let (bus, _events) = EventBus::new();
    let sender = SendOrchestrator::new(manager, bus, Duration::from_secs(5));
    let first = sender.queue_file(SelectedFile::from_bytes("first.txt", "text/plain", b"1".to_vec()));
    sender.queue_file(SelectedFile::from_bytes("second.txt", "text/plain", b"2".to_vec()));

    // Ack only the first payload, then drop the connection
    tokio::spawn(async move {
        let mut handle = inbound.recv().await.unwrap();
        while let Some(event) = handle.recv().await {
            if let HandleEvent::Frame(bytes) = event {
                if let WireMessage::FilePayload { token, filename, .. } = decode_frame(&bytes).unwrap() {
                    handle.send(encode_frame(&WireMessage::ack(token, filename)).unwrap());
                    break;
                }
            }
        }
    });

    sender.send_to(&identifier).await.unwrap();

    let outstanding = sender.outstanding();
    assert_eq!(outstanding[0].state, SendState::Acknowledged);
    assert_eq!(
        outstanding[1].state,
        SendState::Failed(FailureReason::ConnectionClosed)
    );
    assert_eq!(sender.acknowledged(), vec![(first, "first.txt".to_string())]);
}

#[tokio::test]
async fn test_silent_peer_trips_the_ack_timeout() {
    let broker = InMemoryBroker::new();

    let receiver = broker.endpoint();
    let identifier = receiver.allocate_identifier().await.unwrap();
    let mut inbound = receiver.listen().await.unwrap();

    // Accept the connection, read everything, never acknowledge
    tokio::spawn(async move {
        let mut handle = inbound.recv().await.unwrap();
        while let Some(_event) = handle.recv().await {}
    });

    let manager = Arc::new(ConnectionManager::new(Arc::new(broker.endpoint())));
    let (bus, _events) = EventBus::new();
    let sender = SendOrchestrator::new(manager, bus, Duration::from_millis(300));
    sender.queue_file(SelectedFile::from_bytes("stuck.txt", "text/plain", b"zzz".to_vec()));

    sender.send_to(&identifier).await.unwrap();

    let outstanding = sender.outstanding();
    assert_eq!(
        outstanding[0].state,
        SendState::Failed(FailureReason::AckTimeout)
    );
}
