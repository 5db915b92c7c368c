use std::sync::Arc;
use std::time::Duration;

use peerbeam::protocol::{decode_frame, encode_frame};
use peerbeam::{
    ConnectionManager, ConnectionProvider, EventBus, HandleEvent, InMemoryBroker, PeerIdentifier,
    SelectedFile, SendOrchestrator, SendState, TransferToken, WireMessage,
};

#[tokio::test]
async fn test_empty_queue_does_not_dial() {
    let broker = InMemoryBroker::new();
    let provider = Arc::new(broker.endpoint());
    let manager = Arc::new(ConnectionManager::new(provider.clone()));
    let (bus, _events) = EventBus::new();
    let sender = SendOrchestrator::new(manager, bus, Duration::from_secs(1));

    sender
        .send_to(&PeerIdentifier::new("anyone"))
        .await
        .unwrap();

    assert_eq!(provider.dials(), 0);
    assert!(sender.is_settled());
}

#[tokio::test]
async fn test_removed_file_is_not_sent() {
    let broker = InMemoryBroker::new();

    let receiver = broker.endpoint();
    let identifier = receiver.allocate_identifier().await.unwrap();
    let mut inbound = receiver.listen().await.unwrap();

    let manager = Arc::new(ConnectionManager::new(Arc::new(broker.endpoint())));
    let (bus, _events) = EventBus::new();
    let sender = SendOrchestrator::new(manager, bus, Duration::from_secs(5));

    let keep = sender.queue_file(SelectedFile::from_bytes("keep.txt", "text/plain", b"keep".to_vec()));
    let dropped = sender.queue_file(SelectedFile::from_bytes("drop.txt", "text/plain", b"drop".to_vec()));

    assert!(sender.remove(&dropped));
    assert!(!sender.remove(&dropped));
    assert_eq!(sender.outstanding().len(), 1);

    // Ack the one payload that should arrive, then report what was seen
    let receiver_task = tokio::spawn(async move {
        let mut handle = inbound.recv().await.unwrap();
        let mut seen = Vec::new();
        while let Some(event) = handle.recv().await {
            match event {
                HandleEvent::Frame(bytes) => {
                    if let WireMessage::FilePayload { token, filename, .. } = decode_frame(&bytes).unwrap() {
                        seen.push(filename.clone());
                        handle.send(encode_frame(&WireMessage::ack(token, filename)).unwrap());
                        break;
                    }
                }
                HandleEvent::Closed => break,
                _ => {}
            }
        }
        seen
    });

    sender.send_to(&identifier).await.unwrap();
    assert_eq!(sender.acknowledged(), vec![(keep, "keep.txt".to_string())]);

    let seen = receiver_task.await.unwrap();
    assert_eq!(seen, vec!["keep.txt".to_string()]);
}

#[tokio::test]
async fn test_unmatched_ack_token_is_ignored() {
    let broker = InMemoryBroker::new();

    let receiver = broker.endpoint();
    let identifier = receiver.allocate_identifier().await.unwrap();
    let mut inbound = receiver.listen().await.unwrap();

    let manager = Arc::new(ConnectionManager::new(Arc::new(broker.endpoint())));
    let (bus, _events) = EventBus::new();
    let sender = SendOrchestrator::new(manager, bus, Duration::from_secs(5));
    let token = sender.queue_file(SelectedFile::from_bytes("a.txt", "text/plain", b"abc".to_vec()));

    // Ack with a bogus token first, then the real one
    tokio::spawn(async move {
        let mut handle = inbound.recv().await.unwrap();
        while let Some(event) = handle.recv().await {
            match event {
                HandleEvent::Frame(bytes) => {
                    if let WireMessage::FilePayload { token, filename, .. } = decode_frame(&bytes).unwrap() {
                        let bogus = WireMessage::ack(TransferToken::new(), &filename);
                        handle.send(encode_frame(&bogus).unwrap());
                        handle.send(encode_frame(&WireMessage::ack(token, filename)).unwrap());
                    }
                }
                HandleEvent::Closed => break,
                _ => {}
            }
        }
    });

    sender.send_to(&identifier).await.unwrap();

    let outstanding = sender.outstanding();
    assert_eq!(outstanding[0].state, SendState::Acknowledged);
    assert_eq!(sender.acknowledged(), vec![(token, "a.txt".to_string())]);
}

#[tokio::test]
async fn test_acks_reconcile_out_of_order() {
    let broker = InMemoryBroker::new();

    let receiver = broker.endpoint();
    let identifier = receiver.allocate_identifier().await.unwrap();
    let mut inbound = receiver.listen().await.unwrap();

    let manager = Arc::new(ConnectionManager::new(Arc::new(broker.endpoint())));
    let (bus, _events) = EventBus::new();
    let sender = SendOrchestrator::new(manager, bus, Duration::from_secs(5));
    sender.queue_file(SelectedFile::from_bytes("first.txt", "text/plain", b"1".to_vec()));
    sender.queue_file(SelectedFile::from_bytes("second.txt", "text/plain", b"2".to_vec()));

    // Collect both payloads, then ack them in reverse order
    tokio::spawn(async move {
        let mut handle = inbound.recv().await.unwrap();
        let mut pending = Vec::new();
        while let Some(event) = handle.recv().await {
            match event {
                HandleEvent::Frame(bytes) => {
                    if let WireMessage::FilePayload { token, filename, .. } = decode_frame(&bytes).unwrap() {
                        pending.push((token, filename));
                        if pending.len() == 2 {
                            for (token, filename) in pending.drain(..).rev() {
                                handle.send(encode_frame(&WireMessage::ack(token, filename)).unwrap());
                            }
                        }
                    }
                }
                HandleEvent::Closed => break,
                _ => {}
            }
        }
    });

    sender.send_to(&identifier).await.unwrap();

    for entry in sender.outstanding() {
        assert_eq!(entry.state, SendState::Acknowledged);
    }
    let acked: Vec<String> = sender
        .acknowledged()
        .into_iter()
        .map(|(_, filename)| filename)
        .collect();
    assert_eq!(acked, vec!["second.txt".to_string(), "first.txt".to_string()]);
}
