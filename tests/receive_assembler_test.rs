use std::sync::Arc;

use peerbeam::protocol::{decode_frame, encode_frame};
use peerbeam::{
    ConnectionManager, ConnectionProvider, EventBus, HandleEvent, InMemoryBroker, PeerIdentifier,
    ReceiveAssembler, TransferToken, WireMessage,
};

async fn start_assembler(
    broker: &InMemoryBroker,
    max_payload_bytes: u64,
) -> (Arc<ReceiveAssembler>, PeerIdentifier) {
    let provider = Arc::new(broker.endpoint());
    let identifier = provider.allocate_identifier().await.unwrap();

    let manager = Arc::new(ConnectionManager::new(provider));
    manager.start().await.unwrap();

    let (bus, _events) = EventBus::new();
    let assembler = Arc::new(ReceiveAssembler::new(manager, bus, max_payload_bytes));
    let runner = assembler.clone();
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });

    (assembler, identifier)
}

/// Next acknowledgement frame on the handle, skipping lifecycle events
async fn next_ack(handle: &mut peerbeam::ConnectionHandle) -> (TransferToken, String) {
    loop {
        match handle.recv().await {
            Some(HandleEvent::Frame(bytes)) => match decode_frame(&bytes).unwrap() {
                WireMessage::Acknowledgement { token, ack } => return (token, ack),
                other => panic!("expected an acknowledgement, got {:?}", other),
            },
            Some(HandleEvent::Opened) => continue,
            other => panic!("connection ended early: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_every_payload_is_stored_and_acknowledged() {
    let broker = InMemoryBroker::new();
    let (assembler, identifier) = start_assembler(&broker, 1024 * 1024).await;

    let dialer = broker.endpoint();
    let mut handle = dialer.dial(&identifier);

    let mut tokens = Vec::new();
    for i in 0..3 {
        let token = TransferToken::new();
        tokens.push(token.clone());
        let payload = WireMessage::payload(
            token,
            format!("file-{}.txt", i),
            "text/plain",
            format!("content {}", i).into_bytes(),
        );
        handle.send(encode_frame(&payload).unwrap());
    }

    for token in &tokens {
        let (acked_token, _) = next_ack(&mut handle).await;
        assert_eq!(&acked_token, token);
    }

    let artifacts = assembler.artifacts().await;
    assert_eq!(artifacts.len(), 3);
    for (i, artifact) in artifacts.iter().enumerate() {
        assert_eq!(artifact.token, tokens[i]);
        assert_eq!(artifact.filename, format!("file-{}.txt", i));
        assert_eq!(artifact.content(), format!("content {}", i).as_bytes());
    }
}

#[tokio::test]
async fn test_malformed_frame_does_not_end_the_session() {
    let broker = InMemoryBroker::new();
    let (assembler, identifier) = start_assembler(&broker, 1024 * 1024).await;

    let dialer = broker.endpoint();
    let mut handle = dialer.dial(&identifier);

    handle.send(b"this is not a frame".to_vec());

    let token = TransferToken::new();
    let payload = WireMessage::payload(token.clone(), "after.txt", "text/plain", b"still works".to_vec());
    handle.send(encode_frame(&payload).unwrap());

    let (acked_token, acked_name) = next_ack(&mut handle).await;
    assert_eq!(acked_token, token);
    assert_eq!(acked_name, "after.txt");

    let artifacts = assembler.artifacts().await;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].filename, "after.txt");
}

#[tokio::test]
async fn test_oversized_payload_is_discarded() {
    let broker = InMemoryBroker::new();
    let (assembler, identifier) = start_assembler(&broker, 16).await;

    let dialer = broker.endpoint();
    let mut handle = dialer.dial(&identifier);

    let big = WireMessage::payload(
        TransferToken::new(),
        "big.bin",
        "application/octet-stream",
        vec![0u8; 64],
    );
    handle.send(encode_frame(&big).unwrap());

    let small_token = TransferToken::new();
    let small = WireMessage::payload(small_token.clone(), "small.txt", "text/plain", b"ok".to_vec());
    handle.send(encode_frame(&small).unwrap());

    // Only the small payload comes back acknowledged
    let (acked_token, _) = next_ack(&mut handle).await;
    assert_eq!(acked_token, small_token);

    let artifacts = assembler.artifacts().await;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].filename, "small.txt");
}

#[tokio::test]
async fn test_idle_connection_does_not_block_later_transfers() {
    let broker = InMemoryBroker::new();
    let (assembler, identifier) = start_assembler(&broker, 1024 * 1024).await;

    // Connect, say nothing, go away
    let idle = broker.endpoint();
    let mut idle_handle = idle.dial(&identifier);
    assert!(matches!(idle_handle.recv().await, Some(HandleEvent::Opened)));
    drop(idle_handle);

    let dialer = broker.endpoint();
    let mut handle = dialer.dial(&identifier);
    let token = TransferToken::new();
    let payload = WireMessage::payload(token.clone(), "late.txt", "text/plain", b"late".to_vec());
    handle.send(encode_frame(&payload).unwrap());

    let (acked_token, _) = next_ack(&mut handle).await;
    assert_eq!(acked_token, token);
    assert_eq!(assembler.artifacts().await.len(), 1);
}

#[tokio::test]
async fn test_received_artifact_persists_to_disk() {
    let broker = InMemoryBroker::new();
    let (assembler, identifier) = start_assembler(&broker, 1024 * 1024).await;

    let dialer = broker.endpoint();
    let mut handle = dialer.dial(&identifier);
    let token = TransferToken::new();
    let payload = WireMessage::payload(token.clone(), "saved.txt", "text/plain", b"persist me".to_vec());
    handle.send(encode_frame(&payload).unwrap());
    next_ack(&mut handle).await;

    let artifact = assembler.artifact(&token).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = artifact.write_to(dir.path()).await.unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), b"persist me");
}
