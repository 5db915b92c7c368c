use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::core::domain::{ConnectionId, ReceivedArtifact, TransferEvent, TransferToken};
use crate::core::error::{Result, TransferError};
use crate::infrastructure::events::EventBus;
use crate::protocol::{self, WireMessage};

/// Receiving side of a transfer session. Listens for inbound connections,
/// assembles each FilePayload into an artifact and acknowledges it on the
/// connection it arrived on.
///
/// The artifact list is append-only for the life of the session. Two
/// payloads with the same filename yield two artifacts.
pub struct ReceiveAssembler {
    manager: Arc<ConnectionManager>,
    bus: EventBus,
    max_payload_bytes: u64,
    artifacts: Arc<RwLock<Vec<ReceivedArtifact>>>,
}

impl ReceiveAssembler {
    pub fn new(manager: Arc<ConnectionManager>, bus: EventBus, max_payload_bytes: u64) -> Self {
        Self {
            manager,
            bus,
            max_payload_bytes,
            artifacts: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of every artifact received so far, in arrival order
    pub async fn artifacts(&self) -> Vec<ReceivedArtifact> {
        self.artifacts.read().await.clone()
    }

    /// Look up one artifact by its transfer token
    pub async fn artifact(&self, token: &TransferToken) -> Option<ReceivedArtifact> {
        self.artifacts
            .read()
            .await
            .iter()
            .find(|artifact| &artifact.token == token)
            .cloned()
    }

    /// Accept connections and process frames until the event stream ends.
    /// A connection that delivers nothing, or closes mid-session, does not
    /// end the session; only exhausting the stream does.
    pub async fn run(&self) -> Result<()> {
        self.manager.start().await?;
        let mut events = self
            .manager
            .take_events()
            .ok_or(TransferError::EventStreamUnavailable)?;

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Opened { connection, remote } => {
                    self.bus
                        .emit(TransferEvent::ConnectionOpened { connection, remote });
                }
                ConnectionEvent::Frame { connection, bytes } => {
                    self.handle_frame(connection, &bytes).await;
                }
                ConnectionEvent::Closed { connection } => {
                    self.bus.emit(TransferEvent::ConnectionClosed { connection });
                }
                ConnectionEvent::Errored { connection, reason } => {
                    self.bus
                        .emit(TransferEvent::ConnectionFailed { connection, reason });
                }
            }
        }
        Ok(())
    }

    /// One inbound frame. Malformed or oversized frames are logged and
    /// skipped; the session keeps running.
    async fn handle_frame(&self, connection: ConnectionId, bytes: &[u8]) {
        let message = match protocol::decode_frame(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(%connection, error = %e, "discarding undecodable frame");
                return;
            }
        };

        match message {
            WireMessage::FilePayload {
                token,
                filename,
                filetype,
                filesize,
                filedata,
            } => {
                if filesize > self.max_payload_bytes {
                    warn!(
                        %connection,
                        %filename,
                        filesize,
                        limit = self.max_payload_bytes,
                        "discarding oversized payload"
                    );
                    return;
                }

                let artifact = ReceivedArtifact::new(token.clone(), &filename, filetype, filedata);
                self.artifacts.write().await.push(artifact);
                self.bus.emit(TransferEvent::FileReceived {
                    token: token.clone(),
                    filename: filename.clone(),
                    filesize,
                });

                match protocol::encode_frame(&WireMessage::ack(token.clone(), &filename)) {
                    Ok(frame) => {
                        self.manager.send(connection, frame);
                        self.bus
                            .emit(TransferEvent::AcknowledgementSent { token, filename });
                    }
                    Err(e) => warn!(%connection, error = %e, "could not encode acknowledgement"),
                }
            }
            WireMessage::Acknowledgement { token, .. } => {
                // Receivers do not send payloads, so acks have nothing to
                // reconcile against here.
                debug!(%connection, %token, "ignoring acknowledgement on receiving side");
            }
        }
    }
}
