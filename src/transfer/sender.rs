use futures::future::join_all;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::core::domain::{
    ConnectionId, FailureReason, OutstandingFile, PeerIdentifier, SelectedFile, SendState,
    TransferEvent, TransferToken,
};
use crate::core::error::{Result, TransferError};
use crate::infrastructure::events::EventBus;
use crate::protocol::{self, WireMessage};

/// Sending side of a transfer session: a queue of selected files and one
/// triggered send that pushes every queued file down a fresh connection,
/// then waits for per-file acknowledgements.
///
/// Files keep their queueing order. Acknowledgements may arrive in any
/// order; each one is reconciled by token, never by position or filename.
pub struct SendOrchestrator {
    manager: Arc<ConnectionManager>,
    bus: EventBus,
    ack_timeout: Duration,
    outstanding: Mutex<Vec<OutstandingFile>>,
    acknowledged: Mutex<Vec<(TransferToken, String)>>,
}

impl SendOrchestrator {
    pub fn new(manager: Arc<ConnectionManager>, bus: EventBus, ack_timeout: Duration) -> Self {
        Self {
            manager,
            bus,
            ack_timeout,
            outstanding: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
        }
    }

    /// Add a selected file to the queue
    pub fn queue_file(&self, file: SelectedFile) -> TransferToken {
        let token = file.token.clone();
        let filename = file.name.clone();
        self.outstanding
            .lock()
            .unwrap()
            .push(OutstandingFile::queued(file));
        self.bus.emit(TransferEvent::FileQueued { token: token.clone(), filename });
        token
    }

    /// Select a file on disk and queue it
    pub async fn queue_path<P: AsRef<Path>>(&self, path: P) -> Result<TransferToken> {
        let file = SelectedFile::from_path(path).await?;
        Ok(self.queue_file(file))
    }

    /// Drop a file from the queue before it is sent. Returns false once the
    /// file has gone in flight; at that point the transfer runs to its
    /// conclusion.
    pub fn remove(&self, token: &TransferToken) -> bool {
        let mut outstanding = self.outstanding.lock().unwrap();
        let position = outstanding
            .iter()
            .position(|entry| &entry.file.token == token && entry.state == SendState::Queued);

        match position {
            Some(index) => {
                let entry = outstanding.remove(index);
                drop(outstanding);
                self.bus.emit(TransferEvent::FileRemoved {
                    token: entry.file.token,
                    filename: entry.file.name,
                });
                true
            }
            None => false,
        }
    }

    /// Current queue, including files that already settled this session
    pub fn outstanding(&self) -> Vec<OutstandingFile> {
        self.outstanding.lock().unwrap().clone()
    }

    /// Every (token, filename) acknowledged this session, in ack order
    pub fn acknowledged(&self) -> Vec<(TransferToken, String)> {
        self.acknowledged.lock().unwrap().clone()
    }

    /// True once no file is queued or in flight
    pub fn is_settled(&self) -> bool {
        !self
            .outstanding
            .lock()
            .unwrap()
            .iter()
            .any(|entry| entry.state.is_active())
    }

    /// Trigger the send: dial the peer, push every queued file once the
    /// connection opens, then wait until every file is acknowledged or
    /// failed. An empty queue completes immediately without dialing.
    pub async fn send_to(&self, remote: &PeerIdentifier) -> Result<()> {
        let count = self
            .outstanding
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.state == SendState::Queued)
            .count();
        if count == 0 {
            debug!("nothing queued, not dialing");
            return Ok(());
        }

        self.bus.emit(TransferEvent::SendStarted { count });

        let mut events = self
            .manager
            .take_events()
            .ok_or(TransferError::EventStreamUnavailable)?;
        let connection = self.manager.dial(remote);
        let deadline = Instant::now() + self.ack_timeout;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        self.fail_remaining(FailureReason::ConnectionClosed);
                        break;
                    };
                    // Only this session's connection matters; a leftover
                    // event from an earlier session must not fail fresh
                    // files.
                    match event {
                        ConnectionEvent::Opened { connection: opened, remote } if opened == connection => {
                            self.bus.emit(TransferEvent::ConnectionOpened { connection, remote });
                            self.dispatch_queued(connection).await;
                        }
                        ConnectionEvent::Frame { connection: from, bytes } if from == connection => {
                            self.handle_frame(connection, &bytes);
                        }
                        ConnectionEvent::Closed { connection: closed } if closed == connection => {
                            self.fail_remaining(FailureReason::ConnectionClosed);
                            self.bus.emit(TransferEvent::ConnectionClosed { connection });
                        }
                        ConnectionEvent::Errored { connection: errored, reason } if errored == connection => {
                            self.fail_remaining(FailureReason::ConnectionError(reason.clone()));
                            self.bus.emit(TransferEvent::ConnectionFailed { connection, reason });
                        }
                        stale => {
                            debug!(?stale, "ignoring event from another connection");
                        }
                    }
                    if self.is_settled() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("acknowledgement deadline passed");
                    self.fail_remaining(FailureReason::AckTimeout);
                    break;
                }
            }
        }

        self.manager.restore_events(events);
        debug!(%connection, "send session over");
        Ok(())
    }

    /// Read and push every still-queued file on the open connection. A file
    /// that cannot be read fails alone; the rest still go out.
    async fn dispatch_queued(&self, connection: ConnectionId) {
        let queued: Vec<SelectedFile> = self
            .outstanding
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.state == SendState::Queued)
            .map(|entry| entry.file.clone())
            .collect();

        let reads = join_all(queued.iter().map(|file| file.read_bytes())).await;

        for (file, read) in queued.into_iter().zip(reads) {
            match read {
                Ok(bytes) => {
                    let message =
                        WireMessage::payload(file.token.clone(), &file.name, &file.mime, bytes);
                    match protocol::encode_frame(&message) {
                        Ok(frame) => {
                            self.manager.send(connection, frame);
                            self.set_state(&file.token, SendState::InFlight);
                            self.bus.emit(TransferEvent::FileInFlight {
                                token: file.token,
                                filename: file.name,
                            });
                        }
                        Err(e) => self.fail_one(&file.token, FailureReason::ReadError(e.to_string())),
                    }
                }
                Err(e) => self.fail_one(&file.token, FailureReason::ReadError(e.to_string())),
            }
        }
    }

    fn handle_frame(&self, connection: ConnectionId, bytes: &[u8]) {
        match protocol::decode_frame(bytes) {
            Ok(WireMessage::Acknowledgement { token, ack }) => self.reconcile_ack(token, ack),
            Ok(WireMessage::FilePayload { filename, .. }) => {
                debug!(%connection, %filename, "ignoring payload on sending side");
            }
            Err(e) => warn!(%connection, error = %e, "discarding undecodable frame"),
        }
    }

    /// Mark the in-flight file with this token acknowledged. An unknown or
    /// already-settled token is ignored.
    fn reconcile_ack(&self, token: TransferToken, ack: String) {
        let mut outstanding = self.outstanding.lock().unwrap();
        let entry = outstanding
            .iter_mut()
            .find(|entry| entry.file.token == token && entry.state == SendState::InFlight);

        let Some(entry) = entry else {
            debug!(%token, "acknowledgement does not match an in-flight file");
            return;
        };

        entry.state = SendState::Acknowledged;
        let filename = entry.file.name.clone();
        drop(outstanding);

        debug!(%token, %ack, "acknowledgement reconciled");
        self.acknowledged
            .lock()
            .unwrap()
            .push((token.clone(), filename.clone()));
        self.bus
            .emit(TransferEvent::FileAcknowledged { token, filename });
    }

    fn set_state(&self, token: &TransferToken, state: SendState) {
        let mut outstanding = self.outstanding.lock().unwrap();
        if let Some(entry) = outstanding
            .iter_mut()
            .find(|entry| &entry.file.token == token)
        {
            entry.state = state;
        }
    }

    fn fail_one(&self, token: &TransferToken, reason: FailureReason) {
        let mut outstanding = self.outstanding.lock().unwrap();
        let Some(entry) = outstanding
            .iter_mut()
            .find(|entry| &entry.file.token == token)
        else {
            return;
        };
        entry.state = SendState::Failed(reason.clone());
        let filename = entry.file.name.clone();
        drop(outstanding);

        self.bus.emit(TransferEvent::FileFailed {
            token: token.clone(),
            filename,
            reason,
        });
    }

    /// Fail every file still queued or in flight with the same reason
    fn fail_remaining(&self, reason: FailureReason) {
        let failed: Vec<(TransferToken, String)> = {
            let mut outstanding = self.outstanding.lock().unwrap();
            outstanding
                .iter_mut()
                .filter(|entry| entry.state.is_active())
                .map(|entry| {
                    entry.state = SendState::Failed(reason.clone());
                    (entry.file.token.clone(), entry.file.name.clone())
                })
                .collect()
        };

        for (token, filename) in failed {
            self.bus.emit(TransferEvent::FileFailed {
                token,
                filename,
                reason: reason.clone(),
            });
        }
    }
}
