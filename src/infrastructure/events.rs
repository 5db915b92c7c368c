use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::core::domain::TransferEvent;

/// Fan-out point for transfer events. Every event is logged as it is
/// emitted; the channel receiver is what the UI layer (or a test) observes.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. A dropped receiver just means nobody is watching.
    pub fn emit(&self, event: TransferEvent) {
        log_event(&event);
        let _ = self.tx.send(event);
    }
}

/// Structured log line per event, in one place
pub fn log_event(event: &TransferEvent) {
    match event {
        TransferEvent::IdentityReady { identifier } => {
            info!(%identifier, "identity ready");
        }
        TransferEvent::ConnectionOpened { connection, remote } => {
            let remote = remote
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            info!(%connection, %remote, "connection opened");
        }
        TransferEvent::ConnectionClosed { connection } => {
            info!(%connection, "connection closed");
        }
        TransferEvent::ConnectionFailed { connection, reason } => {
            error!(%connection, %reason, "connection failed");
        }
        TransferEvent::FileQueued { token, filename } => {
            info!(%token, %filename, "file queued");
        }
        TransferEvent::FileRemoved { token, filename } => {
            info!(%token, %filename, "file removed from queue");
        }
        TransferEvent::SendStarted { count } => {
            info!(count, "send started");
        }
        TransferEvent::FileInFlight { token, filename } => {
            info!(%token, %filename, "file in flight");
        }
        TransferEvent::FileAcknowledged { token, filename } => {
            info!(%token, %filename, "file sent successfully");
        }
        TransferEvent::FileFailed {
            token,
            filename,
            reason,
        } => {
            warn!(%token, %filename, %reason, "file transfer failed");
        }
        TransferEvent::FileReceived {
            token,
            filename,
            filesize,
        } => {
            info!(%token, %filename, filesize, "file received");
        }
        TransferEvent::AcknowledgementSent { token, filename } => {
            info!(%token, %filename, "acknowledgement sent");
        }
    }
}
