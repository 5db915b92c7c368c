use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::{ConnectionHandle, ConnectionProvider, HandleEvent};
use crate::core::domain::PeerIdentifier;
use crate::core::error::{Result, TransferError};
use crate::utils;

const IDENTIFIER_LENGTH: usize = 12;

/// Process-local broker: allocates short opaque identifiers and routes
/// dials between registered endpoints over paired channels. Stands in for
/// the external signaling service in tests and loopback demos.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    registry: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ConnectionHandle>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh endpoint sharing this broker's registry; one endpoint is
    /// one peer
    pub fn endpoint(&self) -> ChannelProvider {
        ChannelProvider {
            broker: self.clone(),
            identifier: Mutex::new(None),
            dials: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Channel-backed connection provider bound to an [`InMemoryBroker`]
pub struct ChannelProvider {
    broker: InMemoryBroker,
    identifier: Mutex<Option<PeerIdentifier>>,
    dials: Arc<AtomicUsize>,
}

impl ChannelProvider {
    /// How many dials this endpoint has attempted
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for ChannelProvider {
    async fn allocate_identifier(&self) -> Result<PeerIdentifier> {
        let mut slot = self.identifier.lock().unwrap();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let identifier = PeerIdentifier::new(utils::random_id(IDENTIFIER_LENGTH));
        *slot = Some(identifier.clone());
        Ok(identifier)
    }

    async fn listen(&self) -> Result<mpsc::UnboundedReceiver<ConnectionHandle>> {
        let identifier = self
            .identifier
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransferError::IdentityUnset)?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.broker
            .registry
            .lock()
            .unwrap()
            .insert(identifier.as_str().to_string(), tx);
        Ok(rx)
    }

    fn dial(&self, remote: &PeerIdentifier) -> ConnectionHandle {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let (local_out_tx, local_out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (local_ev_tx, local_ev_rx) = mpsc::unbounded_channel::<HandleEvent>();
        let handle = ConnectionHandle::new(Some(remote.clone()), local_out_tx, local_ev_rx);

        let listener = self
            .broker
            .registry
            .lock()
            .unwrap()
            .get(remote.as_str())
            .cloned();

        let Some(inbound_tx) = listener else {
            debug!(%remote, "dial to unknown identifier");
            let _ = local_ev_tx.send(HandleEvent::Errored(format!(
                "no listening peer for identifier {}",
                remote
            )));
            let _ = local_ev_tx.send(HandleEvent::Closed);
            return handle;
        };

        let (remote_out_tx, remote_out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (remote_ev_tx, remote_ev_rx) = mpsc::unbounded_channel::<HandleEvent>();
        let dialer = self.identifier.lock().unwrap().clone();
        let remote_handle = ConnectionHandle::new(dialer, remote_out_tx, remote_ev_rx);

        let _ = local_ev_tx.send(HandleEvent::Opened);
        let _ = remote_ev_tx.send(HandleEvent::Opened);
        pump(local_out_rx, remote_ev_tx);
        pump(remote_out_rx, local_ev_tx.clone());

        if inbound_tx.send(remote_handle).is_err() {
            let _ = local_ev_tx.send(HandleEvent::Errored(format!(
                "peer {} stopped listening",
                remote
            )));
            let _ = local_ev_tx.send(HandleEvent::Closed);
        }

        handle
    }
}

/// Forward frames from one side's outbound queue to the other side's event
/// stream; a dropped sender ends the connection for the reader.
fn pump(mut frames: mpsc::UnboundedReceiver<Vec<u8>>, events: mpsc::UnboundedSender<HandleEvent>) {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if events.send(HandleEvent::Frame(frame)).is_err() {
                return;
            }
        }
        let _ = events.send(HandleEvent::Closed);
    });
}
