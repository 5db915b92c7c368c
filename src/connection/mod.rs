use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::domain::{ConnectionId, PeerIdentifier};
use crate::core::error::Result;

/// Lifecycle events of a single connection as produced by a provider
#[derive(Debug)]
pub enum HandleEvent {
    Opened,
    Frame(Vec<u8>),
    Closed,
    Errored(String),
}

/// One bidirectional channel to a remote peer. Obtained from a provider by
/// dialing or by accepting; destroyed on close or error, never reconnected.
pub struct ConnectionHandle {
    remote: Option<PeerIdentifier>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedReceiver<HandleEvent>,
}

impl ConnectionHandle {
    pub fn new(
        remote: Option<PeerIdentifier>,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        events: mpsc::UnboundedReceiver<HandleEvent>,
    ) -> Self {
        Self {
            remote,
            outbound,
            events,
        }
    }

    pub fn remote(&self) -> Option<&PeerIdentifier> {
        self.remote.as_ref()
    }

    /// Enqueue a frame. Failure is not reported here; a connection that can
    /// no longer accept frames has already emitted (or is about to emit) a
    /// Closed event.
    pub fn send(&self, frame: Vec<u8>) {
        if self.outbound.send(frame).is_err() {
            debug!("frame dropped: connection is no longer writable");
        }
    }

    pub async fn recv(&mut self) -> Option<HandleEvent> {
        self.events.recv().await
    }

    pub(crate) fn split(
        self,
    ) -> (
        Option<PeerIdentifier>,
        mpsc::UnboundedSender<Vec<u8>>,
        mpsc::UnboundedReceiver<HandleEvent>,
    ) {
        (self.remote, self.outbound, self.events)
    }
}

/// The external connection-broker capability: allocate an identifier,
/// accept inbound connections, dial outbound ones. Signaling and NAT
/// traversal live behind this seam.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Ask the broker for a process-unique peer identifier
    async fn allocate_identifier(&self) -> Result<PeerIdentifier>;

    /// Start accepting inbound connections addressed to the allocated
    /// identifier
    async fn listen(&self) -> Result<mpsc::UnboundedReceiver<ConnectionHandle>>;

    /// Open an outbound connection. Never fails synchronously: a malformed
    /// or unreachable identifier surfaces as Errored/Closed events on the
    /// returned handle.
    fn dial(&self, remote: &PeerIdentifier) -> ConnectionHandle;
}

/// Connection events from every live connection, normalized into one stream
#[derive(Debug)]
pub enum ConnectionEvent {
    Opened {
        connection: ConnectionId,
        remote: Option<PeerIdentifier>,
    },
    Frame {
        connection: ConnectionId,
        bytes: Vec<u8>,
    },
    Closed {
        connection: ConnectionId,
    },
    Errored {
        connection: ConnectionId,
        reason: String,
    },
}

/// Owns every live connection on one side of the transfer and merges their
/// lifecycle events into a single consumer stream. `start` is idempotent,
/// so UI re-registration can never duplicate message delivery.
pub struct ConnectionManager {
    provider: Arc<dyn ConnectionProvider>,
    started: AtomicBool,
    next_id: AtomicU64,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    live: Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            provider,
            started: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            live: Arc::new(Mutex::new(HashMap::new())),
            accept_task: Mutex::new(None),
        }
    }

    /// The normalized event stream. There is exactly one consumer at a
    /// time; the receiver stays out until it is restored.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Hand the event stream back once a session loop is done with it, so
    /// a later session on the same manager can take it again.
    pub fn restore_events(&self, events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        *self.events_rx.lock().unwrap() = Some(events);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Begin accepting inbound connections. Calling this again while
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("connection manager already started");
            return Ok(());
        }

        let mut inbound = match self.provider.listen().await {
            Ok(rx) => rx,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(handle) = inbound.recv().await {
                let id = manager.adopt(handle);
                debug!(%id, "accepted inbound connection");
            }
            debug!("inbound connection stream ended");
        });
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Stop accepting inbound connections. Live connections are unaffected.
    pub fn stop(&self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    /// Open an outbound connection; its lifecycle shows up on the event
    /// stream under the returned id.
    pub fn dial(&self, remote: &PeerIdentifier) -> ConnectionId {
        let handle = self.provider.dial(remote);
        self.adopt(handle)
    }

    /// Enqueue a frame on a live connection. A connection that is already
    /// gone has delivered its Closed event; the frame is dropped with a log
    /// line, not an error.
    pub fn send(&self, connection: ConnectionId, frame: Vec<u8>) {
        let sender = self.live.lock().unwrap().get(&connection).cloned();
        match sender {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!(%connection, "frame dropped: connection closed");
                }
            }
            None => warn!(%connection, "frame dropped: no such live connection"),
        }
    }

    /// Register a handle and forward its events, tagged with a fresh id,
    /// onto the unified stream
    pub fn adopt(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (remote, outbound, mut events) = handle.split();
        self.live.lock().unwrap().insert(id, outbound);

        let events_tx = self.events_tx.clone();
        let live = Arc::clone(&self.live);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let normalized = match event {
                    HandleEvent::Opened => ConnectionEvent::Opened {
                        connection: id,
                        remote: remote.clone(),
                    },
                    HandleEvent::Frame(bytes) => ConnectionEvent::Frame {
                        connection: id,
                        bytes,
                    },
                    HandleEvent::Errored(reason) => ConnectionEvent::Errored {
                        connection: id,
                        reason,
                    },
                    HandleEvent::Closed => {
                        live.lock().unwrap().remove(&id);
                        let _ = events_tx.send(ConnectionEvent::Closed { connection: id });
                        break;
                    }
                };
                if events_tx.send(normalized).is_err() {
                    break;
                }
            }
            // Terminal either way: drop the write side so the provider's
            // pump can wind down.
            live.lock().unwrap().remove(&id);
        });

        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::InMemoryBroker;

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let broker = InMemoryBroker::new();
        let provider = Arc::new(broker.endpoint());
        provider.allocate_identifier().await.unwrap();

        let manager = Arc::new(ConnectionManager::new(provider));
        manager.start().await.unwrap();
        assert!(manager.is_started());
        manager.start().await.unwrap();
        assert!(manager.is_started());

        manager.stop();
        assert!(!manager.is_started());
    }

    #[tokio::test]
    async fn test_listen_before_allocation_fails() {
        let broker = InMemoryBroker::new();
        let provider = Arc::new(broker.endpoint());
        let manager = Arc::new(ConnectionManager::new(provider));
        assert!(manager.start().await.is_err());
        assert!(!manager.is_started());
    }

    #[tokio::test]
    async fn test_event_stream_taken_once_until_restored() {
        let broker = InMemoryBroker::new();
        let manager = Arc::new(ConnectionManager::new(Arc::new(broker.endpoint())));

        let events = manager.take_events().unwrap();
        assert!(manager.take_events().is_none());

        manager.restore_events(events);
        assert!(manager.take_events().is_some());
    }
}
