use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionProvider, HandleEvent};
use crate::core::domain::PeerIdentifier;
use crate::core::error::{Result, TransferError};

/// Framing sanity bound, distinct from the configurable payload policy
/// limit enforced by the receive assembler
const MAX_FRAME_BYTES: usize = 1 << 30;

/// TCP-backed connection provider. Identifier allocation binds a listener
/// and the printable socket address becomes the peer identifier, so no
/// separate signaling service is needed on a reachable network. Frames are
/// 4-byte big-endian length-prefixed JSON.
pub struct TcpProvider {
    bind_address: String,
    listener: Arc<tokio::sync::Mutex<Option<TcpListener>>>,
    identifier: Mutex<Option<PeerIdentifier>>,
}

impl TcpProvider {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            listener: Arc::new(tokio::sync::Mutex::new(None)),
            identifier: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ConnectionProvider for TcpProvider {
    async fn allocate_identifier(&self) -> Result<PeerIdentifier> {
        if let Some(existing) = self.identifier.lock().unwrap().as_ref() {
            return Ok(existing.clone());
        }

        let listener = TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| TransferError::Allocation(e.to_string()))?;
        let identifier = PeerIdentifier::new(
            listener
                .local_addr()
                .map_err(|e| TransferError::Allocation(e.to_string()))?
                .to_string(),
        );

        *self.listener.lock().await = Some(listener);
        *self.identifier.lock().unwrap() = Some(identifier.clone());
        Ok(identifier)
    }

    async fn listen(&self) -> Result<mpsc::UnboundedReceiver<ConnectionHandle>> {
        if self.identifier.lock().unwrap().is_none() {
            return Err(TransferError::IdentityUnset);
        }

        // The listener stays in its slot across accept sessions. The task
        // holds the slot lock until its consumer goes away, so a restarted
        // session waits for the previous one to wind down and then reuses
        // the same bound socket.
        let slot = Arc::clone(&self.listener);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let guard = slot.lock().await;
            let Some(listener) = guard.as_ref() else {
                return;
            };
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!(%peer_addr, "inbound tcp connection");
                            let remote = Some(PeerIdentifier::new(peer_addr.to_string()));
                            let (out_tx, out_rx) = mpsc::unbounded_channel();
                            let (ev_tx, ev_rx) = mpsc::unbounded_channel();
                            let _ = ev_tx.send(HandleEvent::Opened);
                            tokio::spawn(run_io(stream, out_rx, ev_tx));
                            if tx.send(ConnectionHandle::new(remote, out_tx, ev_rx)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "tcp accept failed");
                            break;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    fn dial(&self, remote: &PeerIdentifier) -> ConnectionHandle {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(Some(remote.clone()), out_tx, ev_rx);

        let target = remote.as_str().to_string();
        tokio::spawn(async move {
            let addr: SocketAddr = match target.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    let _ = ev_tx.send(HandleEvent::Errored(format!(
                        "malformed peer identifier {}: {}",
                        target, e
                    )));
                    let _ = ev_tx.send(HandleEvent::Closed);
                    return;
                }
            };

            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = ev_tx.send(HandleEvent::Opened);
                    run_io(stream, out_rx, ev_tx).await;
                }
                Err(e) => {
                    let _ = ev_tx.send(HandleEvent::Errored(format!(
                        "could not reach peer {}: {}",
                        target, e
                    )));
                    let _ = ev_tx.send(HandleEvent::Closed);
                }
            }
        });

        handle
    }
}

/// Drive one socket: a writer task drains the outbound queue while this
/// task reads frames until EOF or error, then reports Closed.
async fn run_io(
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<HandleEvent>,
) {
    let (mut read_half, mut write_half) = stream.into_split();

    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if frame.len() > MAX_FRAME_BYTES {
                warn!(len = frame.len(), "dropping oversized frame");
                continue;
            }
            let prefix = (frame.len() as u32).to_be_bytes();
            if write_half.write_all(&prefix).await.is_err()
                || write_half.write_all(&frame).await.is_err()
            {
                let _ = writer_events.send(HandleEvent::Errored("write failed".to_string()));
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(frame)) => {
                if events.send(HandleEvent::Frame(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = events.send(HandleEvent::Errored(e.to_string()));
                break;
            }
        }
    }
    let _ = events.send(HandleEvent::Closed);
}

/// Read one length-prefixed frame; `None` on a clean EOF at a frame
/// boundary
async fn read_frame(reader: &mut OwnedReadHalf) -> std::io::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the framing bound", len),
        ));
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}
