pub mod connection;
pub mod core;
pub mod identity;
pub mod infrastructure;
pub mod protocol;
pub mod transfer;
pub mod utils;

// Re-export key types for easier access in integration tests
pub use connection::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionProvider, HandleEvent,
};
pub use self::core::domain::{
    ConnectionId, FailureReason, OutstandingFile, PeerIdentifier, ReceivedArtifact, SelectedFile,
    SendState, TransferEvent, TransferToken,
};
pub use self::core::error::{Result, TransferError};
pub use identity::{IdentityProvider, ShareAddress};
pub use infrastructure::{AppConfig, ChannelProvider, EventBus, InMemoryBroker, TcpProvider};
pub use protocol::WireMessage;
pub use transfer::{ReceiveAssembler, SendOrchestrator};
