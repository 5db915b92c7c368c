pub mod config;
pub mod events;
pub mod memory;
pub mod tcp;

pub use config::AppConfig;
pub use events::{log_event, EventBus};
pub use memory::{ChannelProvider, InMemoryBroker};
pub use tcp::TcpProvider;
