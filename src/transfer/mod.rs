pub mod receiver;
pub mod sender;

pub use receiver::ReceiveAssembler;
pub use sender::SendOrchestrator;
