pub mod channel;
pub mod datagram;
pub mod error;
pub mod packet;

#[cfg(feature = "rendezvous")]
pub mod rendezvous;

pub use channel::{open_publisher, open_subscriber, StatusPublisher, StatusSubscriber};
pub use error::{IpcError, IpcResult};
