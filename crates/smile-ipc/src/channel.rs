use std::time::Duration;

use smile_core::config::{ChannelConfig, Transport};
use smile_core::status::StatusMessage;

use crate::datagram::{DatagramPublisher, DatagramSubscriber};
use crate::error::{IpcError, IpcResult};

/// Sending half, owned by the recognizer.
pub trait StatusPublisher: Send {
    fn publish(&mut self, message: &StatusMessage) -> IpcResult<()>;

    /// Release the transport. Later publishes fail with [`IpcError::Closed`].
    fn shutdown(&mut self);
}

/// Receiving half, owned by the logon side.
pub trait StatusSubscriber: Send {
    /// Wait at most `timeout` for the next valid message. `Ok(None)` means
    /// nothing valid arrived in time.
    fn try_receive(&mut self, timeout: Duration) -> IpcResult<Option<StatusMessage>>;

    /// The most recent valid message, if any.
    fn last_status(&self) -> Option<&StatusMessage>;

    fn shutdown(&mut self);
}

impl<T: StatusPublisher + ?Sized> StatusPublisher for Box<T> {
    fn publish(&mut self, message: &StatusMessage) -> IpcResult<()> {
        (**self).publish(message)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

impl<T: StatusSubscriber + ?Sized> StatusSubscriber for Box<T> {
    fn try_receive(&mut self, timeout: Duration) -> IpcResult<Option<StatusMessage>> {
        (**self).try_receive(timeout)
    }

    fn last_status(&self) -> Option<&StatusMessage> {
        (**self).last_status()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Open the receiving half of the configured transport.
pub fn open_subscriber(config: &ChannelConfig) -> IpcResult<Box<dyn StatusSubscriber>> {
    match config.transport {
        Transport::Datagram => Ok(Box::new(DatagramSubscriber::bind(&config.address())?)),
        #[cfg(feature = "rendezvous")]
        Transport::Rendezvous => Ok(Box::new(crate::rendezvous::RendezvousSubscriber::new(config))),
        #[cfg(not(feature = "rendezvous"))]
        Transport::Rendezvous => Err(IpcError::TransportDisabled("rendezvous")),
    }
}

/// Open the sending half of the configured transport.
pub fn open_publisher(config: &ChannelConfig) -> IpcResult<Box<dyn StatusPublisher>> {
    match config.transport {
        Transport::Datagram => Ok(Box::new(DatagramPublisher::connect(&config.address())?)),
        #[cfg(feature = "rendezvous")]
        Transport::Rendezvous => Ok(Box::new(crate::rendezvous::RendezvousPublisher::create(config)?)),
        #[cfg(not(feature = "rendezvous"))]
        Transport::Rendezvous => Err(IpcError::TransportDisabled("rendezvous")),
    }
}
