use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use smile_core::status::StatusMessage;
use tracing::{debug, warn};

use crate::channel::{StatusPublisher, StatusSubscriber};
use crate::error::{IpcError, IpcResult};
use crate::packet::{self, PACKET_SIZE};

/// Large enough to tell an oversized datagram from a well-sized one.
const RECV_BUFFER: usize = PACKET_SIZE * 2;

pub struct DatagramPublisher {
    socket: Option<UdpSocket>,
    target: SocketAddr,
}

impl DatagramPublisher {
    /// Bind an ephemeral loopback port and aim at `address`.
    pub fn connect(address: &str) -> IpcResult<Self> {
        let target = resolve(address)?;
        let local = if target.is_ipv6() {
            SocketAddr::from((Ipv6Addr::LOCALHOST, 0))
        } else {
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
        };
        let socket = UdpSocket::bind(local)?;
        debug!(%target, "datagram publisher ready");
        Ok(Self {
            socket: Some(socket),
            target,
        })
    }
}

impl StatusPublisher for DatagramPublisher {
    fn publish(&mut self, message: &StatusMessage) -> IpcResult<()> {
        let socket = self.socket.as_ref().ok_or(IpcError::Closed)?;
        let frame = packet::encode(message);
        socket.send_to(&frame, self.target)?;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.socket = None;
    }
}

pub struct DatagramSubscriber {
    socket: Option<UdpSocket>,
    last: Option<StatusMessage>,
    dropped: u64,
}

impl DatagramSubscriber {
    pub fn bind(address: &str) -> IpcResult<Self> {
        let socket = UdpSocket::bind(resolve(address)?)?;
        debug!(local = ?socket.local_addr().ok(), "datagram subscriber bound");
        Ok(Self {
            socket: Some(socket),
            last: None,
            dropped: 0,
        })
    }

    /// The address actually bound; differs from the requested one for port 0.
    pub fn local_addr(&self) -> IpcResult<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(IpcError::Closed)?;
        Ok(socket.local_addr()?)
    }

    /// Frames rejected by validation so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl StatusSubscriber for DatagramSubscriber {
    fn try_receive(&mut self, timeout: Duration) -> IpcResult<Option<StatusMessage>> {
        let socket = self.socket.as_ref().ok_or(IpcError::Closed)?;
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUFFER];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // A zero read timeout means "block forever" to the OS.
            socket.set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;

            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // Windows reports an ICMP port-unreachable from an earlier send here.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };

            match packet::decode(&buf[..len]) {
                Ok(message) => {
                    self.last = Some(message.clone());
                    return Ok(Some(message));
                }
                Err(e) => {
                    self.dropped += 1;
                    warn!(%from, error = %e, "dropping invalid status frame");
                }
            }
        }
    }

    fn last_status(&self) -> Option<&StatusMessage> {
        self.last.as_ref()
    }

    fn shutdown(&mut self) {
        if self.socket.take().is_some() {
            debug!(dropped = self.dropped, "datagram subscriber closed");
        }
    }
}

fn resolve(address: &str) -> IpcResult<SocketAddr> {
    address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| IpcError::Io(std::io::Error::new(ErrorKind::InvalidInput, "no address")))
}
