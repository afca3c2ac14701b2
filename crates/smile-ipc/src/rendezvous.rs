//! Legacy shared-record transport.
//!
//! A rendezvous directory holds one fixed 264-byte `record` plus two binary
//! signals, `ready` and `consumed`, each represented by the presence of a file
//! of that name. A successful wait on a signal removes the file (auto-reset).
//!
//! ```text
//! offset size field
//!      0    1 new_data  bool
//!      1  256 message   username, NUL padded
//!    257    3 padding
//!    260    4 status    i32 LE
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use smile_core::config::ChannelConfig;
use smile_core::status::{RecognitionStatus, StatusMessage};
use smile_core::wait::{BoundedWait, SystemClock, WaitOutcome};
use tracing::{debug, warn};

use crate::channel::{StatusPublisher, StatusSubscriber};
use crate::error::{IpcError, IpcResult};
use crate::packet::c_string;

pub const RECORD_SIZE: usize = 264;
const MESSAGE_OFFSET: usize = 1;
const MESSAGE_LEN: usize = 256;
const STATUS_OFFSET: usize = 260;

const RECORD_FILE: &str = "record";
const READY: &str = "ready";
const CONSUMED: &str = "consumed";

/// Granularity of signal polling.
const SIGNAL_POLL: Duration = Duration::from_millis(5);

pub fn encode_record(message: &StatusMessage) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[0] = 1;
    if let Some(name) = message.username() {
        buf[MESSAGE_OFFSET..MESSAGE_OFFSET + name.len()].copy_from_slice(name.as_bytes());
    }
    buf[STATUS_OFFSET..].copy_from_slice(&message.status.code().to_le_bytes());
    buf
}

/// Decode a record. `None` for a wrong size, a cleared `new_data` flag or an
/// unknown status code. The record carries no timestamp, so the receive time
/// is used.
pub fn decode_record(bytes: &[u8]) -> Option<StatusMessage> {
    if bytes.len() != RECORD_SIZE || bytes[0] == 0 {
        return None;
    }
    let mut code = [0u8; 4];
    code.copy_from_slice(&bytes[STATUS_OFFSET..]);
    let status = RecognitionStatus::from_code(i32::from_le_bytes(code))?;
    let username = c_string(&bytes[MESSAGE_OFFSET..MESSAGE_OFFSET + MESSAGE_LEN]);
    Some(StatusMessage::new(status).with_username(&username))
}

/// A binary signal backed by a marker file.
struct Signal {
    path: PathBuf,
}

impl Signal {
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
        }
    }

    fn set(&self) -> IpcResult<()> {
        fs::write(&self.path, [1u8])?;
        Ok(())
    }

    fn reset(&self) -> IpcResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Consume the signal if it is set.
    fn try_take(&self) -> IpcResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait up to `timeout` for the signal, consuming it.
    fn wait(&self, timeout: Duration) -> IpcResult<bool> {
        let clock = SystemClock::new();
        let outcome = BoundedWait::new(&clock, SIGNAL_POLL)
            .timeout(timeout)
            .run(|_| self.try_take().map(|taken| taken.then_some(())))?;
        Ok(matches!(outcome, WaitOutcome::Ready(())))
    }
}

pub struct RendezvousPublisher {
    dir: PathBuf,
    ready: Signal,
    consumed: Signal,
    ack_timeout: Duration,
    awaiting_ack: bool,
    closed: bool,
}

impl RendezvousPublisher {
    /// Create the rendezvous resources, clearing any stale state.
    pub fn create(config: &ChannelConfig) -> IpcResult<Self> {
        let dir = config.rendezvous_dir.clone();
        fs::create_dir_all(&dir)?;
        let ready = Signal::new(&dir, READY);
        let consumed = Signal::new(&dir, CONSUMED);
        ready.reset()?;
        consumed.reset()?;
        write_atomic(&dir.join(RECORD_FILE), &[0u8; RECORD_SIZE])?;
        debug!(dir = %dir.display(), "rendezvous publisher created");
        Ok(Self {
            dir,
            ready,
            consumed,
            ack_timeout: config.ack_timeout(),
            awaiting_ack: false,
            closed: false,
        })
    }
}

impl StatusPublisher for RendezvousPublisher {
    fn publish(&mut self, message: &StatusMessage) -> IpcResult<()> {
        if self.closed {
            return Err(IpcError::Closed);
        }
        if self.awaiting_ack && !self.consumed.wait(self.ack_timeout)? {
            warn!(status = %message.status, "previous status not consumed; overwriting");
        }
        write_atomic(&self.dir.join(RECORD_FILE), &encode_record(message))?;
        self.ready.set()?;
        self.awaiting_ack = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = fs::remove_file(self.dir.join(RECORD_FILE));
        let _ = self.ready.reset();
        let _ = self.consumed.reset();
    }
}

pub struct RendezvousSubscriber {
    dir: PathBuf,
    ready: Signal,
    consumed: Signal,
    connect_attempts: u32,
    connect_interval: Duration,
    attempts: u32,
    connected: bool,
    closed: bool,
    last: Option<StatusMessage>,
}

impl RendezvousSubscriber {
    /// The shared resources are created by the publisher, so the subscriber
    /// attaches lazily on its first receive.
    pub fn new(config: &ChannelConfig) -> Self {
        let dir = config.rendezvous_dir.clone();
        Self {
            ready: Signal::new(&dir, READY),
            consumed: Signal::new(&dir, CONSUMED),
            dir,
            connect_attempts: config.connect_attempts.max(1),
            connect_interval: config.connect_interval(),
            attempts: 0,
            connected: false,
            closed: false,
            last: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// One establishment attempt per connect interval, within `timeout`.
    fn connect_within(&mut self, timeout: Duration) -> IpcResult<bool> {
        let clock = SystemClock::new();
        let record = self.dir.join(RECORD_FILE);
        let outcome = BoundedWait::new(&clock, self.connect_interval)
            .timeout(timeout)
            .run(|_| {
                if record.exists() {
                    return Ok(Some(()));
                }
                self.attempts += 1;
                if self.attempts >= self.connect_attempts {
                    return Err(IpcError::ChannelUnavailable {
                        attempts: self.attempts,
                    });
                }
                Ok(None)
            })?;
        if matches!(outcome, WaitOutcome::Ready(())) {
            debug!(dir = %self.dir.display(), attempts = self.attempts, "rendezvous subscriber attached");
            self.connected = true;
        }
        Ok(self.connected)
    }
}

impl StatusSubscriber for RendezvousSubscriber {
    fn try_receive(&mut self, timeout: Duration) -> IpcResult<Option<StatusMessage>> {
        if self.closed {
            return Err(IpcError::Closed);
        }
        let start = Instant::now();
        if !self.connected && !self.connect_within(timeout)? {
            return Ok(None);
        }

        loop {
            let elapsed = start.elapsed();
            let Some(remaining) = timeout.checked_sub(elapsed).filter(|d| !d.is_zero()) else {
                return Ok(None);
            };
            if !self.ready.wait(remaining)? {
                return Ok(None);
            }
            let bytes = fs::read(self.dir.join(RECORD_FILE))?;
            self.consumed.set()?;
            match decode_record(&bytes) {
                Some(message) => {
                    self.last = Some(message.clone());
                    return Ok(Some(message));
                }
                None => warn!(len = bytes.len(), "dropping invalid rendezvous record"),
            }
        }
    }

    fn last_status(&self) -> Option<&StatusMessage> {
        self.last.as_ref()
    }

    fn shutdown(&mut self) {
        self.closed = true;
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> IpcResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
