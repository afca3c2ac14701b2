use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration` of this clock's time.
    fn sleep(&self, duration: Duration);
}

/// The real monotonic clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // Let other threads observe progress between virtual ticks.
        std::thread::yield_now();
    }
}

/// Shared cancellation flag, checked once per wait iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a bounded wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// A polling loop with an optional deadline and an optional cancel token.
///
/// Each iteration hands the poll function a time slice (at most `interval`,
/// never past the deadline). A poll may block for up to that slice; if it
/// returns earlier, the remainder is slept so iterations are paced at
/// `interval`.
pub struct BoundedWait<'a> {
    clock: &'a dyn Clock,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: Option<&'a CancelToken>,
}

impl<'a> BoundedWait<'a> {
    pub fn new(clock: &'a dyn Clock, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            timeout: None,
            cancel: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_on(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll until the function yields a value, the deadline passes, or the
    /// token is cancelled. Poll errors end the wait immediately.
    pub fn run<T, E>(
        &self,
        mut poll: impl FnMut(Duration) -> Result<Option<T>, E>,
    ) -> Result<WaitOutcome<T>, E> {
        let start = self.clock.now();
        loop {
            if self.cancel.is_some_and(CancelToken::is_cancelled) {
                return Ok(WaitOutcome::Cancelled);
            }

            let elapsed = self.clock.now().saturating_sub(start);
            let slice = match self.timeout {
                Some(timeout) if elapsed >= timeout => return Ok(WaitOutcome::TimedOut),
                Some(timeout) => self.interval.min(timeout - elapsed),
                None => self.interval,
            };

            let tick = self.clock.now();
            if let Some(value) = poll(slice)? {
                return Ok(WaitOutcome::Ready(value));
            }
            let spent = self.clock.now().saturating_sub(tick);
            if spent < slice {
                self.clock.sleep(slice - spent);
            }
        }
    }

    /// [`run`](Self::run) for polls that cannot fail.
    pub fn until<T>(&self, mut poll: impl FnMut(Duration) -> Option<T>) -> WaitOutcome<T> {
        match self.run::<T, std::convert::Infallible>(|slice| Ok(poll(slice))) {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }
}
