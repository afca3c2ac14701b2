//! Drives one face-recognition attempt from the logon side.
//!
//! `begin` returns at once; a named worker thread opens the status channel,
//! launches the recognizer (optionally after a warm-up pass), waits for a
//! terminal status within the recognition timeout, and on success decrypts
//! the stored password into the credential field.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use smile_core::config::{AppConfig, AuthConfig};
use smile_core::session::{Observation, RecognitionSession};
use smile_core::status::{RecognitionStatus, StatusMessage};
use smile_core::store::{keys, ConfigStore};
use smile_core::wait::{BoundedWait, CancelToken, Clock, SystemClock, WaitOutcome};
use smile_ipc::{IpcResult, StatusSubscriber};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{AuthError, AuthResult};
use crate::secrets;
use crate::supervisor::{LaunchMode, ProcessSupervisor, RecognizerLauncher};

const DRAIN_SLICE: Duration = Duration::from_millis(1);
const DRAIN_LIMIT: usize = 1024;

/// Where the current (or last) attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Launching,
    Warmup,
    Recognizing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl OrchestratorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestratorState::Succeeded
                | OrchestratorState::Failed
                | OrchestratorState::TimedOut
                | OrchestratorState::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub struct AttemptSettings {
    pub recognition_timeout: Duration,
    pub check_interval: Duration,
    /// `None` defers to the store's `warmup` toggle.
    pub warmup: Option<bool>,
}

impl From<&AuthConfig> for AttemptSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            recognition_timeout: config.recognition_timeout(),
            check_interval: config.check_interval(),
            warmup: config.warmup_enabled,
        }
    }
}

pub type SubscriberFactory = Box<dyn Fn() -> IpcResult<Box<dyn StatusSubscriber>> + Send + Sync>;

/// Called with the recognized username once the credential is installed.
pub type OnReady = Box<dyn FnOnce(Option<String>) + Send>;
pub type OnFailed = Box<dyn FnOnce(AuthError) + Send>;

struct Control {
    state: OrchestratorState,
    mirror: RecognitionSession,
    active: bool,
    cancel: CancelToken,
}

struct Shared {
    settings: AttemptSettings,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ConfigStore>,
    subscribers: SubscriberFactory,
    launcher: Mutex<Box<dyn RecognizerLauncher>>,
    control: Mutex<Control>,
    credential: Mutex<Zeroizing<String>>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: OrchestratorState) {
        let mut control = self.control();
        debug!(from = ?control.state, to = ?state, "orchestrator state");
        control.state = state;
    }

    fn observe(&self, status: RecognitionStatus) -> Observation {
        self.control().mirror.observe(status)
    }

    fn clear_credential(&self) {
        let mut field = self.credential.lock().unwrap_or_else(|e| e.into_inner());
        *field = Zeroizing::new(String::new());
    }

    fn install_credential(&self, password: Zeroizing<String>) {
        let mut field = self.credential.lock().unwrap_or_else(|e| e.into_inner());
        *field = password;
    }

    fn warmup_enabled(&self) -> bool {
        self.settings.warmup.unwrap_or_else(|| {
            self.store
                .get_bool(keys::WARMUP, false)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "cannot read warmup toggle");
                    false
                })
        })
    }

    /// Record the outcome and release the attempt.
    fn settle(&self, result: &AuthResult<Option<String>>) {
        let state = match result {
            Ok(_) => OrchestratorState::Succeeded,
            Err(AuthError::RecognitionTimedOut(_)) => OrchestratorState::TimedOut,
            Err(AuthError::Cancelled) => OrchestratorState::Cancelled,
            Err(_) => OrchestratorState::Failed,
        };
        if result.is_err() {
            self.clear_credential();
        }
        let mut control = self.control();
        control.state = state;
        control.active = false;
    }
}

/// Owns the resources of one attempt and releases them on every exit path,
/// unwinding included.
struct AttemptGuard<'a> {
    shared: &'a Shared,
    launcher: MutexGuard<'a, Box<dyn RecognizerLauncher>>,
    subscriber: Option<Box<dyn StatusSubscriber>>,
    settled: bool,
}

impl AttemptGuard<'_> {
    fn run(&mut self, cancel: &CancelToken) -> AuthResult<Option<String>> {
        let shared = self.shared;
        let subscriber = (shared.subscribers)().map_err(|e| AuthError::ChannelUnavailable(e.to_string()))?;
        self.subscriber = Some(subscriber);

        if shared.warmup_enabled() {
            shared.set_state(OrchestratorState::Warmup);
            self.warmup(cancel)?;
        }

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        shared.set_state(OrchestratorState::Recognizing);
        shared.control().mirror.reset();
        let handle = self.launcher.launch(LaunchMode::Recognize)?;
        info!(pid = handle.pid, "waiting for recognition");

        let verdict = self.await_verdict(cancel)?;
        match verdict.status {
            RecognitionStatus::Success => {
                let username = verdict.username().map(str::to_owned);
                info!(user = username.as_deref().unwrap_or("<unknown>"), "face recognized");
                let password = secrets::recover_password(shared.store.as_ref())?;
                shared.install_credential(password);
                Ok(username)
            }
            other => {
                info!(status = %other, "recognition did not succeed");
                Err(AuthError::RecognitionFailed)
            }
        }
    }

    /// Run the warm-up recognizer until it sees a face. Unbounded in time.
    fn warmup(&mut self, cancel: &CancelToken) -> AuthResult<()> {
        let shared = self.shared;
        let handle = self.launcher.launch(LaunchMode::Warmup)?;
        let subscriber = self
            .subscriber
            .as_mut()
            .ok_or_else(|| AuthError::ChannelUnavailable("subscriber not open".into()))?;

        let mut warm = RecognitionSession::new();
        let outcome = BoundedWait::new(shared.clock.as_ref(), shared.settings.check_interval)
            .cancel_on(cancel)
            .run(|slice| {
                let Some(message) = receive(&mut **subscriber, slice)? else {
                    return Ok(None);
                };
                match warm.observe(message.status) {
                    Observation::Transition { to: RecognitionStatus::FaceDetected, .. } => Ok(Some(())),
                    Observation::Transition { to, .. } if to.is_terminal() => {
                        warn!(status = %to, "warm-up recognizer ended before seeing a face");
                        Err(AuthError::RecognitionFailed)
                    }
                    _ => Ok(None),
                }
            })?;

        match outcome {
            WaitOutcome::Ready(()) => {
                info!("face detected during warm-up");
                self.launcher.terminate(handle);
                // The warm-up process is reaped, so all it ever sent is queued.
                let stale = drain(&mut **subscriber)?;
                if stale > 0 {
                    debug!(stale, "discarded warm-up statuses");
                }
                Ok(())
            }
            WaitOutcome::Cancelled => Err(AuthError::Cancelled),
            WaitOutcome::TimedOut => Err(AuthError::RecognitionFailed),
        }
    }

    /// Wait for the first terminal transition of the mirror.
    fn await_verdict(&mut self, cancel: &CancelToken) -> AuthResult<StatusMessage> {
        let shared = self.shared;
        let timeout = shared.settings.recognition_timeout;
        let subscriber = self
            .subscriber
            .as_mut()
            .ok_or_else(|| AuthError::ChannelUnavailable("subscriber not open".into()))?;

        let outcome = BoundedWait::new(shared.clock.as_ref(), shared.settings.check_interval)
            .timeout(timeout)
            .cancel_on(cancel)
            .run::<_, AuthError>(|slice| {
                let Some(message) = receive(&mut **subscriber, slice)? else {
                    return Ok(None);
                };
                match shared.observe(message.status) {
                    Observation::Transition { to, .. } if to.is_terminal() => Ok(Some(message)),
                    Observation::Transition { from, to } => {
                        info!(%from, %to, "recognizer progress");
                        Ok(None)
                    }
                    Observation::Heartbeat(status) => {
                        debug!(%status, "heartbeat");
                        Ok(None)
                    }
                    Observation::Ignored(status) => {
                        debug!(%status, "status after verdict ignored");
                        Ok(None)
                    }
                }
            })?;

        match outcome {
            WaitOutcome::Ready(message) => Ok(message),
            WaitOutcome::TimedOut => {
                warn!(timeout_ms = timeout.as_millis() as u64, "recognition timed out");
                Err(AuthError::RecognitionTimedOut(timeout))
            }
            WaitOutcome::Cancelled => Err(AuthError::Cancelled),
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.launcher.shutdown();
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber.shutdown();
        }
        if !self.settled {
            error!("recognition attempt aborted");
            self.shared.settle(&Err(AuthError::RecognitionFailed));
        }
    }
}

fn receive(subscriber: &mut dyn StatusSubscriber, slice: Duration) -> AuthResult<Option<StatusMessage>> {
    subscriber
        .try_receive(slice)
        .map_err(|e| AuthError::ChannelUnavailable(e.to_string()))
}

/// Discard whatever is queued on the channel. Returns how many were dropped.
fn drain(subscriber: &mut dyn StatusSubscriber) -> AuthResult<usize> {
    let mut dropped = 0;
    while dropped < DRAIN_LIMIT {
        if receive(subscriber, DRAIN_SLICE)?.is_none() {
            break;
        }
        dropped += 1;
    }
    Ok(dropped)
}

/// Host-facing entry point: `begin`, `cancel`, and the credential field.
pub struct CredentialOrchestrator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CredentialOrchestrator {
    /// Wire up the real recognizer process and the configured channel.
    pub fn new(config: &AppConfig, store: Arc<dyn ConfigStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let supervisor = ProcessSupervisor::new(config.recognizer.clone(), store.clone(), clock.clone())
            .with_config_file(config.source.clone());
        let channel = config.channel.clone();
        Self::with_parts(
            AttemptSettings::from(&config.auth),
            clock,
            store,
            Box::new(move || smile_ipc::open_subscriber(&channel)),
            Box::new(supervisor),
        )
    }

    pub fn with_parts(
        settings: AttemptSettings,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ConfigStore>,
        subscribers: SubscriberFactory,
        launcher: Box<dyn RecognizerLauncher>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                clock,
                store,
                subscribers,
                launcher: Mutex::new(launcher),
                control: Mutex::new(Control {
                    state: OrchestratorState::Idle,
                    mirror: RecognitionSession::new(),
                    active: false,
                    cancel: CancelToken::new(),
                }),
                credential: Mutex::new(Zeroizing::new(String::new())),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start an attempt. Returns `false` (and does nothing) while another
    /// attempt is active. Exactly one of the callbacks runs per attempt.
    pub fn begin(
        &self,
        on_ready: impl FnOnce(Option<String>) + Send + 'static,
        on_failed: impl FnOnce(AuthError) + Send + 'static,
    ) -> bool {
        let cancel = {
            let mut control = self.shared.control();
            if control.active {
                debug!("begin ignored: attempt already active");
                return false;
            }
            control.active = true;
            control.state = OrchestratorState::Launching;
            control.mirror.reset();
            control.cancel = CancelToken::new();
            control.cancel.clone()
        };
        self.shared.clear_credential();

        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = worker.take() {
            // A worker that already settled may still be running callbacks.
            if previous.is_finished() {
                let _ = previous.join();
            }
        }

        let shared = Arc::clone(&self.shared);
        let on_ready: OnReady = Box::new(on_ready);
        let on_failed: OnFailed = Box::new(on_failed);
        let spawned = std::thread::Builder::new()
            .name("face-auth".into())
            .spawn(move || attempt(shared, cancel, on_ready, on_failed));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn recognition worker");
                self.shared.settle(&Err(AuthError::LaunchFailed(e.to_string())));
                false
            }
        }
    }

    /// Request cancellation; observed within one check interval.
    pub fn cancel(&self) {
        let mut control = self.shared.control();
        if control.active {
            info!("cancelling recognition attempt");
            control.mirror.request_cancel();
            control.cancel.cancel();
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.shared.control().state
    }

    pub fn is_active(&self) -> bool {
        self.shared.control().active
    }

    /// Move the recovered password out of the credential field.
    pub fn take_credential(&self) -> Option<Zeroizing<String>> {
        let mut field = self.shared.credential.lock().unwrap_or_else(|e| e.into_inner());
        if field.is_empty() {
            return None;
        }
        Some(Zeroizing::new(std::mem::take(&mut **field)))
    }

    /// Block until the current worker has finished, callbacks included.
    pub fn join(&self) {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("recognition worker panicked");
            }
        }
    }
}

impl Drop for CredentialOrchestrator {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

fn attempt(shared: Arc<Shared>, cancel: CancelToken, on_ready: OnReady, on_failed: OnFailed) {
    let id = Uuid::new_v4();
    let span = tracing::info_span!("attempt", %id);
    let _enter = span.enter();
    info!("recognition attempt started");

    let launcher = shared.launcher.lock().unwrap_or_else(|e| e.into_inner());
    let mut guard = AttemptGuard {
        shared: &shared,
        launcher,
        subscriber: None,
        settled: false,
    };
    let result = guard.run(&cancel);
    guard.settled = true;
    // Tear down before telling the host anything.
    drop(guard);

    shared.settle(&result);
    match result {
        Ok(username) => {
            info!("credential ready");
            on_ready(username);
        }
        Err(e) => {
            info!(error = %e, "recognition attempt ended");
            on_failed(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smile_core::store::MemoryStore;
    use smile_core::wait::ManualClock;
    use std::sync::mpsc;

    /// Feeds whatever the test sends; each receive waits a few real
    /// milliseconds so virtual time advances at a bounded pace.
    struct ChannelSubscriber {
        rx: mpsc::Receiver<StatusMessage>,
        last: Option<StatusMessage>,
        closed: Arc<Mutex<bool>>,
    }

    impl StatusSubscriber for ChannelSubscriber {
        fn try_receive(&mut self, _timeout: Duration) -> IpcResult<Option<StatusMessage>> {
            match self.rx.recv_timeout(Duration::from_millis(2)) {
                Ok(message) => {
                    self.last = Some(message.clone());
                    Ok(Some(message))
                }
                Err(_) => Ok(None),
            }
        }

        fn last_status(&self) -> Option<&StatusMessage> {
            self.last.as_ref()
        }

        fn shutdown(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    #[derive(Default)]
    struct LauncherLog {
        launches: Vec<LaunchMode>,
        terminated: Vec<u32>,
        alive: Option<u32>,
    }

    /// Holds `terminate` until the test lets it continue.
    struct TerminateGate {
        entered: mpsc::Sender<()>,
        resume: mpsc::Receiver<()>,
    }

    struct FakeLauncher {
        log: Arc<Mutex<LauncherLog>>,
        next_pid: u32,
        fail: bool,
        gate: Option<TerminateGate>,
    }

    impl RecognizerLauncher for FakeLauncher {
        fn launch(&mut self, mode: LaunchMode) -> AuthResult<crate::ProcessHandle> {
            if self.fail {
                return Err(AuthError::LaunchFailed("no such file".into()));
            }
            self.next_pid += 1;
            let mut log = self.log.lock().unwrap();
            log.launches.push(mode);
            log.alive = Some(self.next_pid);
            Ok(crate::ProcessHandle {
                pid: self.next_pid,
                mode,
            })
        }

        fn is_alive(&mut self, handle: &crate::ProcessHandle) -> bool {
            self.log.lock().unwrap().alive == Some(handle.pid)
        }

        fn terminate(&mut self, handle: crate::ProcessHandle) {
            if let Some(gate) = &self.gate {
                gate.entered.send(()).unwrap();
                gate.resume.recv_timeout(Duration::from_secs(10)).unwrap();
            }
            let mut log = self.log.lock().unwrap();
            if log.alive == Some(handle.pid) {
                log.alive = None;
                log.terminated.push(handle.pid);
            }
        }

        fn shutdown(&mut self) {
            let mut log = self.log.lock().unwrap();
            if let Some(pid) = log.alive.take() {
                log.terminated.push(pid);
            }
        }
    }

    struct Harness {
        orchestrator: CredentialOrchestrator,
        clock: Arc<ManualClock>,
        tx: mpsc::Sender<StatusMessage>,
        launcher: Arc<Mutex<LauncherLog>>,
        subscriber_closed: Arc<Mutex<bool>>,
        store: Arc<MemoryStore>,
    }

    fn harness(warmup: bool, launch_fails: bool) -> Harness {
        harness_with_timeout(warmup, launch_fails, Duration::from_secs(3600))
    }

    fn harness_with_timeout(warmup: bool, launch_fails: bool, timeout: Duration) -> Harness {
        harness_with(warmup, launch_fails, timeout, None)
    }

    fn harness_with(warmup: bool, launch_fails: bool, timeout: Duration, gate: Option<TerminateGate>) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::new());
        secrets::store_password(store.as_ref(), "s3cret!").unwrap();

        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(Mutex::new(false));
        let slot = Mutex::new(Some(ChannelSubscriber {
            rx,
            last: None,
            closed: closed.clone(),
        }));
        let subscribers: SubscriberFactory = Box::new(move || {
            let sub = slot.lock().unwrap().take().ok_or(smile_ipc::IpcError::Closed)?;
            Ok(Box::new(sub) as Box<dyn StatusSubscriber>)
        });

        let log = Arc::new(Mutex::new(LauncherLog::default()));
        let launcher = FakeLauncher {
            log: log.clone(),
            next_pid: 100,
            fail: launch_fails,
            gate,
        };

        let orchestrator = CredentialOrchestrator::with_parts(
            AttemptSettings {
                recognition_timeout: timeout,
                check_interval: Duration::from_millis(100),
                warmup: Some(warmup),
            },
            clock.clone(),
            store.clone(),
            subscribers,
            Box::new(launcher),
        );
        Harness {
            orchestrator,
            clock,
            tx,
            launcher: log,
            subscriber_closed: closed,
            store,
        }
    }

    enum Outcome {
        Ready(Option<String>),
        Failed(AuthError),
    }

    fn begin(h: &Harness) -> mpsc::Receiver<Outcome> {
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        assert!(h.orchestrator.begin(
            move |user| tx.send(Outcome::Ready(user)).unwrap(),
            move |err| tx2.send(Outcome::Failed(err)).unwrap(),
        ));
        rx
    }

    fn send(h: &Harness, status: RecognitionStatus, user: Option<&str>) {
        let mut msg = StatusMessage::new(status);
        if let Some(user) = user {
            msg = msg.with_username(user);
        }
        h.tx.send(msg).unwrap();
    }

    fn outcome(rx: &mpsc::Receiver<Outcome>) -> Outcome {
        rx.recv_timeout(Duration::from_secs(10)).expect("attempt never settled")
    }

    fn wait_for_state(h: &Harness, state: OrchestratorState) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while h.orchestrator.state() != state {
            assert!(std::time::Instant::now() < deadline, "never reached {state:?}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn success_installs_credential_once() {
        let h = harness(false, false);
        send(&h, RecognitionStatus::Recognizing, None);
        send(&h, RecognitionStatus::Recognizing, None);
        send(&h, RecognitionStatus::Success, Some("alice"));
        send(&h, RecognitionStatus::Success, Some("alice"));
        send(&h, RecognitionStatus::Success, Some("alice"));

        let rx = begin(&h);
        match outcome(&rx) {
            Outcome::Ready(user) => assert_eq!(user.as_deref(), Some("alice")),
            Outcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
        h.orchestrator.join();
        assert!(rx.try_recv().is_err(), "callback ran more than once");
        assert_eq!(h.orchestrator.state(), OrchestratorState::Succeeded);
        assert!(!h.orchestrator.is_active());
        assert_eq!(h.orchestrator.take_credential().unwrap().as_str(), "s3cret!");
        assert!(h.orchestrator.take_credential().is_none());

        let log = h.launcher.lock().unwrap();
        assert_eq!(log.launches, vec![LaunchMode::Recognize]);
        assert!(log.alive.is_none());
        assert!(*h.subscriber_closed.lock().unwrap());
    }

    #[test]
    fn failure_skips_decrypt_and_clears_field() {
        let h = harness(false, false);
        send(&h, RecognitionStatus::Recognizing, None);
        send(&h, RecognitionStatus::Failed, None);

        let rx = begin(&h);
        assert!(matches!(outcome(&rx), Outcome::Failed(AuthError::RecognitionFailed)));
        h.orchestrator.join();
        assert_eq!(h.orchestrator.state(), OrchestratorState::Failed);
        assert!(h.orchestrator.take_credential().is_none());
        assert!(h.launcher.lock().unwrap().alive.is_none());
    }

    #[test]
    fn producer_exit_counts_as_failure() {
        let h = harness(false, false);
        send(&h, RecognitionStatus::ProcessEnded, None);
        let rx = begin(&h);
        assert!(matches!(outcome(&rx), Outcome::Failed(AuthError::RecognitionFailed)));
    }

    #[test]
    fn silent_producer_times_out_on_the_virtual_clock() {
        let h = harness_with_timeout(false, false, Duration::from_millis(30_000));
        send(&h, RecognitionStatus::Recognizing, None);

        let rx = begin(&h);
        match outcome(&rx) {
            Outcome::Failed(AuthError::RecognitionTimedOut(t)) => {
                assert_eq!(t, Duration::from_millis(30_000))
            }
            _ => panic!("expected timeout"),
        }
        h.orchestrator.join();
        let elapsed = h.clock.now();
        assert!(elapsed >= Duration::from_millis(30_000));
        assert!(elapsed <= Duration::from_millis(30_100), "took {elapsed:?}");
        assert_eq!(h.orchestrator.state(), OrchestratorState::TimedOut);
        assert!(h.launcher.lock().unwrap().alive.is_none());
    }

    #[test]
    fn cancel_mid_recognition() {
        let h = harness(false, false);
        send(&h, RecognitionStatus::Recognizing, None);
        let rx = begin(&h);
        wait_for_state(&h, OrchestratorState::Recognizing);

        h.orchestrator.cancel();
        assert!(matches!(outcome(&rx), Outcome::Failed(AuthError::Cancelled)));
        h.orchestrator.join();
        assert_eq!(h.orchestrator.state(), OrchestratorState::Cancelled);

        let log = h.launcher.lock().unwrap();
        assert!(log.alive.is_none());
        assert_eq!(log.terminated.len(), 1);
    }

    #[test]
    fn second_begin_while_active_is_noop() {
        let h = harness(false, false);
        let _rx = begin(&h);
        assert!(!h.orchestrator.begin(|_| {}, |_| {}));
        h.orchestrator.cancel();
        h.orchestrator.join();
        assert!(!h.orchestrator.is_active());
    }

    #[test]
    fn launch_failure_is_immediate() {
        let h = harness(false, true);
        let rx = begin(&h);
        assert!(matches!(outcome(&rx), Outcome::Failed(AuthError::LaunchFailed(_))));
        h.orchestrator.join();
        assert_eq!(h.orchestrator.state(), OrchestratorState::Failed);
        assert_eq!(h.clock.now(), Duration::ZERO);
    }

    #[test]
    fn undecryptable_secret_reported_distinctly() {
        let h = harness(false, false);
        h.store.set(keys::KEY, "00").unwrap();
        send(&h, RecognitionStatus::Success, Some("alice"));
        let rx = begin(&h);
        assert!(matches!(outcome(&rx), Outcome::Failed(AuthError::DecryptFailed(_))));
        h.orchestrator.join();
        assert_eq!(h.orchestrator.state(), OrchestratorState::Failed);
        assert!(h.orchestrator.take_credential().is_none());
    }

    #[test]
    fn warmup_then_recognition() {
        let h = harness(true, false);
        let rx = begin(&h);
        wait_for_state(&h, OrchestratorState::Warmup);
        send(&h, RecognitionStatus::Recognizing, None);
        send(&h, RecognitionStatus::FaceDetected, None);

        wait_for_state(&h, OrchestratorState::Recognizing);
        send(&h, RecognitionStatus::Recognizing, None);
        send(&h, RecognitionStatus::Success, Some("bob"));

        match outcome(&rx) {
            Outcome::Ready(user) => assert_eq!(user.as_deref(), Some("bob")),
            Outcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
        h.orchestrator.join();
        let log = h.launcher.lock().unwrap();
        assert_eq!(log.launches, vec![LaunchMode::Warmup, LaunchMode::Recognize]);
        assert_eq!(log.terminated.len(), 2);
    }

    #[test]
    fn statuses_queued_behind_warmup_are_discarded() {
        let h = harness(true, false);
        let rx = begin(&h);
        wait_for_state(&h, OrchestratorState::Warmup);
        // The warm-up process keeps talking until it is stopped.
        send(&h, RecognitionStatus::FaceDetected, None);
        send(&h, RecognitionStatus::FaceDetected, None);
        send(&h, RecognitionStatus::ProcessEnded, None);
        wait_for_state(&h, OrchestratorState::Recognizing);
        send(&h, RecognitionStatus::Success, Some("carol"));

        assert!(matches!(outcome(&rx), Outcome::Ready(Some(ref u)) if u == "carol"));
    }

    #[test]
    fn future_timestamps_from_warmup_do_not_hide_recognition() {
        // A wall clock stepping backwards between the two processes.
        let h = harness(true, false);
        let rx = begin(&h);
        wait_for_state(&h, OrchestratorState::Warmup);
        h.tx.send(StatusMessage::at(RecognitionStatus::FaceDetected, None, u64::MAX / 2)).unwrap();
        wait_for_state(&h, OrchestratorState::Recognizing);
        h.tx.send(StatusMessage::at(RecognitionStatus::Success, Some("erin"), 1)).unwrap();

        assert!(matches!(outcome(&rx), Outcome::Ready(Some(ref u)) if u == "erin"));
    }

    #[test]
    fn cancel_during_warmup_teardown_skips_recognition() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let h = harness_with(
            true,
            false,
            Duration::from_secs(3600),
            Some(TerminateGate {
                entered: entered_tx,
                resume: resume_rx,
            }),
        );
        let rx = begin(&h);
        wait_for_state(&h, OrchestratorState::Warmup);
        send(&h, RecognitionStatus::FaceDetected, None);

        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        h.orchestrator.cancel();
        resume_tx.send(()).unwrap();

        assert!(matches!(outcome(&rx), Outcome::Failed(AuthError::Cancelled)));
        h.orchestrator.join();
        assert_eq!(h.launcher.lock().unwrap().launches, vec![LaunchMode::Warmup]);
    }

    #[test]
    fn new_attempt_after_failure() {
        let h = harness(false, true);
        let rx = begin(&h);
        assert!(matches!(outcome(&rx), Outcome::Failed(_)));
        h.orchestrator.join();
        // The fake subscriber is single-use, so the retry fails on the channel.
        let rx = begin(&h);
        assert!(matches!(outcome(&rx), Outcome::Failed(AuthError::ChannelUnavailable(_))));
    }
}
