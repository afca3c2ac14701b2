use std::sync::Arc;
use std::time::Duration;

use smile_core::config::RecognitionConfig;
use smile_core::wait::{BoundedWait, CancelToken, Clock, WaitOutcome};
use smile_core::{RecognitionSession, RecognitionStatus, StatusMessage};
use smile_ipc::StatusPublisher;
use tracing::{debug, error, info, warn};

use crate::error::RecognizerResult;
use crate::gallery::Gallery;
use crate::vision::{Backend, FaceAnalyzer, FrameSource};

/// How long warm-up keeps announcing a detected face before giving up on
/// being stopped.
const WARMUP_HOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub similarity_threshold: f32,
    pub max_liveness_failures: u32,
    pub max_match_attempts: u32,
    pub frame_interval: Duration,
    pub heartbeat_every: u32,
    pub liveness_enabled: bool,
    pub liveness_threshold: f32,
    pub linger: Duration,
    pub warmup_hold: Duration,
}

impl From<&RecognitionConfig> for EngineSettings {
    fn from(config: &RecognitionConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            max_liveness_failures: config.max_liveness_failures,
            max_match_attempts: config.max_match_attempts.max(1),
            frame_interval: config.frame_interval().max(Duration::from_millis(1)),
            heartbeat_every: config.heartbeat_every,
            liveness_enabled: config.liveness_enabled,
            liveness_threshold: config.liveness_threshold,
            linger: config.linger(),
            warmup_hold: WARMUP_HOLD,
        }
    }
}

/// How a capture run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success(String),
    Failed,
    Error,
    /// Warm-up saw a face.
    FaceDetected,
    /// Stopped from outside before resolving.
    Stopped,
}

enum Step {
    Matched(String),
    Rejected(&'static str),
    Exhausted,
}

#[derive(Default)]
struct Counters {
    frames: u64,
    attempts: u32,
    liveness_failures: u32,
}

pub struct RecognitionEngine {
    settings: EngineSettings,
    gallery: Gallery,
    source: Box<dyn FrameSource>,
    analyzer: Box<dyn FaceAnalyzer>,
    publisher: Box<dyn StatusPublisher>,
    clock: Arc<dyn Clock>,
    stop: CancelToken,
    session: RecognitionSession,
    username: Option<String>,
}

impl RecognitionEngine {
    pub fn new(
        settings: EngineSettings,
        gallery: Gallery,
        backend: Backend,
        publisher: Box<dyn StatusPublisher>,
        clock: Arc<dyn Clock>,
        stop: CancelToken,
    ) -> Self {
        let (source, analyzer) = backend;
        Self {
            settings,
            gallery,
            source,
            analyzer,
            publisher,
            clock,
            stop,
            session: RecognitionSession::new(),
            username: None,
        }
    }

    pub fn state(&self) -> RecognitionStatus {
        self.session.state()
    }

    /// Match faces against the gallery until one terminal state is reached,
    /// then keep re-publishing it for the linger period.
    pub fn recognize(&mut self) -> Verdict {
        if self.gallery.is_empty() {
            warn!("face gallery is empty; nobody can be recognized");
        }
        self.enter(RecognitionStatus::Recognizing);
        info!(samples = self.gallery.len(), "recognition started");

        let clock = Arc::clone(&self.clock);
        let stop = self.stop.clone();
        let mut counters = Counters::default();
        let outcome = BoundedWait::new(clock.as_ref(), self.settings.frame_interval)
            .cancel_on(&stop)
            .run(|_| self.step(&mut counters));

        let verdict = match outcome {
            Ok(WaitOutcome::Ready(Step::Matched(username))) => {
                info!(%username, frames = counters.frames, "face recognized");
                self.username = Some(username.clone());
                self.enter(RecognitionStatus::Success);
                Verdict::Success(username)
            }
            Ok(WaitOutcome::Ready(Step::Rejected(reason))) => {
                info!(reason, frames = counters.frames, attempts = counters.attempts, "recognition failed");
                self.enter(RecognitionStatus::Failed);
                Verdict::Failed
            }
            Ok(WaitOutcome::Ready(Step::Exhausted)) => {
                error!(frames = counters.frames, "frame source exhausted");
                self.enter(RecognitionStatus::Error);
                Verdict::Error
            }
            Ok(WaitOutcome::Cancelled | WaitOutcome::TimedOut) => {
                info!(frames = counters.frames, "recognition stopped");
                return Verdict::Stopped;
            }
            Err(e) => {
                error!(error = %e, "recognition fault");
                self.enter(RecognitionStatus::Error);
                Verdict::Error
            }
        };
        self.linger(self.settings.linger);
        verdict
    }

    /// Announce `FaceDetected` as soon as any face shows up, and hold it
    /// until stopped.
    pub fn warmup(&mut self) -> Verdict {
        self.enter(RecognitionStatus::Recognizing);
        info!("warm-up started");

        let clock = Arc::clone(&self.clock);
        let stop = self.stop.clone();
        let mut counters = Counters::default();
        let outcome = BoundedWait::new(clock.as_ref(), self.settings.frame_interval)
            .cancel_on(&stop)
            .run(|_| self.detect_any(&mut counters));

        match outcome {
            Ok(WaitOutcome::Ready(true)) => {
                info!(frames = counters.frames, "face detected");
                self.enter(RecognitionStatus::FaceDetected);
                self.linger(self.settings.warmup_hold);
                Verdict::FaceDetected
            }
            Ok(WaitOutcome::Ready(false)) => {
                error!(frames = counters.frames, "frame source exhausted during warm-up");
                self.enter(RecognitionStatus::Error);
                self.linger(self.settings.linger);
                Verdict::Error
            }
            Ok(WaitOutcome::Cancelled | WaitOutcome::TimedOut) => Verdict::Stopped,
            Err(e) => {
                error!(error = %e, "warm-up fault");
                self.enter(RecognitionStatus::Error);
                self.linger(self.settings.linger);
                Verdict::Error
            }
        }
    }

    /// Announce the process exit and close the channel.
    pub fn finish(mut self) {
        publish_or_warn(
            self.publisher.as_mut(),
            &StatusMessage::new(RecognitionStatus::ProcessEnded),
        );
        self.publisher.shutdown();
    }

    fn step(&mut self, counters: &mut Counters) -> RecognizerResult<Option<Step>> {
        counters.frames += 1;
        self.heartbeat(counters.frames);

        let Some(frame) = self.source.next_frame()? else {
            return Ok(Some(Step::Exhausted));
        };
        let Some(face) = self.analyzer.detect(&frame)? else {
            return Ok(None);
        };

        if self.settings.liveness_enabled {
            let score = self.analyzer.liveness(&frame, &face)?;
            if score < self.settings.liveness_threshold {
                counters.liveness_failures += 1;
                debug!(score, consecutive = counters.liveness_failures, "liveness rejected");
                if counters.liveness_failures > self.settings.max_liveness_failures {
                    return Ok(Some(Step::Rejected("liveness")));
                }
                return Ok(None);
            }
            counters.liveness_failures = 0;
        }

        let features = self.analyzer.extract(&frame, &face)?;
        counters.attempts += 1;
        if let Some(hit) = self.gallery.best_match(&features) {
            debug!(username = %hit.username, similarity = hit.similarity, "best gallery match");
            if hit.similarity > self.settings.similarity_threshold {
                return Ok(Some(Step::Matched(hit.username)));
            }
        }
        if counters.attempts >= self.settings.max_match_attempts {
            return Ok(Some(Step::Rejected("no match")));
        }
        Ok(None)
    }

    fn detect_any(&mut self, counters: &mut Counters) -> RecognizerResult<Option<bool>> {
        counters.frames += 1;
        self.heartbeat(counters.frames);

        let Some(frame) = self.source.next_frame()? else {
            return Ok(Some(false));
        };
        Ok(self.analyzer.detect(&frame)?.map(|_| true))
    }

    fn heartbeat(&mut self, frames: u64) {
        let every = u64::from(self.settings.heartbeat_every);
        if every > 0 && frames % every == 0 {
            debug!(state = %self.session.state(), frames, "heartbeat");
            self.publish_current();
        }
    }

    fn enter(&mut self, status: RecognitionStatus) {
        match self.session.advance(status) {
            Ok(_) => self.publish_current(),
            Err(e) => warn!(error = %e, "state change refused"),
        }
    }

    /// Keep re-publishing the current state for `period`, or until stopped.
    fn linger(&mut self, period: Duration) {
        if period.is_zero() {
            return;
        }
        let clock = Arc::clone(&self.clock);
        let stop = self.stop.clone();
        BoundedWait::new(clock.as_ref(), self.settings.frame_interval.min(period))
            .timeout(period)
            .cancel_on(&stop)
            .until(|_| {
                self.publish_current();
                None::<()>
            });
    }

    fn publish_current(&mut self) {
        let mut message = StatusMessage::new(self.session.state());
        if let Some(username) = &self.username {
            message = message.with_username(username);
        }
        publish_or_warn(self.publisher.as_mut(), &message);
    }
}

/// Report a fault that happened before the capture loop could start.
pub fn publish_fault(publisher: &mut dyn StatusPublisher) {
    publish_or_warn(publisher, &StatusMessage::new(RecognitionStatus::Error));
    publish_or_warn(publisher, &StatusMessage::new(RecognitionStatus::ProcessEnded));
}

fn publish_or_warn(publisher: &mut dyn StatusPublisher, message: &StatusMessage) {
    if let Err(e) = publisher.publish(message) {
        warn!(status = %message.status, error = %e, "status not published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use smile_core::wait::ManualClock;
    use smile_ipc::IpcResult;

    use crate::gallery::Sample;
    use crate::replay::{ReplayBackend, ReplayScript, ScriptedFrame};
    use RecognitionStatus::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<StatusMessage>>>);

    impl Recorder {
        fn statuses(&self) -> Vec<RecognitionStatus> {
            self.0.lock().unwrap().iter().map(|m| m.status).collect()
        }

        fn messages(&self) -> Vec<StatusMessage> {
            self.0.lock().unwrap().clone()
        }
    }

    impl StatusPublisher for Recorder {
        fn publish(&mut self, message: &StatusMessage) -> IpcResult<()> {
            self.0.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            max_match_attempts: 3,
            ..EngineSettings::from(&RecognitionConfig::default())
        }
    }

    fn alice_gallery() -> Gallery {
        Gallery::from_samples(vec![Sample {
            username: "alice".into(),
            features: vec![1.0, 0.0, 0.0],
        }])
    }

    fn engine(settings: EngineSettings, script: ReplayScript) -> (RecognitionEngine, Recorder, Arc<ManualClock>) {
        let recorder = Recorder::default();
        let clock = Arc::new(ManualClock::new());
        let (source, analyzer) = ReplayBackend::new(script).split();
        let engine = RecognitionEngine::new(
            settings,
            alice_gallery(),
            (Box::new(source), Box::new(analyzer)),
            Box::new(recorder.clone()),
            clock.clone(),
            CancelToken::new(),
        );
        (engine, recorder, clock)
    }

    fn looping(frames: Vec<ScriptedFrame>) -> ReplayScript {
        ReplayScript { repeat: true, frames }
    }

    #[test]
    fn matching_face_succeeds_and_lingers() {
        let script = looping(vec![
            ScriptedFrame::empty(),
            ScriptedFrame::face(vec![0.9, 0.1, 0.0], 0.95),
        ]);
        let (mut engine, recorder, _) = engine(settings(), script);

        assert_eq!(engine.recognize(), Verdict::Success("alice".into()));
        assert_eq!(engine.state(), Success);

        let messages = recorder.messages();
        assert_eq!(messages[0].status, Recognizing);
        let successes: Vec<_> = messages.iter().filter(|m| m.status == Success).collect();
        assert!(successes.len() > 1, "terminal status should be repeated while lingering");
        assert!(successes.iter().all(|m| m.username() == Some("alice")));
        assert_eq!(messages.last().unwrap().status, Success);
    }

    #[test]
    fn similarity_must_exceed_threshold() {
        // cos = 0.6 is below 0.62
        let script = looping(vec![ScriptedFrame::face(vec![0.6, 0.8, 0.0], 1.0)]);
        let (mut engine, recorder, _) = engine(settings(), script);

        assert_eq!(engine.recognize(), Verdict::Failed);
        assert!(!recorder.statuses().contains(&Success));
        assert!(recorder.messages().iter().all(|m| m.username().is_none()));
    }

    #[test]
    fn spoofed_face_never_matches() {
        let script = looping(vec![ScriptedFrame::face(vec![1.0, 0.0, 0.0], 0.1)]);
        let (mut engine, recorder, clock) = engine(settings(), script);

        assert_eq!(engine.recognize(), Verdict::Failed);
        assert!(!recorder.statuses().contains(&Success));
        // 51 consecutive rejections at 100 ms per frame.
        assert!(clock.now() >= Duration::from_millis(5000));
    }

    #[test]
    fn liveness_can_be_disabled() {
        let script = looping(vec![ScriptedFrame::face(vec![1.0, 0.0, 0.0], 0.1)]);
        let settings = EngineSettings {
            liveness_enabled: false,
            ..settings()
        };
        let (mut engine, _, _) = engine(settings, script);
        assert_eq!(engine.recognize(), Verdict::Success("alice".into()));
    }

    #[test]
    fn exhausted_source_is_an_error_with_heartbeats() {
        let script = ReplayScript {
            repeat: false,
            frames: vec![ScriptedFrame::empty(); 25],
        };
        let settings = EngineSettings {
            linger: Duration::ZERO,
            ..settings()
        };
        let (mut engine, recorder, _) = engine(settings, script);

        assert_eq!(engine.recognize(), Verdict::Error);
        // One on entry plus heartbeats at frames 10 and 20.
        assert_eq!(recorder.statuses(), vec![Recognizing, Recognizing, Recognizing, Error]);
    }

    #[test]
    fn stop_request_ends_without_verdict() {
        let script = looping(vec![ScriptedFrame::empty()]);
        let (mut engine, recorder, _) = engine(settings(), script);
        engine.stop.cancel();

        assert_eq!(engine.recognize(), Verdict::Stopped);
        assert_eq!(recorder.statuses(), vec![Recognizing]);

        engine.finish();
        assert_eq!(recorder.statuses(), vec![Recognizing, ProcessEnded]);
    }

    #[test]
    fn warmup_announces_detected_face() {
        let script = ReplayScript {
            repeat: false,
            frames: vec![
                ScriptedFrame::empty(),
                ScriptedFrame::empty(),
                ScriptedFrame::face(vec![0.0, 1.0, 0.0], 0.2),
            ],
        };
        let settings = EngineSettings {
            warmup_hold: Duration::from_millis(300),
            ..settings()
        };
        let (mut engine, recorder, _) = engine(settings, script);

        assert_eq!(engine.warmup(), Verdict::FaceDetected);
        engine.finish();

        let statuses = recorder.statuses();
        assert_eq!(statuses[0], Recognizing);
        assert_eq!(statuses[1], FaceDetected);
        assert_eq!(statuses.last(), Some(&ProcessEnded));
        assert!(!statuses.contains(&Success));
    }

    #[test]
    fn early_fault_reports_error_then_exit() {
        let mut recorder = Recorder::default();
        publish_fault(&mut recorder);
        assert_eq!(recorder.statuses(), vec![Error, ProcessEnded]);
    }
}
