use std::path::{Path, PathBuf};

use smile_core::store::{keys, ConfigStore};
use smile_core::wait::{BoundedWait, CancelToken, Clock, WaitOutcome};
use tracing::{debug, info, warn};

use crate::engine::EngineSettings;
use crate::error::{RecognizerError, RecognizerResult};
use crate::gallery;
use crate::vision::Backend;

/// Samples captured per enrollment.
pub const SAMPLES_PER_USER: usize = 5;

/// Capture up to [`SAMPLES_PER_USER`] live face samples for `username` and
/// write them to `gallery_dir`. Stops early when the source runs dry or
/// when stopped; fails only if nothing was captured.
pub fn enroll(
    username: &str,
    gallery_dir: &Path,
    backend: Backend,
    settings: &EngineSettings,
    clock: &dyn Clock,
    stop: &CancelToken,
) -> RecognizerResult<Vec<PathBuf>> {
    gallery::validate_username(username)?;
    let (mut source, mut analyzer) = backend;
    let mut written = Vec::with_capacity(SAMPLES_PER_USER);

    info!(%username, dir = %gallery_dir.display(), "enrollment started");
    let outcome = BoundedWait::new(clock, settings.frame_interval)
        .cancel_on(stop)
        .run(|_| -> RecognizerResult<Option<()>> {
            let Some(frame) = source.next_frame()? else {
                return Ok(Some(()));
            };
            let Some(face) = analyzer.detect(&frame)? else {
                return Ok(None);
            };
            if settings.liveness_enabled {
                let score = analyzer.liveness(&frame, &face)?;
                if score < settings.liveness_threshold {
                    debug!(score, "sample rejected by liveness");
                    return Ok(None);
                }
            }
            let features = analyzer.extract(&frame, &face)?;
            let path = gallery::write_sample(gallery_dir, username, written.len(), &features)?;
            info!(file = %path.display(), "sample {} of {SAMPLES_PER_USER} captured", written.len() + 1);
            written.push(path);
            Ok((written.len() >= SAMPLES_PER_USER).then_some(()))
        })?;

    if matches!(outcome, WaitOutcome::Cancelled) {
        info!(captured = written.len(), "enrollment stopped");
    }
    if written.is_empty() {
        return Err(RecognizerError::NoSamples);
    }
    if written.len() < SAMPLES_PER_USER {
        warn!(captured = written.len(), "enrollment finished with fewer samples than requested");
    }
    Ok(written)
}

/// Record `dir` as the install directory so the logon side can find the
/// recognizer.
pub fn register_install_dir(store: &dyn ConfigStore, dir: &Path) -> RecognizerResult<()> {
    store.set(keys::PATH, &dir.to_string_lossy())?;
    info!(dir = %dir.display(), "install directory registered");
    Ok(())
}
