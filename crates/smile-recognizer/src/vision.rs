//! Seams to the face vision backend.
//!
//! Camera capture and the face models live outside this workspace. The
//! capture loop only sees these two traits; [`crate::replay`] implements
//! them from a script so the whole pipeline runs without a camera.

use smile_core::config::RecognitionConfig;
use tracing::info;

use crate::error::{RecognizerError, RecognizerResult};
use crate::replay::ReplayBackend;

/// One captured camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Packed BGR pixels; empty for scripted frames.
    pub pixels: Vec<u8>,
}

/// Bounding box of a detected face, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

pub trait FrameSource: Send {
    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> RecognizerResult<Option<Frame>>;
}

pub trait FaceAnalyzer: Send {
    /// The most prominent face in `frame`, if any.
    fn detect(&mut self, frame: &Frame) -> RecognizerResult<Option<FaceRegion>>;

    /// Probability in `[0, 1]` that the face is a live person.
    fn liveness(&mut self, frame: &Frame, face: &FaceRegion) -> RecognizerResult<f32>;

    /// Feature vector for matching against the gallery.
    fn extract(&mut self, frame: &Frame, face: &FaceRegion) -> RecognizerResult<Vec<f32>>;
}

pub type Backend = (Box<dyn FrameSource>, Box<dyn FaceAnalyzer>);

/// Open the vision backend selected by the recognition config.
pub fn open_backend(config: &RecognitionConfig) -> RecognizerResult<Backend> {
    match &config.replay_script {
        Some(path) => {
            info!(script = %path.display(), "using replay vision backend");
            let backend = ReplayBackend::load(path)?;
            let (source, analyzer) = backend.split();
            Ok((Box::new(source), Box::new(analyzer)))
        }
        None => Err(RecognizerError::NoBackend(config.camera)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_without_backend_is_an_error() {
        let config = RecognitionConfig {
            camera: 2,
            ..RecognitionConfig::default()
        };
        assert!(matches!(open_backend(&config), Err(RecognizerError::NoBackend(2))));
    }
}
