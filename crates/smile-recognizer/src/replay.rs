//! Scripted vision backend.
//!
//! A script is a JSON document listing what the "camera" sees frame by
//! frame:
//!
//! ```json
//! { "repeat": true,
//!   "frames": [ { "face": null },
//!               { "face": { "features": [0.1, 0.9, 0.2], "liveness": 0.97 } } ] }
//! ```
//!
//! With `repeat` the frames cycle forever; otherwise the source is exhausted
//! after the last one.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RecognizerError, RecognizerResult};
use crate::vision::{FaceAnalyzer, FaceRegion, Frame, FrameSource};

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub repeat: bool,
    pub frames: Vec<ScriptedFrame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFrame {
    #[serde(default)]
    pub face: Option<ScriptedFace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFace {
    pub features: Vec<f32>,
    #[serde(default = "default_liveness")]
    pub liveness: f32,
}

fn default_liveness() -> f32 {
    1.0
}

impl ScriptedFrame {
    pub fn empty() -> Self {
        Self { face: None }
    }

    pub fn face(features: Vec<f32>, liveness: f32) -> Self {
        Self {
            face: Some(ScriptedFace { features, liveness }),
        }
    }
}

impl ReplayScript {
    fn slot(&self, sequence: u64) -> Option<&ScriptedFrame> {
        let len = self.frames.len() as u64;
        if len == 0 {
            return None;
        }
        let index = if self.repeat { sequence % len } else { sequence };
        self.frames.get(index as usize)
    }
}

/// A script ready to be split into its source and analyzer halves.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    script: Arc<ReplayScript>,
}

impl ReplayBackend {
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script: Arc::new(script),
        }
    }

    pub fn load(path: &Path) -> RecognizerResult<Self> {
        let script_error = |message: String| RecognizerError::Script {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| script_error(e.to_string()))?;
        let script: ReplayScript = serde_json::from_str(&text).map_err(|e| script_error(e.to_string()))?;
        if script.frames.is_empty() {
            return Err(script_error("script has no frames".into()));
        }
        Ok(Self::new(script))
    }

    pub fn split(self) -> (ReplaySource, ReplayAnalyzer) {
        (
            ReplaySource {
                script: Arc::clone(&self.script),
                next: 0,
            },
            ReplayAnalyzer { script: self.script },
        )
    }
}

pub struct ReplaySource {
    script: Arc<ReplayScript>,
    next: u64,
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> RecognizerResult<Option<Frame>> {
        if self.script.slot(self.next).is_none() {
            return Ok(None);
        }
        let frame = Frame {
            sequence: self.next,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            pixels: Vec::new(),
        };
        self.next += 1;
        Ok(Some(frame))
    }
}

pub struct ReplayAnalyzer {
    script: Arc<ReplayScript>,
}

impl ReplayAnalyzer {
    fn scripted_face(&self, frame: &Frame) -> RecognizerResult<Option<&ScriptedFace>> {
        let slot = self.script.slot(frame.sequence).ok_or_else(|| {
            RecognizerError::Vision(format!("frame {} is not part of the script", frame.sequence))
        })?;
        Ok(slot.face.as_ref())
    }

    fn require_face(&self, frame: &Frame) -> RecognizerResult<&ScriptedFace> {
        self.scripted_face(frame)?
            .ok_or_else(|| RecognizerError::Vision(format!("no face in frame {}", frame.sequence)))
    }
}

impl FaceAnalyzer for ReplayAnalyzer {
    fn detect(&mut self, frame: &Frame) -> RecognizerResult<Option<FaceRegion>> {
        Ok(self.scripted_face(frame)?.map(|_| FaceRegion {
            x: frame.width / 4,
            y: frame.height / 4,
            width: frame.width / 2,
            height: frame.height / 2,
            confidence: 0.99,
        }))
    }

    fn liveness(&mut self, frame: &Frame, _face: &FaceRegion) -> RecognizerResult<f32> {
        Ok(self.require_face(frame)?.liveness)
    }

    fn extract(&mut self, frame: &Frame, _face: &FaceRegion) -> RecognizerResult<Vec<f32>> {
        Ok(self.require_face(frame)?.features.clone())
    }
}
