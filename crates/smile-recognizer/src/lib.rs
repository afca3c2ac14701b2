pub mod engine;
pub mod enroll;
pub mod error;
pub mod gallery;
pub mod replay;
pub mod shutdown;
pub mod vision;

pub use engine::{EngineSettings, RecognitionEngine, Verdict};
pub use error::{RecognizerError, RecognizerResult};
pub use gallery::Gallery;
pub use vision::{FaceAnalyzer, FaceRegion, Frame, FrameSource};
