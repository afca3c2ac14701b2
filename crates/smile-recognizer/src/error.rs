use std::path::PathBuf;

use smile_core::session::InvalidTransition;
use smile_core::store::StoreError;
use smile_ipc::IpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("no vision backend for camera {0}; set recognition.replay_script")]
    NoBackend(u32),

    #[error("replay script {}: {message}", path.display())]
    Script { path: PathBuf, message: String },

    #[error("gallery I/O error at {}: {source}", path.display())]
    Gallery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid username {0:?}")]
    InvalidUsername(String),

    #[error("no usable face samples were captured")]
    NoSamples,

    #[error("vision backend fault: {0}")]
    Vision(String),

    #[error("status channel error: {0}")]
    Ipc(#[from] IpcError),

    #[error("configuration store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] InvalidTransition),
}

pub type RecognizerResult<T> = Result<T, RecognizerError>;
