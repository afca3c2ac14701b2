use std::time::Duration;

use smile_core::store::StoreError;
use smile_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to launch recognizer: {0}")]
    LaunchFailed(String),

    #[error("status channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("face not recognized")]
    RecognitionFailed,

    #[error("recognition timed out after {}ms", .0.as_millis())]
    RecognitionTimedOut(Duration),

    #[error("stored password could not be decrypted: {0}")]
    DecryptFailed(#[from] CryptoError),

    #[error("no password has been enrolled")]
    CredentialMissing,

    #[error("authentication cancelled")]
    Cancelled,

    #[error("configuration store error: {0}")]
    Store(#[from] StoreError),
}

pub type AuthResult<T> = Result<T, AuthError>;
