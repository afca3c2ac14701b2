use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,

    /// Malformed hex, wrong key/iv length, truncated ciphertext, bad padding
    /// or non-UTF-8 plaintext. Deliberately indistinguishable to callers.
    #[error("decryption failed: stored secret is corrupt or was encrypted with another key")]
    DecryptFailed,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
