pub mod error;
pub mod vault;

pub use error::{CryptoError, CryptoResult};
pub use vault::{decrypt, decrypt_to_string, encrypt, encrypt_with, HexRecord, SecretRecord, IV_SIZE, KEY_SIZE};
