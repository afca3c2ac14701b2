//! AES-256-CBC vault for the stored logon password.
//!
//! A [`SecretRecord`] is generated once when the password is set and persisted
//! as three hex entries. Decryption reuses the stored key and iv.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::Rng;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Ciphertext plus the key material needed to open it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretRecord {
    ciphertext: Vec<u8>,
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

/// Hex text form of a [`SecretRecord`], as kept in the configuration store.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct HexRecord {
    pub ciphertext: String,
    pub key: String,
    pub iv: String,
}

impl std::fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRecord")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Debug for HexRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HexRecord")
            .field("ciphertext", &self.ciphertext)
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

impl SecretRecord {
    pub fn from_parts(ciphertext: Vec<u8>, key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self { ciphertext, key, iv }
    }

    /// Parse the three stored hex entries. Case-insensitive.
    pub fn from_hex(ciphertext_hex: &str, key_hex: &str, iv_hex: &str) -> CryptoResult<Self> {
        let ciphertext = hex::decode(ciphertext_hex.trim()).map_err(|_| CryptoError::DecryptFailed)?;
        let key_bytes =
            Zeroizing::new(hex::decode(key_hex.trim()).map_err(|_| CryptoError::DecryptFailed)?);
        let iv_bytes = hex::decode(iv_hex.trim()).map_err(|_| CryptoError::DecryptFailed)?;

        let key: [u8; KEY_SIZE] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecryptFailed)?;
        let iv: [u8; IV_SIZE] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecryptFailed)?;
        Ok(Self { ciphertext, key, iv })
    }

    /// Uppercase hex, one string per stored entry.
    pub fn to_hex(&self) -> HexRecord {
        HexRecord {
            ciphertext: hex::encode_upper(&self.ciphertext),
            key: hex::encode_upper(self.key),
            iv: hex::encode_upper(self.iv),
        }
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

/// Encrypt under a fresh random key and iv from the system CSPRNG.
pub fn encrypt(plaintext: &[u8]) -> CryptoResult<SecretRecord> {
    let mut key = [0u8; KEY_SIZE];
    let mut iv = [0u8; IV_SIZE];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut key);
    rng.fill_bytes(&mut iv);

    let record = encrypt_with(plaintext, &key, &iv);
    key.zeroize();
    record
}

/// Encrypt under caller-supplied key material.
pub fn encrypt_with(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_SIZE],
) -> CryptoResult<SecretRecord> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| CryptoError::EncryptionFailed)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    Ok(SecretRecord {
        ciphertext,
        key: *key,
        iv: *iv,
    })
}

/// Decrypt a record. The returned buffer is wiped when dropped.
pub fn decrypt(record: &SecretRecord) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let ct = &record.ciphertext;
    if ct.is_empty() || ct.len() % BLOCK_SIZE != 0 {
        tracing::debug!(len = ct.len(), "ciphertext is not a whole number of blocks");
        return Err(CryptoError::DecryptFailed);
    }
    let cipher = Aes256CbcDec::new_from_slices(&record.key, &record.iv)
        .map_err(|_| CryptoError::DecryptFailed)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ct)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Decrypt and require the plaintext to be UTF-8.
pub fn decrypt_to_string(record: &SecretRecord) -> CryptoResult<Zeroizing<String>> {
    let bytes = decrypt(record)?;
    std::str::from_utf8(&bytes)
        .map(|s| Zeroizing::new(s.to_owned()))
        .map_err(|_| CryptoError::DecryptFailed)
}
