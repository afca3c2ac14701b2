use smile_core::store::{keys, ConfigStore};
use smile_crypto::{vault, SecretRecord};
use zeroize::Zeroizing;

use crate::error::{AuthError, AuthResult};

/// Encrypt `password` under fresh key material and persist it. This is the
/// only place the key and iv change.
pub fn store_password(store: &dyn ConfigStore, password: &str) -> AuthResult<()> {
    let record = vault::encrypt(password.as_bytes())?;
    let hex = record.to_hex();
    store.set(keys::PASSWORD, &hex.ciphertext)?;
    store.set(keys::KEY, &hex.key)?;
    store.set(keys::IV, &hex.iv)?;
    tracing::info!("logon password enrolled");
    Ok(())
}

pub fn has_password(store: &dyn ConfigStore) -> AuthResult<bool> {
    Ok(store.get(keys::PASSWORD)?.is_some()
        && store.get(keys::KEY)?.is_some()
        && store.get(keys::IV)?.is_some())
}

pub fn load_record(store: &dyn ConfigStore) -> AuthResult<SecretRecord> {
    let ciphertext = store.get(keys::PASSWORD)?;
    let key = store.get(keys::KEY)?.map(Zeroizing::new);
    let iv = store.get(keys::IV)?;
    match (ciphertext, key, iv) {
        (Some(ct), Some(key), Some(iv)) => Ok(SecretRecord::from_hex(&ct, &key, &iv)?),
        _ => Err(AuthError::CredentialMissing),
    }
}

/// Decrypt the stored password.
pub fn recover_password(store: &dyn ConfigStore) -> AuthResult<Zeroizing<String>> {
    let record = load_record(store)?;
    Ok(vault::decrypt_to_string(&record)?)
}
