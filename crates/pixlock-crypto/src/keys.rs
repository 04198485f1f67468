//! Per-asset key generation and wrapping under collection keys.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;

use pixlock_core::{UploadError, UploadResult};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// A per-asset symmetric key. Kept as a plain array; callers must not
/// serialize it — only the wrapped form crosses the process boundary.
pub type AssetKey = [u8; KEY_LEN];

/// Generate a fresh per-asset key from the OS RNG.
pub fn generate_key() -> AssetKey {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt (`wrap`) an asset key under the collection key. The returned
/// bytes are `nonce || ciphertext`.
pub fn wrap_key(asset_key: &AssetKey, collection_key: &AssetKey) -> UploadResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(collection_key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, asset_key.as_slice())
        .map_err(|e| UploadError::Crypto(format!("key wrap failed: {e}")))?;

    let mut wrapped = nonce.to_vec();
    wrapped.extend_from_slice(&ciphertext);
    Ok(wrapped)
}

/// Recover an asset key from its wrapped form.
pub fn unwrap_key(wrapped: &[u8], collection_key: &AssetKey) -> UploadResult<AssetKey> {
    if wrapped.len() < NONCE_LEN {
        return Err(UploadError::Decrypt("wrapped key too short".to_string()));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(collection_key));
    let nonce = Nonce::from_slice(&wrapped[..NONCE_LEN]);
    let plaintext = cipher
        .decrypt(nonce, &wrapped[NONCE_LEN..])
        .map_err(|e| UploadError::Decrypt(format!("key unwrap failed: {e}")))?;

    plaintext
        .try_into()
        .map_err(|_| UploadError::Decrypt("unwrapped key has wrong length".to_string()))
}
