//! Encryption stage: per-asset keys, streaming chunked AEAD, key wrapping.
//!
//! Every asset gets a fresh 256-bit key. File bytes, thumbnail and the
//! metadata blob are encrypted under that key; the key itself is then
//! wrapped under the destination collection's key. The plaintext per-asset
//! key never leaves this crate's call stack.

pub mod asset;
pub mod keys;
pub mod stream;

pub use asset::{encrypt_asset, PlainBody};
pub use keys::{generate_key, unwrap_key, wrap_key, AssetKey, KEY_LEN};
pub use stream::{StreamDecryptor, StreamEncryptor, HEADER_LEN, TAG_LEN};
