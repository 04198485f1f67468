//! Chunked AEAD over a per-asset key.
//!
//! Each chunk is sealed independently so the transport can upload parts as
//! they are produced. The random header doubles as the base nonce; chunk
//! `i` is sealed under `header XOR i` (little-endian counter in the last
//! eight bytes), so chunks cannot be reordered or replayed without the
//! authentication check failing. The final chunk is bound with a distinct
//! associated-data byte, which makes truncation detectable.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use bytes::Bytes;

use pixlock_core::{UploadError, UploadResult};

use crate::keys::AssetKey;

/// Length of the stream header (also the AES-GCM nonce length).
pub const HEADER_LEN: usize = 12;

/// Authentication tag appended to every chunk's ciphertext.
pub const TAG_LEN: usize = 16;

const AAD_MIDDLE: &[u8] = &[0u8];
const AAD_FINAL: &[u8] = &[1u8];

fn chunk_nonce(header: &[u8; HEADER_LEN], counter: u64) -> [u8; HEADER_LEN] {
    let mut nonce = *header;
    for (byte, ctr) in nonce[HEADER_LEN - 8..].iter_mut().zip(counter.to_le_bytes()) {
        *byte ^= ctr;
    }
    nonce
}

/// Seals a sequence of chunks under one asset key. Exactly one chunk must
/// be pushed with `is_last = true`, after which the encryptor is spent.
pub struct StreamEncryptor {
    cipher: Aes256Gcm,
    header: [u8; HEADER_LEN],
    counter: u64,
    finished: bool,
}

impl StreamEncryptor {
    /// Create an encryptor with a fresh random header. The header is not
    /// secret; the decryptor needs it verbatim.
    pub fn new(key: &AssetKey) -> (Self, Vec<u8>) {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&nonce);
        (
            Self {
                cipher,
                header,
                counter: 0,
                finished: false,
            },
            header.to_vec(),
        )
    }

    /// Seal the next chunk. The ciphertext is `plaintext length + TAG_LEN`
    /// bytes.
    pub fn push(&mut self, plaintext: &[u8], is_last: bool) -> UploadResult<Bytes> {
        if self.finished {
            return Err(UploadError::Crypto(
                "chunk pushed after the final chunk".to_string(),
            ));
        }
        let nonce = chunk_nonce(&self.header, self.counter);
        let aad = if is_last { AAD_FINAL } else { AAD_MIDDLE };
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| UploadError::Crypto(format!("chunk encryption failed: {e}")))?;
        self.counter += 1;
        self.finished = is_last;
        Ok(Bytes::from(ciphertext))
    }
}

/// Opens a sequence of chunks sealed by [`StreamEncryptor`]. Chunks must be
/// pulled in encryption order with matching `is_last` flags.
pub struct StreamDecryptor {
    cipher: Aes256Gcm,
    header: [u8; HEADER_LEN],
    counter: u64,
    finished: bool,
}

impl StreamDecryptor {
    pub fn new(key: &AssetKey, header: &[u8]) -> UploadResult<Self> {
        let header: [u8; HEADER_LEN] = header
            .try_into()
            .map_err(|_| UploadError::Decrypt("stream header has wrong length".to_string()))?;
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            header,
            counter: 0,
            finished: false,
        })
    }

    pub fn pull(&mut self, ciphertext: &[u8], is_last: bool) -> UploadResult<Bytes> {
        if self.finished {
            return Err(UploadError::Decrypt(
                "chunk pulled after the final chunk".to_string(),
            ));
        }
        let nonce = chunk_nonce(&self.header, self.counter);
        let aad = if is_last { AAD_FINAL } else { AAD_MIDDLE };
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| {
                UploadError::Decrypt(format!(
                    "chunk {} failed authentication",
                    self.counter
                ))
            })?;
        self.counter += 1;
        self.finished = is_last;
        Ok(Bytes::from(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    fn seal(chunks: &[&[u8]]) -> (AssetKey, Vec<u8>, Vec<Bytes>) {
        let key = generate_key();
        let (mut enc, header) = StreamEncryptor::new(&key);
        let last = chunks.len() - 1;
        let sealed = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| enc.push(c, i == last).unwrap())
            .collect();
        (key, header, sealed)
    }

    #[test]
    fn multi_chunk_roundtrip() {
        let chunks: [&[u8]; 3] = [b"first chunk", b"second chunk", b"tail"];
        let (key, header, sealed) = seal(&chunks);

        for (plain, cipher) in chunks.iter().zip(&sealed) {
            assert_eq!(cipher.len(), plain.len() + TAG_LEN);
        }

        let mut dec = StreamDecryptor::new(&key, &header).unwrap();
        for (i, cipher) in sealed.iter().enumerate() {
            let plain = dec.pull(cipher, i == sealed.len() - 1).unwrap();
            assert_eq!(&plain[..], chunks[i]);
        }
    }

    #[test]
    fn empty_payload_roundtrips_as_one_chunk() {
        let (key, header, sealed) = seal(&[b""]);
        assert_eq!(sealed[0].len(), TAG_LEN);
        let mut dec = StreamDecryptor::new(&key, &header).unwrap();
        assert_eq!(dec.pull(&sealed[0], true).unwrap().len(), 0);
    }

    #[test]
    fn reordered_chunks_fail_authentication() {
        let (key, header, sealed) = seal(&[b"aaaa", b"bbbb", b"cccc"]);
        let mut dec = StreamDecryptor::new(&key, &header).unwrap();
        // Swap the first two chunks.
        assert!(matches!(
            dec.pull(&sealed[1], false),
            Err(UploadError::Decrypt(_))
        ));
    }

    #[test]
    fn truncated_stream_fails_authentication() {
        let (key, header, sealed) = seal(&[b"aaaa", b"bbbb", b"cccc"]);
        let mut dec = StreamDecryptor::new(&key, &header).unwrap();
        dec.pull(&sealed[0], false).unwrap();
        // Pretending the second chunk is the last one must fail: its AAD
        // says it is a middle chunk.
        assert!(dec.pull(&sealed[1], true).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let (key, header, sealed) = seal(&[b"payload"]);
        let mut corrupted = sealed[0].to_vec();
        corrupted[0] ^= 1;
        let mut dec = StreamDecryptor::new(&key, &header).unwrap();
        assert!(dec.pull(&corrupted, true).is_err());
    }

    #[test]
    fn push_after_final_is_rejected() {
        let key = generate_key();
        let (mut enc, _) = StreamEncryptor::new(&key);
        enc.push(b"only", true).unwrap();
        assert!(matches!(
            enc.push(b"more", true),
            Err(UploadError::Crypto(_))
        ));
    }

    #[test]
    fn headers_are_unique_per_stream() {
        let key = generate_key();
        let (_, h1) = StreamEncryptor::new(&key);
        let (_, h2) = StreamEncryptor::new(&key);
        assert_ne!(h1, h2);
    }
}
