//! Incremental content hashing over fixed-size chunks.

use sha2::{Digest, Sha256};

use pixlock_core::{UploadError, UploadResult};

/// Streams every chunk of an asset through SHA-256 and verifies that the
/// number of chunks observed matches what the source size predicted. A
/// mismatch means the source was truncated or over-read mid-run and is a
/// hard failure, never a silent short hash.
pub struct ChunkHasher {
    inner: Sha256,
    expected_chunks: u64,
    observed_chunks: u64,
}

impl ChunkHasher {
    pub fn new(expected_chunks: u64) -> Self {
        Self {
            inner: Sha256::new(),
            expected_chunks,
            observed_chunks: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.observed_chunks += 1;
    }

    /// Hex digest, or `ChunkCountMismatch` when the stream did not deliver
    /// exactly the predicted chunk count.
    pub fn finalize(self) -> UploadResult<String> {
        if self.observed_chunks != self.expected_chunks {
            return Err(UploadError::ChunkCountMismatch {
                expected: self.expected_chunks,
                observed: self.observed_chunks,
            });
        }
        Ok(hex::encode(self.inner.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixlock_core::{expected_chunk_count, CHUNK_SIZE};

    #[test]
    fn hashes_match_one_shot_digest() {
        let data = vec![3u8; CHUNK_SIZE + 100];
        let mut hasher = ChunkHasher::new(expected_chunk_count(data.len() as u64));
        hasher.update(&data[..CHUNK_SIZE]);
        hasher.update(&data[CHUNK_SIZE..]);
        let streamed = hasher.finalize().unwrap();

        let direct = hex::encode(Sha256::digest(&data));
        assert_eq!(streamed, direct);
    }

    #[test]
    fn missing_chunk_is_a_hard_failure() {
        let mut hasher = ChunkHasher::new(3);
        hasher.update(b"one");
        hasher.update(b"two");
        assert!(matches!(
            hasher.finalize(),
            Err(UploadError::ChunkCountMismatch {
                expected: 3,
                observed: 2
            })
        ));
    }

    #[test]
    fn extra_chunk_is_a_hard_failure() {
        let mut hasher = ChunkHasher::new(1);
        hasher.update(b"one");
        hasher.update(b"two");
        assert!(hasher.finalize().is_err());
    }
}
