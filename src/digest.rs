//! Content digests: the exact-duplicate key for stored originals.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const CHUNK_SIZE: usize = 64 * 1024;

/// Incremental SHA-256 over a byte stream, tracking the total length.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self { Self::default() }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Lowercase hex digest and number of bytes hashed.
    pub fn finish(self) -> (String, u64) {
        (format!("{:x}", self.inner.finalize()), self.len)
    }
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut h = ContentHasher::new();
    h.update(bytes);
    h.finish().0
}

/// Hash a reader in fixed-size chunks without buffering it whole.
pub async fn digest_reader<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<(String, u64)> {
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 { break; }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

pub async fn digest_file(path: &Path) -> std::io::Result<(String, u64)> {
    let file = tokio::fs::File::open(path).await?;
    digest_reader(file).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn streamed_digest_matches_one_shot() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let (hex, len) = digest_reader(std::io::Cursor::new(data.clone())).await.unwrap();
        assert_eq!(hex, digest_bytes(&data));
        assert_eq!(len, data.len() as u64);
    }

    #[tokio::test]
    async fn file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();
        let (hex, len) = digest_file(&path).await.unwrap();
        assert_eq!(hex, digest_bytes(b"abc"));
        assert_eq!(len, 3);
    }
}
