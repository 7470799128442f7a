//! Content digests computed while blobs are streamed into staging.
//!
//! The digest only has to detect likely duplicates, so the default is MD5:
//! fast, and it keeps ids and shard depth short (32 hex chars, 8 levels).

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::BlobError;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Blake3 => "BLAKE3",
        }
    }

    /// Length of the hex digest in characters.
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha256 | DigestAlgorithm::Blake3 => 64,
        }
    }

    pub fn hasher(self) -> ContentHasher {
        match self {
            DigestAlgorithm::Md5 => ContentHasher::Md5(md5::Context::new()),
            DigestAlgorithm::Sha256 => ContentHasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// Hex digest of a complete buffer.
    pub fn hex_digest(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" | "sha2" => Ok(DigestAlgorithm::Sha256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            _ => Err(BlobError::UnknownDigest(s.to_string())),
        }
    }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = BlobError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DigestAlgorithm> for String {
    fn from(algorithm: DigestAlgorithm) -> Self {
        algorithm.name().to_string()
    }
}

/// Incremental hasher for one of the supported algorithms.
pub enum ContentHasher {
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Md5(ctx) => ctx.consume(data),
            ContentHasher::Sha256(hasher) => hasher.update(data),
            ContentHasher::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            ContentHasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            ContentHasher::Sha256(hasher) => hex::encode(hasher.finalize()),
            ContentHasher::Blake3(hasher) => hex::encode(hasher.finalize().as_bytes()),
        }
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentHasher::Md5(_) => "Md5",
            ContentHasher::Sha256(_) => "Sha256",
            ContentHasher::Blake3(_) => "Blake3",
        };
        f.debug_tuple("ContentHasher").field(&name).finish()
    }
}

/// Reader adapter feeding every byte it yields into a [`ContentHasher`].
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
        }
    }

    /// Hex digest of everything read so far.
    pub fn finalize_hex(self) -> String {
        self.hasher.finalize_hex()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
