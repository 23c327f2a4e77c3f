//! Content fingerprinting.
//!
//! Fingerprints are lowercase hex SHA-256 digests. Input is consumed in
//! fixed 1 MiB chunks so arbitrarily large uploads never need to be
//! resident in memory.

use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Read size used for every streaming hash pass.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Length of a hex-encoded SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 64;

/// A validated content fingerprint (64 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parses a hex digest, normalizing to lowercase.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == FINGERPRINT_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental hasher that also counts the bytes it has seen.
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Consumes the hasher, returning the fingerprint and total byte count.
    pub fn finalize(self) -> (Fingerprint, u64) {
        (Fingerprint(hex::encode(self.hasher.finalize())), self.bytes)
    }
}

/// Fingerprints everything readable from `reader`.
pub fn fingerprint_reader<R: Read>(reader: &mut R) -> io::Result<(Fingerprint, u64)> {
    copy_and_fingerprint(reader, &mut io::sink())
}

/// Copies `reader` into `writer` while fingerprinting it, in one pass.
pub fn copy_and_fingerprint<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> io::Result<(Fingerprint, u64)> {
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
        writer.write_all(&buffer[..read])?;
    }

    writer.flush()?;
    Ok(hasher.finalize())
}

/// Fingerprints an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize().0
}
