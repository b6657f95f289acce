//! Content digests for duplicate detection.
//!
//! Files are streamed through BLAKE3 in fixed-size chunks, so memory use does not
//! grow with file size.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Size of each read while hashing.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Failure to read a file for hashing (locked, permission denied, vanished).
#[derive(Debug, Error)]
#[error("Failed to hash {}: {source}", path.display())]
pub struct HashError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// A 256-bit BLAKE3 digest of a file's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, as stored in the history file.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = blake3::HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s).map(|hash| Self(*hash.as_bytes()))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = blake3::HexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Computes the content digest of the file at `path`.
///
/// # Errors
///
/// Returns [`HashError`] if the file cannot be opened or read.
///
/// # Examples
///
/// ```no_run
/// use smartsort::hasher::digest;
/// use std::path::Path;
///
/// let hash = digest(Path::new("/path/to/file.bin")).unwrap();
/// println!("{}", hash);
/// ```
pub fn digest(path: &Path) -> Result<ContentHash, HashError> {
    let wrap = |source| HashError {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(wrap)?;
    digest_reader(BufReader::with_capacity(CHUNK_SIZE, file)).map_err(wrap)
}

/// Hashes everything `reader` yields, one chunk at a time.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(ContentHash(*hasher.finalize().as_bytes()))
}
