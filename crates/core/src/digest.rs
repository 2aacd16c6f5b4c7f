//! Content digests over file prefixes
//!
//! Log files grow by appending, so a file that was synchronized once can be
//! recognized later by hashing only the prefix we already hold: if the first
//! `length` bytes still hash the same, everything after them is new. The
//! digest is the unit of comparison the synchronizer ships across the remote
//! boundary.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// MD5 of the empty input; used instead of hashing a zero-length stream.
pub const EMPTY_PREFIX_HASH: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Read buffer cap for digest computation. Purely a tuning knob.
const MAX_DIGEST_BUFFER: u64 = 65_536;
const MIN_DIGEST_BUFFER: u64 = 8_192;

/// Checksum of the head section of a file: the MD5 of exactly the first
/// `length` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    /// Number of bytes covered by the hash.
    pub length: u64,
    /// Lowercase hex MD5 of those bytes.
    pub prefix_hash: String,
}

impl FileDigest {
    /// Digest a file's full current contents.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let length = std::fs::metadata(path)?.len();
        Self::of_reader(File::open(path)?, length)
    }

    /// Digest the first `length` bytes of a reader.
    pub fn of_reader<R: Read>(reader: R, length: u64) -> std::io::Result<Self> {
        Ok(Self {
            length,
            prefix_hash: digest_prefix(reader, length)?,
        })
    }

    /// Does `file` carry the same head section this digest was taken from?
    ///
    /// True iff the file is at least `length` bytes long and its first
    /// `length` bytes hash to `prefix_hash`. Both conditions are required;
    /// length alone proves nothing.
    pub fn is_partial_match(&self, file: &Path) -> std::io::Result<bool> {
        if std::fs::metadata(file)?.len() < self.length {
            return Ok(false);
        }
        Ok(digest_prefix(File::open(file)?, self.length)? == self.prefix_hash)
    }
}

/// Hex MD5 of the first `length` bytes of `reader`.
///
/// The buffer adapts to the requested length and is capped; this only
/// affects throughput, never the result.
pub fn digest_prefix<R: Read>(mut reader: R, length: u64) -> std::io::Result<String> {
    if length == 0 {
        return Ok(EMPTY_PREFIX_HASH.to_string());
    }
    let buffer_size = if length < MIN_DIGEST_BUFFER {
        length
    } else if length > MAX_DIGEST_BUFFER {
        MAX_DIGEST_BUFFER
    } else {
        MIN_DIGEST_BUFFER
    };
    #[allow(clippy::cast_possible_truncation)]
    let mut buffer = vec![0u8; buffer_size as usize];

    let mut hasher = Md5::new();
    let mut remaining = length;
    while remaining > 0 {
        #[allow(clippy::cast_possible_truncation)]
        let want = remaining.min(buffer_size) as usize;
        let read = reader.read(&mut buffer[..want])?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        remaining -= read as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn zero_length_uses_the_fixed_constant() {
        let digest = FileDigest::of_reader(Cursor::new(Vec::new()), 0).unwrap();
        assert_eq!(digest.prefix_hash, EMPTY_PREFIX_HASH);
        assert_eq!(digest.length, 0);
    }

    #[test]
    fn known_md5_vectors() {
        let digest = FileDigest::of_reader(Cursor::new(b"hello world".to_vec()), 11).unwrap();
        assert_eq!(digest.prefix_hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        // Only the first five bytes are covered.
        let digest = FileDigest::of_reader(Cursor::new(b"hello world".to_vec()), 5).unwrap();
        assert_eq!(digest.prefix_hash, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn partial_match_accepts_appended_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        std::fs::write(&path, b"hello world").unwrap();
        let digest = FileDigest::of_file(&path).unwrap();

        std::fs::write(&path, b"hello world and more").unwrap();
        assert!(digest.is_partial_match(&path).unwrap());
    }

    #[test]
    fn partial_match_rejects_shorter_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        std::fs::write(&path, b"hello world").unwrap();
        let digest = FileDigest::of_file(&path).unwrap();

        std::fs::write(&path, b"hello").unwrap();
        assert!(!digest.is_partial_match(&path).unwrap());
    }

    #[test]
    fn partial_match_rejects_mutated_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        std::fs::write(&path, b"hello world").unwrap();
        let digest = FileDigest::of_file(&path).unwrap();

        std::fs::write(&path, b"hellX world, longer now").unwrap();
        assert!(!digest.is_partial_match(&path).unwrap());
    }

    #[test]
    fn digest_survives_serde_round_trip() {
        let digest = FileDigest {
            length: 42,
            prefix_hash: "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string(),
        };
        let json = serde_json::to_string(&digest).unwrap();
        let parsed: FileDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, digest);
    }

    #[test]
    fn short_read_stops_at_end_of_input() {
        // Asking for more bytes than the reader holds hashes what is there.
        let digest = FileDigest::of_reader(Cursor::new(b"hello".to_vec()), 100).unwrap();
        let full = FileDigest::of_reader(Cursor::new(b"hello".to_vec()), 5).unwrap();
        assert_eq!(digest.prefix_hash, full.prefix_hash);
    }
}
