//! Content digests used as cache keys throughout the build.
//!
//! Every cache decision in the generator reduces to "is this digest equal to
//! the one recorded last time?". Digests are never ordered or compared in any
//! other way, so the only requirements are a fixed length and collision
//! resistance. SHA-256 provides both.
//!
//! Digests are **content-based** rather than mtime-based so they survive
//! `git checkout` and fresh clones, which reset modification times.
//!
//! # Accumulating
//!
//! Composite keys are built with [`Hasher`], which accepts repeated appends
//! before [`Hasher::finalize`]. Variable-length text is appended with
//! [`Hasher::field`], which terminates each field with a NUL byte so that
//! `("ab", "c")` and `("a", "bc")` never collide.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use walkdir::WalkDir;

/// Length of a digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// A fixed-length content digest. Displays and serializes as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid digest: expected {} hex characters", DIGEST_LEN * 2)]
pub struct ParseDigestError;

impl FromStr for Digest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ParseDigestError)?;
        let bytes: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| ParseDigestError)?;
        Ok(Digest(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental digest accumulator.
#[derive(Clone, Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.inner.update(bytes.as_ref());
        self
    }

    /// Append a NUL-terminated text field.
    pub fn field(&mut self, text: &str) -> &mut Self {
        self.inner.update(text.as_bytes());
        self.inner.update(b"\0");
        self
    }

    /// Append another digest.
    pub fn digest(&mut self, digest: &Digest) -> &mut Self {
        self.inner.update(digest.as_bytes());
        self
    }

    pub fn finalize(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}

/// Digest of a byte slice.
pub fn digest_bytes(bytes: impl AsRef<[u8]>) -> Digest {
    Digest(Sha256::digest(bytes.as_ref()).into())
}

/// Digest of a file's contents. Fails with `NotFound` if the file is missing.
pub fn digest_file(path: &Path) -> io::Result<Digest> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(Digest(hasher.finalize().into()))
}

/// Digest of a directory tree: every file's relative path and content digest,
/// visited in sorted order so the result is independent of readdir order.
pub fn digest_dir(dir: &Path) -> io::Result<Digest> {
    let mut hasher = Hasher::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        hasher.field(&rel);
        hasher.digest(&digest_file(entry.path())?);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn digest_bytes_deterministic() {
        assert_eq!(digest_bytes("hello"), digest_bytes("hello"));
        assert_ne!(digest_bytes("hello"), digest_bytes("hello!"));
    }

    #[test]
    fn display_is_64_hex_chars() {
        let d = digest_bytes("x");
        let s = d.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn display_matches_sha256_test_vector() {
        assert_eq!(
            digest_bytes("abc").to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn parse_accepts_uppercase_hex() {
        let d = digest_bytes("case");
        assert_eq!(d.to_string().to_uppercase().parse::<Digest>().unwrap(), d);
    }

    #[test]
    fn parse_display_roundtrip() {
        let d = digest_bytes("roundtrip");
        assert_eq!(d.to_string().parse::<Digest>().unwrap(), d);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!("abc".parse::<Digest>(), Err(ParseDigestError));
        assert_eq!("zz".repeat(32).parse::<Digest>(), Err(ParseDigestError));
        // Valid hex, wrong length.
        assert_eq!("ab".repeat(31).parse::<Digest>(), Err(ParseDigestError));
        assert_eq!("ab".repeat(33).parse::<Digest>(), Err(ParseDigestError));
    }

    #[test]
    fn serde_as_hex_string() {
        let d = digest_bytes("serde");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn hasher_matches_one_shot_for_raw_bytes() {
        let mut h = Hasher::new();
        h.update("foo").update("bar");
        assert_eq!(h.finalize(), digest_bytes("foobar"));
    }

    #[test]
    fn hasher_fields_do_not_collide_across_boundaries() {
        let mut a = Hasher::new();
        a.field("ab").field("c");
        let mut b = Hasher::new();
        b.field("a").field("bc");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn digest_file_reads_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, "hello").unwrap();
        assert_eq!(digest_file(&path).unwrap(), digest_bytes("hello"));
    }

    #[test]
    fn digest_file_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = digest_file(&tmp.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn digest_dir_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("info"), "version: 1").unwrap();
        fs::create_dir_all(tmp.path().join("patches")).unwrap();
        fs::write(tmp.path().join("patches/fix.patch"), "---").unwrap();
        let before = digest_dir(tmp.path()).unwrap();
        assert_eq!(before, digest_dir(tmp.path()).unwrap());

        fs::write(tmp.path().join("patches/fix.patch"), "+++").unwrap();
        assert_ne!(before, digest_dir(tmp.path()).unwrap());
    }

    #[test]
    fn digest_dir_changes_with_rename() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "same").unwrap();
        let before = digest_dir(tmp.path()).unwrap();
        fs::rename(tmp.path().join("a"), tmp.path().join("b")).unwrap();
        assert_ne!(before, digest_dir(tmp.path()).unwrap());
    }
}
