//! Persisted artifact manifest for incremental builds.
//!
//! Rendering every page of a large ports tree is the bulk of a run, and on a
//! typical rebuild almost nothing has changed. The manifest records, for
//! every artifact path under the output root, the composite digest it was
//! last written with. An artifact is re-emitted only when its current digest
//! differs from the recorded one (see [`crate::hash`] for how those digests
//! are composed).
//!
//! # Lifecycle
//!
//! Each run starts from one of two states:
//!
//! - **Loaded**: the file existed, parsed, and carried the current
//!   [`MANIFEST_VERSION`].
//! - **Fresh**: no file, a corrupt file, or a version mismatch. A mismatch
//!   discards the whole manifest; there is no partial migration. The worst
//!   case is a slower full rebuild.
//!
//! # Concurrency
//!
//! Render workers call [`Manifest::has_changed`] and [`Manifest::update`]
//! concurrently, so all entries sit behind a single mutex. Every operation is
//! a point read or a point write; no caller holds the lock across steps.
//!
//! # Storage
//!
//! `<cache_dir>/manifest.json`, written atomically (temp file + rename).

use crate::digest::Digest;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Version of the manifest format. Bump this to invalidate every existing
/// manifest when the format or the hash composition changes.
pub const MANIFEST_VERSION: u32 = 2;

/// Whether the manifest came from disk or started empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOrigin {
    Loaded,
    Fresh,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ManifestFile {
    version: u32,
    hashes: BTreeMap<String, Digest>,
}

/// Artifact path → last-written digest.
#[derive(Debug)]
pub struct Manifest {
    origin: ManifestOrigin,
    hashes: Mutex<HashMap<String, Digest>>,
}

impl Manifest {
    /// An empty manifest (first build, or a forced full rebuild).
    pub fn fresh() -> Self {
        Self {
            origin: ManifestOrigin::Fresh,
            hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Load from `path`. Returns a fresh manifest if the file doesn't exist
    /// or can't be used (version mismatch, corruption).
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::fresh(),
        };
        let file: ManifestFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable manifest");
                return Self::fresh();
            }
        };
        if file.version != MANIFEST_VERSION {
            tracing::info!(
                found = file.version,
                expected = MANIFEST_VERSION,
                "manifest version changed, starting a full rebuild"
            );
            return Self::fresh();
        }
        Self {
            origin: ManifestOrigin::Loaded,
            hashes: Mutex::new(file.hashes.into_iter().collect()),
        }
    }

    pub fn origin(&self) -> ManifestOrigin {
        self.origin
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Digest>> {
        // A panicking render worker must not wedge the rest of the run.
        self.hashes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True if `path` is unknown or was last written with a different digest.
    pub fn has_changed(&self, path: &str, digest: &Digest) -> bool {
        self.lock().get(path) != Some(digest)
    }

    /// Record that `path` now holds content for `digest`.
    pub fn update(&self, path: &str, digest: Digest) {
        self.lock().insert(path.to_string(), digest);
    }

    /// Forget `path`. Returns whether it was present.
    pub fn remove(&self, path: &str) -> bool {
        self.lock().remove(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<Digest> {
        self.lock().get(path).copied()
    }

    /// Snapshot of all recorded paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Serialize the full manifest to `path`, atomically.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            hashes: self.lock().iter().map(|(k, v)| (k.clone(), *v)).collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(path, json.as_bytes())
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// What a single run did to the output tree.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    pub written: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub unchanged: u32,
}

impl RunReport {
    pub fn write(&mut self, path: &str) {
        self.written.insert(path.to_string());
    }

    pub fn skip(&mut self) {
        self.unchanged += 1;
    }

    pub fn remove(&mut self, path: &str) {
        self.removed.insert(path.to_string());
    }

    pub fn fail(&mut self, path: &str) {
        self.failed.insert(path.to_string());
    }

    pub fn total(&self) -> usize {
        self.written.len() + self.failed.len() + self.unchanged as usize
    }

    /// No writes and no deletions.
    pub fn is_noop(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} written, {} unchanged",
            self.written.len(),
            self.unchanged
        )?;
        if !self.removed.is_empty() {
            write!(f, ", {} removed", self.removed.len())?;
        }
        if !self.failed.is_empty() {
            write!(f, ", {} failed", self.failed.len())?;
        }
        write!(f, " ({} total)", self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    // =========================================================================
    // Manifest basics
    // =========================================================================

    #[test]
    fn fresh_manifest_is_empty() {
        let m = Manifest::fresh();
        assert_eq!(m.origin(), ManifestOrigin::Fresh);
        assert!(m.is_empty());
    }

    #[test]
    fn unknown_path_has_changed() {
        let m = Manifest::fresh();
        assert!(m.has_changed("index.html", &digest_bytes("a")));
    }

    #[test]
    fn same_digest_is_unchanged() {
        let m = Manifest::fresh();
        m.update("index.html", digest_bytes("a"));
        assert!(!m.has_changed("index.html", &digest_bytes("a")));
        assert!(m.has_changed("index.html", &digest_bytes("b")));
    }

    #[test]
    fn remove_forgets_path() {
        let m = Manifest::fresh();
        m.update("x", digest_bytes("a"));
        assert!(m.remove("x"));
        assert!(!m.remove("x"));
        assert!(m.has_changed("x", &digest_bytes("a")));
    }

    #[test]
    fn concurrent_updates_all_land() {
        let m = Arc::new(Manifest::fresh());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        m.update(&format!("ports/{t}/{i}/index.html"), digest_bytes([t, i]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.len(), 400);
    }

    // =========================================================================
    // Save / Load
    // =========================================================================

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache/manifest.json");
        let m = Manifest::fresh();
        m.update("index.html", digest_bytes("1"));
        m.update("ports.json", digest_bytes("2"));
        m.save(&path).unwrap();

        let loaded = Manifest::load(&path);
        assert_eq!(loaded.origin(), ManifestOrigin::Loaded);
        assert_eq!(loaded.paths(), vec!["index.html", "ports.json"]);
        assert_eq!(loaded.get("ports.json"), Some(digest_bytes("2")));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn load_missing_file_is_fresh() {
        let tmp = TempDir::new().unwrap();
        let m = Manifest::load(&tmp.path().join("manifest.json"));
        assert_eq!(m.origin(), ManifestOrigin::Fresh);
    }

    #[test]
    fn load_corrupt_json_is_fresh() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(Manifest::load(&path).origin(), ManifestOrigin::Fresh);
    }

    #[test]
    fn load_wrong_version_discards_everything() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");
        let json = format!(
            r#"{{"version": {}, "hashes": {{"index.html": "{}"}}}}"#,
            MANIFEST_VERSION + 1,
            digest_bytes("x")
        );
        fs::write(&path, json).unwrap();
        let m = Manifest::load(&path);
        assert_eq!(m.origin(), ManifestOrigin::Fresh);
        assert!(m.is_empty());
    }

    // =========================================================================
    // RunReport
    // =========================================================================

    #[test]
    fn run_report_display() {
        let mut r = RunReport::default();
        r.write("a");
        r.skip();
        r.skip();
        assert_eq!(r.to_string(), "1 written, 2 unchanged (3 total)");
        r.remove("old");
        r.fail("b");
        assert_eq!(
            r.to_string(),
            "1 written, 2 unchanged, 1 removed, 1 failed (4 total)"
        );
    }

    #[test]
    fn run_report_noop() {
        let mut r = RunReport::default();
        r.skip();
        assert!(r.is_noop());
        r.remove("x");
        assert!(!r.is_noop());
    }
}
