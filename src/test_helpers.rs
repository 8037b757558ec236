//! Shared test utilities.
//!
//! Fixture writers for ports trees and git repositories, so tests in every
//! module can build exactly the tree they need inside a `TempDir`.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_port(tmp.path(), "net", "curl", "version: 8.0", ".openssl");
//! let repo = init_repo(tmp.path());
//! commit_all(&repo, "Jane", "jane@example.org", "net/curl: add", 1_700_000_000);
//! ```

use git2::{IndexAddOption, Oid, Repository, Signature, Time};
use std::fs;
use std::path::{Path, PathBuf};

// =========================================================================
// Ports tree
// =========================================================================

/// Create `root/category/name/` with an `info` file and, if non-empty, a
/// `deps` file. Returns the package directory.
pub fn write_port(root: &Path, category: &str, name: &str, info: &str, deps: &str) -> PathBuf {
    let dir = root.join(category).join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("info"), info).unwrap();
    if !deps.is_empty() {
        fs::write(dir.join("deps"), deps).unwrap();
    }
    dir
}

/// Write a file relative to `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

// =========================================================================
// Git repositories
// =========================================================================

pub fn init_repo(path: &Path) -> Repository {
    Repository::init(path).unwrap()
}

/// Stage every change in the work tree (additions, edits and deletions) and
/// commit it on HEAD with the given author and unix time.
pub fn commit_all(repo: &Repository, author: &str, email: &str, message: &str, time: i64) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"], None).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let sig = Signature::new(author, email, &Time::new(time, 0)).unwrap();
    let parent = repo
        .head()
        .ok()
        .and_then(|h| h.target())
        .map(|oid| repo.find_commit(oid).unwrap());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}
