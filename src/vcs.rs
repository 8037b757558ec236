//! Commit history mining.
//!
//! Walks the ports tree's git log once, newest first, and derives:
//!
//! - per-package commit lists (`category/name` → commits, newest first),
//! - a bounded feed of the most recent commits with their file changes,
//! - contributor statistics keyed by normalized email.
//!
//! Each commit is diffed against its first parent; the root commit reports
//! every file as added. A commit counts once per package however many of
//! that package's files it touches. Attribution is recorded for every
//! `category/name/...` path; callers keep only the keys they know about.
//!
//! File-change lists are materialized only for commits inside the recent
//! feed, which bounds memory on long histories.
//!
//! ## Caching
//!
//! [`Miner::mine_cached`] stores the results next to the head commit id. When
//! the live head matches, the stored results are returned without walking.
//! History rewrites that keep the same head are not detected. Neither is a
//! change of `build.recent_commits`: a hit returns the feed mined under the
//! limit in force when the cache was written.

use crate::manifest::write_atomic;
use crate::model::{Commit, Contributor, PortKey};
use chrono::{DateTime, Utc};
use git2::{Delta, Repository, Sort};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("cannot open repository at {path}: {source}")]
    Open {
        path: PathBuf,
        source: git2::Error,
    },
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// Everything mined from one walk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub port_commits: HashMap<String, Vec<Arc<Commit>>>,
    pub recent: Vec<Arc<Commit>>,
    pub contributors: BTreeMap<String, Contributor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Stored head matched; no walk happened.
    Hit,
    /// The log was walked and the cache rewritten.
    Walked,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    head: String,
    #[serde(flatten)]
    history: History,
}

pub struct Miner {
    repo: Repository,
    recent_limit: usize,
}

fn normalize_email(email: &str) -> String {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        "unknown".to_string()
    } else {
        email
    }
}

impl Miner {
    pub fn open(path: &Path, recent_limit: usize) -> Result<Self, VcsError> {
        let repo = Repository::open(path).map_err(|source| VcsError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { repo, recent_limit })
    }

    pub fn head_id(&self) -> Result<String, VcsError> {
        let head = self.repo.head()?.peel_to_commit()?;
        Ok(head.id().to_string())
    }

    /// Walk the full log from HEAD.
    pub fn mine(&self) -> Result<History, VcsError> {
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut history = History::default();
        for (index, oid) in walk.enumerate() {
            let commit = self.repo.find_commit(oid?)?;
            let materialize = index < self.recent_limit;

            let author = commit.author();
            let name = String::from_utf8_lossy(author.name_bytes()).into_owned();
            let email = normalize_email(&String::from_utf8_lossy(author.email_bytes()));

            let contributor = history
                .contributors
                .entry(email.clone())
                .or_insert_with(|| Contributor {
                    name: name.clone(),
                    email: email.clone(),
                    count: 0,
                    other_names: Default::default(),
                });
            contributor.count += 1;
            if contributor.name != name {
                contributor.other_names.insert(name.clone());
            }

            let mut mined = Commit {
                id: commit.id().to_string(),
                author: name,
                email,
                date: DateTime::<Utc>::from_timestamp(author.when().seconds(), 0)
                    .unwrap_or_default(),
                message: String::from_utf8_lossy(commit.message_bytes())
                    .trim()
                    .to_string(),
                added: Vec::new(),
                modified: Vec::new(),
                deleted: Vec::new(),
                merge: commit.parent_count() > 1,
            };

            let tree = commit.tree()?;
            let parent_tree = match commit.parent(0) {
                Ok(parent) => Some(parent.tree()?),
                Err(_) => None,
            };
            let diff = self
                .repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

            let mut touched: Vec<PortKey> = Vec::new();
            let mut seen: HashSet<PortKey> = HashSet::new();
            for delta in diff.deltas() {
                let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path())
                else {
                    continue;
                };
                let path = path.to_string_lossy().replace('\\', "/");
                if let Some(key) = PortKey::from_repo_path(&path) {
                    if seen.insert(key.clone()) {
                        touched.push(key);
                    }
                }
                if materialize {
                    match delta.status() {
                        Delta::Added => mined.added.push(path),
                        Delta::Deleted => mined.deleted.push(path),
                        _ => mined.modified.push(path),
                    }
                }
            }

            let mined = Arc::new(mined);
            if materialize {
                history.recent.push(Arc::clone(&mined));
            }
            for key in touched {
                history
                    .port_commits
                    .entry(key.to_string())
                    .or_default()
                    .push(Arc::clone(&mined));
            }
        }
        Ok(history)
    }

    /// Return cached results when the stored head matches, otherwise walk and
    /// rewrite the cache. A failure to write the cache is logged, not fatal.
    pub fn mine_cached(&self, cache_path: &Path) -> Result<(History, CacheOutcome), VcsError> {
        let head = self.head_id()?;

        if let Some(cached) = read_cache(cache_path) {
            if cached.head == head {
                tracing::debug!(head = %head, "vcs cache hit");
                return Ok((cached.history, CacheOutcome::Hit));
            }
            tracing::debug!(stored = %cached.head, live = %head, "vcs cache stale");
        }

        let history = self.mine()?;
        let file = CacheFile { head, history };
        match serde_json::to_vec(&file) {
            Ok(bytes) => {
                if let Err(e) = write_atomic(cache_path, &bytes) {
                    tracing::warn!(path = %cache_path.display(), error = %e, "failed to write vcs cache");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize vcs cache"),
        }
        Ok((file.history, CacheOutcome::Walked))
    }
}

fn read_cache(path: &Path) -> Option<CacheFile> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable vcs cache");
            None
        }
    }
}
