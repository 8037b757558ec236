//! Shared data model: package records, commits, contributors, CI metadata and
//! the per-run snapshot ([`Database`]).
//!
//! Records are created by a [`crate::scan::Scanner`], mutated only while the
//! collector enriches them, and then frozen behind `Arc` for the rest of the
//! run. Nothing here is persisted except commits and contributors, which the
//! VCS cache stores verbatim.

use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// `category/name` identity of a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey {
    pub category: String,
    pub name: String,
}

impl PortKey {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Package owning a repository path, if the path lies inside a package
    /// directory (`category/name/<something>`).
    pub fn from_repo_path(path: &str) -> Option<Self> {
        let mut parts = path.split('/');
        let category = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        parts.next().filter(|s| !s.is_empty())?;
        Some(Self::new(category, name))
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    Build,
    Run,
    Link,
}

/// A dependency reference by name. The target may not exist in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub kind: DepKind,
}

/// A binary artifact found under the artifact root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Success,
    Failed,
    Broken,
    #[default]
    #[serde(other)]
    Unknown,
}

impl CiStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CiStatus::Success => "success",
            CiStatus::Failed => "failed",
            CiStatus::Broken => "broken",
            CiStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CI build record for one package. Sizes are bytes, times are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiInfo {
    pub status: CiStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub build_log: String,
    pub build_duration: i64,
    pub build_started: i64,
    pub size: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub builder_info: String,
    pub installed_size: i64,
    pub deps_size: i64,
    pub deps_installed_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub author: String,
    pub email: String,
    pub date: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub merge: bool,
}

impl Commit {
    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Aggregated author statistics keyed by normalized email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    /// First display name seen for this email.
    pub name: String,
    pub email: String,
    pub count: u32,
    #[serde(default)]
    pub other_names: BTreeSet<String>,
}

/// One package record.
#[derive(Debug, Clone, Default)]
pub struct Port {
    pub name: String,
    pub category: String,
    pub description: String,
    pub version: String,
    pub release: String,
    pub license: String,
    pub upstream: String,
    pub maintainer: String,
    pub dir: PathBuf,
    /// Content digest of the package directory.
    pub digest: Option<Digest>,
    pub deps: Vec<Dependency>,
    pub provides: Vec<String>,
    pub broken: bool,
    pub unmaintained: bool,
    pub recipe_lines: usize,
    pub readme: Option<String>,
    pub ci: Option<CiInfo>,
    pub last_commit: Option<Arc<Commit>>,
    /// Newest first.
    pub commits: Vec<Arc<Commit>>,
    pub packages: Vec<PackageInfo>,
}

impl Port {
    pub fn key(&self) -> PortKey {
        PortKey::new(&self.category, &self.name)
    }

    /// Output path of this package's detail page.
    pub fn page_path(&self) -> String {
        format!("ports/{}/{}/index.html", self.category, self.name)
    }

    pub fn last_commit_date(&self) -> Option<DateTime<Utc>> {
        self.last_commit.as_ref().map(|c| c.date)
    }

    pub fn ci_status(&self) -> Option<CiStatus> {
        self.ci.as_ref().map(|ci| ci.status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Category {
    pub name: String,
    pub ports: Vec<Arc<Port>>,
}

impl Category {
    pub fn page_path(&self) -> String {
        format!("categories/{}/index.html", self.name)
    }
}

/// Everything collected for one run.
#[derive(Debug, Clone)]
pub struct Database {
    pub categories: Vec<Category>,
    /// Sorted by (category, name).
    pub ports: Vec<Arc<Port>>,
    /// Newest first.
    pub recent_commits: Vec<Arc<Commit>>,
    pub contributors: BTreeMap<String, Contributor>,
    pub generated_at: DateTime<Utc>,
}
