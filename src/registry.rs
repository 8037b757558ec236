//! Single source of truth for filesystem locations.
//!
//! Every module asks the registry where things live instead of joining paths
//! from config strings itself, so the on-disk layout can change in one place.

use crate::config::SiteConfig;
use std::path::{Path, PathBuf};

/// True for locations that must be fetched rather than read from disk.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://")
        || location.starts_with("https://")
        || location.starts_with("ftp://")
}

#[derive(Debug, Clone)]
pub struct Registry {
    ports_root: PathBuf,
    pkg_root: Option<String>,
    log_root: Option<String>,
    output_root: PathBuf,
    assets_root: PathBuf,
    cache_root: PathBuf,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl Registry {
    pub fn new(config: &SiteConfig) -> Self {
        Self {
            ports_root: PathBuf::from(&config.ports_path),
            pkg_root: non_empty(&config.metadata.pkg_root),
            log_root: non_empty(&config.metadata.log_root),
            output_root: PathBuf::from(&config.out_dir),
            assets_root: PathBuf::from(&config.assets_dir),
            cache_root: PathBuf::from(&config.cache_dir),
        }
    }

    pub fn ports_root(&self) -> &Path {
        &self.ports_root
    }

    pub fn port_dir(&self, category: &str, name: &str) -> PathBuf {
        self.ports_root.join(category).join(name)
    }

    /// Artifact root, if configured. May be remote.
    pub fn pkg_root(&self) -> Option<&str> {
        self.pkg_root.as_deref()
    }

    /// Artifact root, only when it is a local directory.
    pub fn local_pkg_root(&self) -> Option<&Path> {
        self.pkg_root
            .as_deref()
            .filter(|root| !is_remote(root))
            .map(Path::new)
    }

    pub fn log_root(&self) -> Option<&str> {
        self.log_root.as_deref()
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Absolute location of an artifact given its output-relative path.
    pub fn output_path(&self, rel: &str) -> PathBuf {
        self.output_root.join(rel)
    }

    pub fn assets_root(&self) -> &Path {
        &self.assets_root
    }

    pub fn asset_source(&self, filename: &str) -> PathBuf {
        self.assets_root.join(filename)
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.cache_root.join("manifest.json")
    }

    pub fn vcs_cache_path(&self) -> PathBuf {
        self.cache_root.join("git_history.json")
    }
}
