//! Data collection for one run.
//!
//! The collector fuses four sources into a single snapshot:
//!
//! | Source | Required | On failure |
//! |--------|----------|------------|
//! | package discovery ([`Scanner`]) | yes | the run aborts |
//! | binary artifacts under `metadata.pkg_root` | no | logged, no artifact data |
//! | CI status from `metadata.ci_status` | no | logged, no CI data |
//! | commit history ([`Miner`]) | no | logged, no commits or contributors |
//!
//! All four run concurrently. Records are then enriched, frozen behind `Arc`
//! and published one by one on the port channel, followed by exactly one
//! [`Database`] on the snapshot channel. Cancellation is checked before every
//! publish and wins over a ready send.

use crate::ci::{load_ci_status, resolve_log_path};
use crate::config::SiteConfig;
use crate::model::{Category, CiInfo, Database, PackageInfo, Port};
use crate::registry::Registry;
use crate::scan::{Discovery, ScanError, Scanner};
use crate::vcs::{History, Miner};
use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, spawn_blocking};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Capacity of the port channel; large enough that the producer rarely waits.
pub const PORT_QUEUE: usize = 128;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("package discovery failed: {0}")]
    Scan(#[from] ScanError),
    #[error("collection task failed: {0}")]
    Task(#[from] JoinError),
    #[error("collection cancelled")]
    Cancelled,
}

pub struct Collector {
    config: Arc<SiteConfig>,
    registry: Arc<Registry>,
    scanner: Arc<dyn Scanner>,
}

impl Collector {
    pub fn new(config: Arc<SiteConfig>, registry: Arc<Registry>, scanner: Arc<dyn Scanner>) -> Self {
        Self {
            config,
            registry,
            scanner,
        }
    }

    /// Collect, enrich and publish. Both channels close when this returns.
    pub async fn stream(
        self,
        ctx: CancellationToken,
        port_tx: mpsc::Sender<Arc<Port>>,
        db_tx: mpsc::Sender<Database>,
    ) -> Result<(), CollectError> {
        let (discovery, artifacts, ci, history) = tokio::join!(
            self.discover(ctx.clone()),
            self.load_artifacts(),
            self.load_ci(),
            self.mine_history(),
        );
        let discovery = discovery?;
        let mut history = history.unwrap_or_default();
        let mut artifacts = artifacts;
        let mut ci = ci;

        let ports: Vec<Arc<Port>> = discovery
            .ports
            .into_iter()
            .map(|mut port| {
                let key = port.key().to_string();
                port.packages = artifacts.remove(&key).unwrap_or_default();
                if let Some(mut info) = ci.remove(&key) {
                    info.build_log = resolve_log_path(&info.build_log, self.registry.log_root());
                    port.ci = Some(info);
                }
                if let Some(commits) = history.port_commits.remove(&key) {
                    port.last_commit = commits.first().cloned();
                    port.commits = commits;
                }
                Arc::new(port)
            })
            .collect();

        let categories = group_categories(&discovery.categories, &ports);
        let db = Database {
            categories,
            ports: ports.clone(),
            recent_commits: history.recent,
            contributors: history.contributors,
            generated_at: Utc::now(),
        };

        for port in ports {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(CollectError::Cancelled),
                sent = port_tx.send(port) => {
                    if sent.is_err() {
                        return Err(CollectError::Cancelled);
                    }
                }
            }
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CollectError::Cancelled),
            sent = db_tx.send(db) => sent.map_err(|_| CollectError::Cancelled),
        }
    }

    async fn discover(&self, ctx: CancellationToken) -> Result<Discovery, CollectError> {
        let scanner = Arc::clone(&self.scanner);
        match spawn_blocking(move || scanner.scan(&ctx)).await? {
            Ok(found) => Ok(found),
            Err(ScanError::Cancelled) => Err(CollectError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_artifacts(&self) -> HashMap<String, Vec<PackageInfo>> {
        let Some(root) = self.registry.local_pkg_root() else {
            if let Some(remote) = self.registry.pkg_root() {
                tracing::debug!(root = %remote, "artifact root is remote, not scanning");
            }
            return HashMap::new();
        };
        let root = root.to_path_buf();
        match spawn_blocking(move || scan_artifacts(&root)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "artifact scan failed, continuing without artifacts");
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "artifact scan task failed");
                HashMap::new()
            }
        }
    }

    async fn load_ci(&self) -> HashMap<String, CiInfo> {
        let source = &self.config.metadata.ci_status;
        if source.is_empty() {
            return HashMap::new();
        }
        match load_ci_status(source).await {
            Ok(data) => {
                tracing::debug!(entries = data.len(), source = %source, "loaded CI status");
                data
            }
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "CI status unavailable, continuing without it");
                HashMap::new()
            }
        }
    }

    async fn mine_history(&self) -> Option<History> {
        let root = self.registry.ports_root().to_path_buf();
        let cache_path = self.registry.vcs_cache_path();
        let limit = self.config.build.recent_commits;
        let mined = spawn_blocking(move || {
            Miner::open(&root, limit).and_then(|miner| miner.mine_cached(&cache_path))
        })
        .await;
        match mined {
            Ok(Ok((history, outcome))) => {
                tracing::debug!(?outcome, ports = history.port_commits.len(), "commit history ready");
                Some(history)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "commit history unavailable, continuing without it");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "commit history task failed");
                None
            }
        }
    }
}

/// Group sorted ports into categories, in `names` order. Empty categories
/// are dropped.
fn group_categories(names: &[String], ports: &[Arc<Port>]) -> Vec<Category> {
    let mut members: HashMap<&str, Vec<Arc<Port>>> = HashMap::new();
    for port in ports {
        members
            .entry(port.category.as_str())
            .or_default()
            .push(Arc::clone(port));
    }
    names
        .iter()
        .filter_map(|name| {
            let ports = members.remove(name.as_str())?;
            Some(Category {
                name: name.clone(),
                ports,
            })
        })
        .collect()
}

/// Find `<root>/<category>/<name>/*.spc.*` files, keyed by `category/name`.
pub fn scan_artifacts(root: &Path) -> io::Result<HashMap<String, Vec<PackageInfo>>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("artifact root {} is not a directory", root.display()),
        ));
    }
    let mut found: HashMap<String, Vec<PackageInfo>> = HashMap::new();
    for entry in WalkDir::new(root)
        .min_depth(3)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        if !filename.contains(".spc.") {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let mut parts = rel.components().map(|c| c.as_os_str().to_string_lossy());
        let (Some(category), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        found
            .entry(format!("{category}/{name}"))
            .or_default()
            .push(PackageInfo {
                filename,
                path: entry.path().to_path_buf(),
                size,
            });
    }
    Ok(found)
}
