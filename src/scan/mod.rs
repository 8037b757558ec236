//! Package discovery.
//!
//! A [`Scanner`] walks the ports tree and returns every package record it can
//! parse. Record parsing is delegated to a [`Parser`] for one package format;
//! the format is chosen from configuration through [`scanner_for`].
//!
//! ## Layout
//!
//! ```text
//! ports/
//! ├── net/                 # Category
//! │   ├── curl/            # Package (parsed by the format's Parser)
//! │   └── wget/
//! ├── devel/
//! │   └── ...
//! ├── bundles/             # Skipped
//! └── .git/                # Hidden, skipped
//! ```
//!
//! ## Failure Modes
//!
//! - The ports root can't be read: the whole scan fails.
//! - One package fails to parse: it is logged and dropped, the scan goes on.
//! - Categories that end up with no packages are omitted.

pub mod spc;

use crate::model::Port;
use crate::registry::Registry;
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot read ports tree {path}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("missing {file} in {dir}")]
    MissingFile { dir: PathBuf, file: &'static str },
    #[error("unsupported package format '{0}'")]
    UnsupportedFormat(String),
    #[error("scan cancelled")]
    Cancelled,
}

/// The closed set of package formats a ports tree can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Spc,
}

impl FromStr for PackageFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spc" => Ok(PackageFormat::Spc),
            other => Err(ScanError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageFormat::Spc => f.write_str("spc"),
        }
    }
}

/// Turns one `(category, name)` directory into a package record.
pub trait Parser: Send + Sync {
    fn format(&self) -> PackageFormat;
    fn parse(&self, category: &str, name: &str) -> Result<Port, ScanError>;
}

/// Result of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Names of categories with at least one package, sorted.
    pub categories: Vec<String>,
    /// Sorted by (category, name).
    pub ports: Vec<Port>,
}

/// Discovers categories and packages. Blocking; run it off the async runtime.
pub trait Scanner: Send + Sync {
    fn format(&self) -> PackageFormat;
    fn scan(&self, ctx: &CancellationToken) -> Result<Discovery, ScanError>;
}

/// Build the scanner for a configured format name.
pub fn scanner_for(
    format: &str,
    registry: Arc<Registry>,
) -> Result<Arc<dyn Scanner>, ScanError> {
    match format.parse::<PackageFormat>()? {
        PackageFormat::Spc => {
            let parser = Arc::new(spc::SpcParser::new(Arc::clone(&registry)));
            Ok(Arc::new(TreeScanner::new(registry, parser)))
        }
    }
}

fn is_skipped_category(name: &str) -> bool {
    name.starts_with('.') || name == "bundles"
}

/// Two-level `category/name` directory walk shared by all formats.
pub struct TreeScanner {
    registry: Arc<Registry>,
    parser: Arc<dyn Parser>,
}

impl TreeScanner {
    pub fn new(registry: Arc<Registry>, parser: Arc<dyn Parser>) -> Self {
        Self { registry, parser }
    }

    fn candidates(&self, ctx: &CancellationToken) -> Result<Vec<(String, String)>, ScanError> {
        let root = self.registry.ports_root();
        let entries = fs::read_dir(root).map_err(|source| ScanError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let mut out = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            if ctx.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let category = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() || is_skipped_category(&category) {
                continue;
            }
            let Ok(ports) = fs::read_dir(entry.path()) else {
                tracing::warn!(category = %category, "unreadable category directory");
                continue;
            };
            for port in ports.filter_map(|e| e.ok()) {
                let name = port.file_name().to_string_lossy().into_owned();
                if port.path().is_dir() && !name.starts_with('.') {
                    out.push((category.clone(), name));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

impl Scanner for TreeScanner {
    fn format(&self) -> PackageFormat {
        self.parser.format()
    }

    fn scan(&self, ctx: &CancellationToken) -> Result<Discovery, ScanError> {
        let candidates = self.candidates(ctx)?;

        let ports: Vec<Port> = candidates
            .par_iter()
            .filter_map(|(category, name)| {
                if ctx.is_cancelled() {
                    return None;
                }
                match self.parser.parse(category, name) {
                    Ok(port) => Some(port),
                    Err(e) => {
                        tracing::warn!(port = %format!("{category}/{name}"), error = %e, "skipping package");
                        None
                    }
                }
            })
            .collect();

        if ctx.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let mut categories: Vec<String> = ports.iter().map(|p| p.category.clone()).collect();
        categories.dedup();

        tracing::debug!(
            ports = ports.len(),
            categories = categories.len(),
            format = %self.format(),
            "discovery finished"
        );
        Ok(Discovery { categories, ports })
    }
}
