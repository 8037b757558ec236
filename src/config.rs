//! Site configuration module.
//!
//! Handles loading, validating, and layering `config.toml`. Three layers are
//! merged, later ones winning key by key:
//!
//! 1. Stock defaults ([`SiteConfig::default`]).
//! 2. The user's `config.toml` (optional; a missing file is not an error).
//! 3. Command-line overrides (`--ports`, `--out`, `--ci-status`, ...).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! title = "portsite"
//! description = "Package repository browser"
//! ports_path = "ports"         # The ports tree (usually a git checkout)
//! out_dir = "public"
//! cache_dir = ".cache"         # Manifest and VCS cache
//! assets_dir = "assets"
//! package_manager = "spc"
//!
//! [metadata]
//! pkg_root = ""                # Binary artifact root (local path or URL)
//! log_root = ""                # Prefix for relative CI build-log paths
//! ci_status = ""               # ci_status.json (local path or URL)
//!
//! [build]
//! render_workers = 32
//! recent_commits = 100
//!
//! [watch]
//! debounce_ms = 300
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::scan::PackageFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `config.toml`.
///
/// Serialized into the global hash, so any change here invalidates every
/// generated page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub title: String,
    pub description: String,
    pub domain: String,
    pub footer_text: String,
    pub footer_url: String,
    /// URL prefix the site is served under. `"/"` is normalized to empty.
    pub base_url: String,
    pub source_code_url: String,
    pub favicon: String,
    pub ports_path: String,
    pub out_dir: String,
    pub cache_dir: String,
    pub assets_dir: String,
    pub package_manager: String,
    /// Extra stylesheets linked from every page (asset names or URLs).
    pub extra_css: Vec<String>,
    pub extra_js: Vec<String>,
    /// Fortunes text file, relative to `assets_dir` unless absolute.
    pub fortunes: String,
    pub metadata: MetadataConfig,
    pub build: BuildConfig,
    pub watch: WatchConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "portsite".to_string(),
            description: "Package repository browser".to_string(),
            domain: String::new(),
            footer_text: "Powered by portsite".to_string(),
            footer_url: String::new(),
            base_url: String::new(),
            source_code_url: String::new(),
            favicon: String::new(),
            ports_path: "ports".to_string(),
            out_dir: "public".to_string(),
            cache_dir: ".cache".to_string(),
            assets_dir: "assets".to_string(),
            package_manager: "spc".to_string(),
            extra_css: Vec::new(),
            extra_js: Vec::new(),
            fortunes: String::new(),
            metadata: MetadataConfig::default(),
            build: BuildConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports_path.is_empty() {
            return Err(ConfigError::Validation("ports_path must not be empty".into()));
        }
        if self.out_dir.is_empty() {
            return Err(ConfigError::Validation("out_dir must not be empty".into()));
        }
        if self.cache_dir.is_empty() {
            return Err(ConfigError::Validation("cache_dir must not be empty".into()));
        }
        if self.package_manager.parse::<PackageFormat>().is_err() {
            return Err(ConfigError::Validation(format!(
                "unsupported package_manager '{}'",
                self.package_manager
            )));
        }
        if self.build.render_workers == 0 {
            return Err(ConfigError::Validation(
                "build.render_workers must be at least 1".into(),
            ));
        }
        if self.watch.debounce_ms == 0 {
            return Err(ConfigError::Validation(
                "watch.debounce_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Resolve derived values: `~` expansion of paths, `base_url = "/"`
    /// normalized to empty.
    pub fn finalize(mut self) -> Self {
        if self.base_url == "/" {
            self.base_url.clear();
        }
        let base = self.base_url.trim_end_matches('/').to_string();
        self.base_url = base;
        for path in [
            &mut self.ports_path,
            &mut self.out_dir,
            &mut self.cache_dir,
            &mut self.assets_dir,
            &mut self.metadata.pkg_root,
            &mut self.metadata.log_root,
            &mut self.metadata.ci_status,
        ] {
            *path = expand_home(path);
        }
        self
    }

    /// Absolute URL of an output page, when a domain is configured.
    /// `index.html` collapses to its directory.
    pub fn canonical_url(&self, path: &str) -> Option<String> {
        if self.domain.is_empty() {
            return None;
        }
        let path = path.strip_suffix("index.html").unwrap_or(path);
        Some(format!(
            "https://{}{}/{}",
            self.domain.trim_end_matches('/'),
            self.base_url,
            path
        ))
    }
}

fn expand_home(path: &str) -> String {
    match path.strip_prefix('~') {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => Path::new(&home)
                .join(rest.trim_start_matches('/'))
                .to_string_lossy()
                .into_owned(),
            None => path.to_string(),
        },
        None => path.to_string(),
    }
}

/// External metadata sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataConfig {
    /// Root of built binary artifacts: `<pkg_root>/<category>/<name>/*.spc.*`.
    pub pkg_root: String,
    /// Prefix applied to relative CI build-log references.
    pub log_root: String,
    /// Location of `ci_status.json`; a path or an `http(s)` URL.
    pub ci_status: String,
}

/// Build pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Maximum package pages rendered concurrently.
    pub render_workers: usize,
    /// Size of the recent-commit feed.
    pub recent_commits: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            render_workers: 32,
            recent_commits: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key by key; any other overlay value replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. `Ok(None)` if it doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge the overlays onto `base` in order, then deserialize, validate and
/// finalize.
pub fn resolve_config(
    base: toml::Value,
    overlays: impl IntoIterator<Item = toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = overlays.into_iter().fold(base, merge_toml);
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config.finalize())
}

/// Load config from `path` (if present) with command-line `overrides` on top.
pub fn load_config(path: &Path, overrides: toml::Value) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value();
    let file = load_raw_config(path)?;
    resolve_config(base, file.into_iter().chain(std::iter::once(overrides)))
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# portsite configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.
#
# Command-line flags (--ports, --out, --ci-status, --title, --description)
# override the values in this file.

# ---------------------------------------------------------------------------
# Site identity
# ---------------------------------------------------------------------------
title = "portsite"
description = "Package repository browser"
domain = ""
footer_text = "Powered by portsite"
footer_url = ""

# URL prefix the site is served under. "/" and "" both mean the domain root.
base_url = ""

# Link to the ports tree repository, shown in the header.
source_code_url = ""

# Favicon asset name (looked up under assets_dir) or absolute URL.
favicon = ""

# ---------------------------------------------------------------------------
# Paths ("~" expands to the home directory)
# ---------------------------------------------------------------------------
ports_path = "ports"
out_dir = "public"
cache_dir = ".cache"
assets_dir = "assets"

# Package format of the ports tree. Supported: "spc".
package_manager = "spc"

# Extra stylesheets and scripts linked from every page.
extra_css = []
extra_js = []

# Text file of fortunes separated by "!---" lines, published as
# assets/fortunes.js. Relative to assets_dir unless absolute.
fortunes = ""

# ---------------------------------------------------------------------------
# External metadata
# ---------------------------------------------------------------------------
[metadata]
# Root of built packages: <pkg_root>/<category>/<name>/<name>.spc.<fmt>
pkg_root = ""

# Prefix for relative build-log paths found in ci_status.json.
log_root = ""

# CI results: a local path or an http(s) URL.
ci_status = ""

# ---------------------------------------------------------------------------
# Build
# ---------------------------------------------------------------------------
[build]
# Maximum number of package pages rendered at the same time.
render_workers = 32

# Number of commits kept (with file lists) in the recent-commit feed.
recent_commits = 100

# ---------------------------------------------------------------------------
# Watch mode
# ---------------------------------------------------------------------------
[watch]
# Quiet period after the last filesystem event before rebuilding.
debounce_ms = 300
"##
}
