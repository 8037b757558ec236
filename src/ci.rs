//! CI build status.
//!
//! The CI system publishes a `ci_status.json` mapping `category/name` to a
//! [`CiInfo`] record. It can be read from disk or fetched over HTTP. After a
//! run the engine writes its own `ci_status.json`, where each package's
//! status is re-derived from what actually exists on disk:
//!
//! - the expected artifact is missing: `failed`;
//! - CI reported a failure: `failed`;
//! - the package carries a `BROKEN` marker: `broken`;
//! - otherwise: `success`.
//!
//! The expected artifact is the binary package when a local artifact root is
//! configured, else the package's rendered page.

use crate::model::{CiInfo, CiStatus, Port};
use crate::registry::{Registry, is_remote};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load CI records from a local path or an `http(s)` URL.
pub async fn load_ci_status(source: &str) -> Result<HashMap<String, CiInfo>, CiError> {
    let bytes = if is_remote(source) {
        reqwest::get(source)
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec()
    } else {
        tokio::fs::read(source).await?
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Prefix a relative build-log reference with `log_root`. Absolute paths and
/// remote URLs are returned unchanged.
pub fn resolve_log_path(log: &str, log_root: Option<&str>) -> String {
    match log_root {
        Some(root) if !log.is_empty() && !is_remote(log) && !log.starts_with('/') => {
            format!("{}/{}", root.trim_end_matches('/'), log)
        }
        _ => log.to_string(),
    }
}

pub fn effective_status(port: &Port, artifact_present: bool) -> CiStatus {
    if !artifact_present || port.ci_status() == Some(CiStatus::Failed) {
        CiStatus::Failed
    } else if port.broken {
        CiStatus::Broken
    } else {
        CiStatus::Success
    }
}

/// Whether the artifact a successful build should have produced exists.
pub fn artifact_present(port: &Port, registry: &Registry) -> bool {
    match registry.local_pkg_root() {
        Some(_) => port.packages.iter().any(|p| p.path.is_file()),
        None => registry.output_path(&port.page_path()).is_file(),
    }
}

/// The `ci_status.json` document: every package keyed by `category/name`.
pub fn status_summary<'a>(
    ports: impl IntoIterator<Item = &'a Port>,
    registry: &Registry,
) -> BTreeMap<String, CiInfo> {
    ports
        .into_iter()
        .map(|port| {
            let mut info = port.ci.clone().unwrap_or_default();
            info.status = effective_status(port, artifact_present(port, registry));
            (port.key().to_string(), info)
        })
        .collect()
}
