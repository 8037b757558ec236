//! Composite cache keys.
//!
//! Each artifact class has one composite digest that the engine compares
//! against the [`crate::manifest::Manifest`]. The tiers nest:
//!
//! ```text
//! global   = version ‖ config ‖ template sources
//! data     = total ports ‖ broken count ‖ total commits
//! page     = global ‖ data ‖ path
//! port     = global ‖ data ‖ port digest ‖ direct dep digests ‖ last commit id
//! category = global ‖ data ‖ name ‖ member digests
//! content  = global ‖ bytes
//! ```
//!
//! `data` is a deliberately coarse proxy for "the aggregate view changed":
//! pages that embed top lists or series can go stale when those shift
//! without moving the three counters.
//!
//! Port hashes fold in the digest of each *direct* dependency, so editing a
//! dependency re-renders its dependents. Propagation stops after one hop.

use crate::aggregate::SiteData;
use crate::config::SiteConfig;
use crate::digest::{Digest, Hasher, digest_bytes};
use crate::manifest::MANIFEST_VERSION;
use crate::model::{Category, Port};
use std::collections::HashMap;
use std::sync::Arc;

fn feed_port_digest(h: &mut Hasher, port: &Port) {
    match &port.digest {
        Some(d) => h.digest(d),
        None => h.field("-"),
    };
}

pub fn global_hash(config: &SiteConfig, template_sources: &[&str]) -> Digest {
    let mut h = Hasher::new();
    h.field(&MANIFEST_VERSION.to_string());
    // Serializing plain strings, numbers and maps cannot fail.
    let json = serde_json::to_vec(config).unwrap_or_default();
    h.update(&json).field("");
    for source in template_sources {
        h.digest(&digest_bytes(source));
    }
    h.finalize()
}

pub fn data_hash(site: &SiteData) -> Digest {
    digest_bytes(format!(
        "{}-{}-{}",
        site.total_ports, site.broken_count, site.total_commits
    ))
}

/// Key for a fixed top-level page.
pub fn page_hash(global: &Digest, data: &Digest, path: &str) -> Digest {
    let mut h = Hasher::new();
    h.digest(global).digest(data).field(path);
    h.finalize()
}

/// Key for a package detail page. `simple_index` resolves dependency names
/// (and aliases) to packages; unresolved names contribute nothing.
pub fn port_hash(
    port: &Port,
    global: &Digest,
    data: &Digest,
    simple_index: &HashMap<String, Arc<Port>>,
) -> Digest {
    let mut h = Hasher::new();
    h.digest(global).digest(data);
    feed_port_digest(&mut h, port);
    for dep in &port.deps {
        if let Some(target) = simple_index.get(&dep.name) {
            feed_port_digest(&mut h, target);
        }
    }
    if let Some(commit) = &port.last_commit {
        h.field(&commit.id);
    }
    h.finalize()
}

pub fn category_hash(category: &Category, global: &Digest, data: &Digest) -> Digest {
    let mut h = Hasher::new();
    h.digest(global).digest(data).field(&category.name);
    for port in &category.ports {
        feed_port_digest(&mut h, port);
    }
    h.finalize()
}

/// Key for generated content such as JSON exports.
pub fn content_hash(global: &Digest, bytes: &[u8]) -> Digest {
    let mut h = Hasher::new();
    h.digest(global).update(bytes);
    h.finalize()
}
