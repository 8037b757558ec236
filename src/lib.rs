//! # portsite
//!
//! A static documentation site generator for a ports tree: a repository of
//! package recipes laid out as `category/name/`. Each run reads the tree, its
//! git history, CI results and built artifacts, and writes one HTML page per
//! package and category plus a handful of overview pages and JSON exports.
//!
//! # Architecture
//!
//! ```text
//!              ┌─ scan (rayon) ─┐
//! Collector ───┼─ artifacts     ├──► ports channel ──┐
//!              ├─ CI status     │                    ├──► Engine ──► public/
//!              └─ vcs (git2) ───┘──► snapshot ───────┘      │
//!                                                           └──► .cache/manifest.json
//! ```
//!
//! The [`engine`] is incremental: every artifact has a composite digest
//! ([`hash`]) and is rewritten only when that digest differs from the one in
//! the persisted [`manifest`]. A second run over an unchanged tree writes
//! nothing. Artifacts that stop being produced are deleted.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`digest`] | SHA-256 digests of bytes, files and directory trees |
//! | [`manifest`] | Persisted artifact → digest map and per-run report |
//! | [`hash`] | Composite cache keys: global, data, page, port, category |
//! | [`model`] | Package records, commits, contributors, CI metadata |
//! | [`scan`] | Package discovery and the `spc` recipe format |
//! | [`vcs`] | Commit history and contributor mining with a head-keyed cache |
//! | [`ci`] | CI status loading and the effective-status rules |
//! | [`collector`] | Concurrent collection and streaming of one run's data |
//! | [`aggregate`] | Derived site statistics |
//! | [`render`] | Page templates (Maud) and display helpers |
//! | [`engine`] | The incremental build run |
//! | [`watch`] | Debounced rebuild-on-change |
//! | [`config`] | Layered `config.toml` loading and validation |
//! | [`registry`] | Input, output and cache locations |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Shallow Invalidation
//!
//! A package page embeds facts about its direct dependencies, so its key
//! includes their directory digests. Transitive dependencies are not
//! included: editing `c` re-renders `b` (which depends on `c`) but not `a`
//! (which depends on `b`).
//!
//! ## Best-Effort Enrichment
//!
//! Only package discovery is mandatory. Git history, CI status and artifact
//! metadata each degrade to "no data" on failure, with a warning, and the
//! site is still built.

pub mod aggregate;
pub mod ci;
pub mod collector;
pub mod config;
pub mod digest;
pub mod engine;
pub mod hash;
pub mod manifest;
pub mod model;
pub mod output;
pub mod registry;
pub mod render;
pub mod scan;
pub mod vcs;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
