//! CLI output formatting for build runs.
//!
//! Output is **artifact-centric**: the summary line counts what happened to
//! the output tree, and the sections below it name the paths that changed.
//! Unchanged artifacts are only counted, never listed.
//!
//! ```text
//! Build: 3 written, 41 unchanged, 1 removed (44 total)
//!     Written
//!         categories/net/index.html
//!         ports.json
//!         ports/net/curl/index.html
//!     Removed
//!         ports/net/old/index.html
//! Finished in 0.4s
//! ```
//!
//! Each `format_*` function returns `Vec<String>` and does no I/O; the
//! `print_*` wrappers write the lines to stdout.

use crate::manifest::RunReport;
use std::collections::BTreeSet;
use std::time::Duration;

/// Paths listed per section before the rest are summarized.
const MAX_LISTED: usize = 20;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn path_section(lines: &mut Vec<String>, title: &str, paths: &BTreeSet<String>) {
    if paths.is_empty() {
        return;
    }
    lines.push(format!("{}{}", indent(1), title));
    for path in paths.iter().take(MAX_LISTED) {
        lines.push(format!("{}{}", indent(2), path));
    }
    if paths.len() > MAX_LISTED {
        lines.push(format!("{}... and {} more", indent(2), paths.len() - MAX_LISTED));
    }
}

pub fn format_run_report(report: &RunReport, elapsed: Duration) -> Vec<String> {
    let mut lines = vec![format!("Build: {}", report)];
    path_section(&mut lines, "Written", &report.written);
    path_section(&mut lines, "Removed", &report.removed);
    path_section(&mut lines, "Failed", &report.failed);
    if report.is_noop() && report.failed.is_empty() {
        lines.push(format!("{}Site is up to date", indent(1)));
    }
    lines.push(format!("Finished in {:.1}s", elapsed.as_secs_f64()));
    lines
}

pub fn print_run_report(report: &RunReport, elapsed: Duration) {
    for line in format_run_report(report, elapsed) {
        println!("{}", line);
    }
}

/// Paths being watched, one per line.
pub fn format_watch_banner(roots: &[std::path::PathBuf], development: bool) -> Vec<String> {
    let mut lines = vec![if development {
        "Watching (development checkout: changes rebuild the binary)".to_string()
    } else {
        "Watching for changes".to_string()
    }];
    for root in roots {
        lines.push(format!("{}{}", indent(1), root.display()));
    }
    lines
}

pub fn print_watch_banner(roots: &[std::path::PathBuf], development: bool) {
    for line in format_watch_banner(roots, development) {
        println!("{}", line);
    }
}
