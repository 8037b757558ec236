//! Display helpers shared by the page templates.

use crate::model::Contributor;
use chrono::{DateTime, Utc};

/// Binary-prefixed size: `512 B`, `1.5 KiB`, `3.0 MiB`.
pub fn format_bytes(bytes: i64) -> String {
    const UNIT: i64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 5 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}iB", bytes as f64 / div as f64, prefix)
}

/// `45s`, `1m 5s`, `2h 3m`.
pub fn format_duration(seconds: i64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// Coarse relative time; anything older than 30 days prints as a date.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - then;
    if elapsed.num_hours() < 1 {
        format!("{}m ago", elapsed.num_minutes().max(0))
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else if elapsed.num_days() < 30 {
        format!("{}d ago", elapsed.num_days())
    } else {
        then.format("%Y-%m-%d").to_string()
    }
}

pub fn contributor_tooltip(contributor: &Contributor) -> String {
    if contributor.other_names.is_empty() {
        return contributor.email.clone();
    }
    let names: Vec<&str> = contributor.other_names.iter().map(String::as_str).collect();
    format!("Previously: {} | {}", names.join(", "), contributor.email)
}

/// Link from the page at `current` (an output-relative file path) to
/// `target` (an output-relative path), independent of where the site is
/// mounted.
pub fn relative_href(current: &str, target: &str) -> String {
    let depth = current.matches('/').count();
    let href = format!("{}{}", "../".repeat(depth), target.trim_start_matches('/'));
    if href.is_empty() { "./".to_string() } else { href }
}
