//! Derived site statistics.
//!
//! [`aggregate`] is a pure function of the [`Database`]: the snapshot's
//! `generated_at` stands in for "now", so the same snapshot always yields the
//! same [`SiteData`]. Every ranking is a stable sort on its stated key, which
//! leaves ties in snapshot order.

use crate::model::{CiStatus, Contributor, Database, Port};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Length of the ranked lists.
pub const TOP_N: usize = 10;
/// Packages shown in the home page's recent-updates list.
pub const RECENT_UPDATES: usize = 12;
/// Days in the activity series before today.
pub const ACTIVITY_DAYS: i64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Sum of successful build durations, seconds.
    pub total_time: i64,
    /// Mean successful build duration, seconds.
    pub avg_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStat {
    pub date: NaiveDate,
    /// Commits in the recent feed on this day.
    pub commits: usize,
    /// Packages whose last commit falls on this day.
    pub updates: usize,
    /// CI builds started on this day.
    pub builds: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SiteData {
    /// `category/name` → package.
    pub port_map: HashMap<String, Arc<Port>>,
    /// Package name or alias → package; the first package claiming a name wins.
    pub simple_map: HashMap<String, Arc<Port>>,
    pub total_ports: usize,
    /// Marked broken or failed in CI.
    pub broken_count: usize,
    pub unmaintained_count: usize,
    pub updated_this_week: usize,
    /// Packages whose oldest known commit is under 30 days old.
    pub new_ports: usize,
    pub daily: Vec<DailyStat>,
    /// Largest value across all three daily series, at least 1.
    pub max_daily: usize,
    pub licenses: BTreeMap<String, usize>,
    pub build_stats: BuildStats,
    pub total_recipe_lines: usize,
    pub top_recipes: Vec<Arc<Port>>,
    /// Share of all recipe lines held by the five largest recipes.
    pub top5_line_percentage: f64,
    pub top_sizes: Vec<Arc<Port>>,
    pub top_contributors: Vec<Contributor>,
    pub total_commits: u64,
    /// Canonical contributor names, sorted.
    pub all_authors: Vec<String>,
    pub recent_updates: Vec<Arc<Port>>,
    pub last_update: DateTime<Utc>,
}

impl SiteData {
    /// Licenses by descending use, ties alphabetical.
    pub fn licenses_by_use(&self) -> Vec<(&str, usize)> {
        let mut out: Vec<(&str, usize)> =
            self.licenses.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }

    /// Resolve a dependency name or alias.
    pub fn resolve(&self, name: &str) -> Option<&Arc<Port>> {
        self.simple_map.get(name)
    }
}

pub fn aggregate(db: &Database) -> SiteData {
    let now = db.generated_at;
    let week_ago = now - Duration::days(7);
    let month_ago = now - Duration::days(30);

    let mut data = SiteData {
        total_ports: db.ports.len(),
        last_update: now,
        ..Default::default()
    };

    let mut commits_by_day: HashMap<NaiveDate, usize> = HashMap::new();
    let mut updates_by_day: HashMap<NaiveDate, usize> = HashMap::new();
    let mut builds_by_day: HashMap<NaiveDate, usize> = HashMap::new();

    for commit in &db.recent_commits {
        *commits_by_day.entry(commit.date.date_naive()).or_default() += 1;
    }

    for port in &db.ports {
        data.port_map.insert(port.key().to_string(), Arc::clone(port));
        for alias in std::iter::once(&port.name).chain(&port.provides) {
            data.simple_map
                .entry(alias.clone())
                .or_insert_with(|| Arc::clone(port));
        }

        data.total_recipe_lines += port.recipe_lines;
        if port.broken || port.ci_status() == Some(CiStatus::Failed) {
            data.broken_count += 1;
        }
        if port.unmaintained {
            data.unmaintained_count += 1;
        }
        if let Some(last) = port.last_commit_date() {
            *updates_by_day.entry(last.date_naive()).or_default() += 1;
            if last > week_ago {
                data.updated_this_week += 1;
            }
        }
        if port.commits.last().is_some_and(|oldest| oldest.date > month_ago) {
            data.new_ports += 1;
        }
        for license in port.license.split(',').map(str::trim).filter(|l| !l.is_empty()) {
            *data.licenses.entry(license.to_string()).or_default() += 1;
        }
        if let Some(ci) = &port.ci {
            data.build_stats.total += 1;
            if ci.status == CiStatus::Success {
                data.build_stats.success += 1;
                data.build_stats.total_time += ci.build_duration;
            } else {
                data.build_stats.failed += 1;
            }
            if ci.build_started > 0 {
                if let Some(started) = DateTime::<Utc>::from_timestamp(ci.build_started, 0) {
                    *builds_by_day.entry(started.date_naive()).or_default() += 1;
                }
            }
        }
    }
    if data.build_stats.success > 0 {
        data.build_stats.avg_time = data.build_stats.total_time / data.build_stats.success as i64;
    }

    rank_recipes(&mut data, &db.ports);
    rank_sizes(&mut data, &db.ports);
    rank_contributors(&mut data, db);
    rank_recent_updates(&mut data, &db.ports);

    data.max_daily = 1;
    let today = now.date_naive();
    for offset in (0..=ACTIVITY_DAYS).rev() {
        let date = today - Duration::days(offset);
        let stat = DailyStat {
            date,
            commits: commits_by_day.get(&date).copied().unwrap_or(0),
            updates: updates_by_day.get(&date).copied().unwrap_or(0),
            builds: builds_by_day.get(&date).copied().unwrap_or(0),
        };
        data.max_daily = data
            .max_daily
            .max(stat.commits)
            .max(stat.updates)
            .max(stat.builds);
        data.daily.push(stat);
    }

    data
}

fn rank_recipes(data: &mut SiteData, ports: &[Arc<Port>]) {
    let mut ranked: Vec<Arc<Port>> = ports.to_vec();
    ranked.sort_by(|a, b| b.recipe_lines.cmp(&a.recipe_lines));
    let top5: usize = ranked.iter().take(5).map(|p| p.recipe_lines).sum();
    if data.total_recipe_lines > 0 {
        data.top5_line_percentage = top5 as f64 / data.total_recipe_lines as f64 * 100.0;
    }
    ranked.truncate(TOP_N);
    data.top_recipes = ranked;
}

fn rank_sizes(data: &mut SiteData, ports: &[Arc<Port>]) {
    let size = |p: &Port| p.ci.as_ref().map_or(0, |ci| ci.size);
    let mut ranked: Vec<Arc<Port>> = ports.iter().filter(|p| size(p) > 0).cloned().collect();
    ranked.sort_by(|a, b| size(b).cmp(&size(a)));
    ranked.truncate(TOP_N);
    data.top_sizes = ranked;
}

fn rank_contributors(data: &mut SiteData, db: &Database) {
    let mut ranked: Vec<Contributor> = db.contributors.values().cloned().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    data.total_commits = ranked.iter().map(|c| u64::from(c.count)).sum();
    data.all_authors = ranked.iter().map(|c| c.name.clone()).collect();
    data.all_authors.sort();
    data.top_contributors = ranked;
}

fn rank_recent_updates(data: &mut SiteData, ports: &[Arc<Port>]) {
    let mut ranked: Vec<Arc<Port>> = ports.to_vec();
    ranked.sort_by(|a, b| b.last_commit_date().cmp(&a.last_commit_date()));
    ranked.truncate(RECENT_UPDATES);
    data.recent_updates = ranked;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CiInfo, Commit};
    use std::collections::BTreeSet;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn commit(id: &str, days_ago: i64) -> Arc<Commit> {
        Arc::new(Commit {
            id: id.into(),
            author: "Jane".into(),
            email: "jane@example.org".into(),
            date: now() - Duration::days(days_ago),
            message: id.into(),
            added: vec![],
            modified: vec![],
            deleted: vec![],
            merge: false,
        })
    }

    fn port(category: &str, name: &str) -> Port {
        Port {
            category: category.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    fn db(ports: Vec<Port>) -> Database {
        Database {
            categories: vec![],
            ports: ports.into_iter().map(Arc::new).collect(),
            recent_commits: vec![],
            contributors: BTreeMap::new(),
            generated_at: now(),
        }
    }

    fn names(ports: &[Arc<Port>]) -> Vec<&str> {
        ports.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn simple_map_first_writer_wins() {
        let mut a = port("net", "curl");
        a.provides = vec!["libcurl".into()];
        let mut b = port("net", "curl-ng");
        b.provides = vec!["libcurl".into(), "curl".into()];
        let data = aggregate(&db(vec![a, b]));
        assert_eq!(data.simple_map["libcurl"].name, "curl");
        assert_eq!(data.simple_map["curl"].name, "curl");
        assert_eq!(data.resolve("curl-ng").unwrap().name, "curl-ng");
        assert_eq!(data.port_map.len(), 2);
    }

    #[test]
    fn counts() {
        let mut broken = port("a", "broken");
        broken.broken = true;
        let mut failed = port("a", "failed");
        failed.ci = Some(CiInfo {
            status: CiStatus::Failed,
            ..Default::default()
        });
        let mut orphan = port("a", "orphan");
        orphan.unmaintained = true;
        let mut fresh = port("a", "fresh");
        fresh.commits = vec![commit("f2", 1), commit("f1", 10)];
        fresh.last_commit = Some(fresh.commits[0].clone());
        let mut old = port("a", "old");
        old.commits = vec![commit("o2", 3), commit("o1", 400)];
        old.last_commit = Some(old.commits[0].clone());

        let data = aggregate(&db(vec![broken, failed, orphan, fresh, old]));
        assert_eq!(data.total_ports, 5);
        assert_eq!(data.broken_count, 2);
        assert_eq!(data.unmaintained_count, 1);
        assert_eq!(data.updated_this_week, 2);
        assert_eq!(data.new_ports, 1);
    }

    #[test]
    fn licenses_split_on_commas() {
        let mut a = port("a", "a");
        a.license = "MIT, Apache-2.0".into();
        let mut b = port("a", "b");
        b.license = "MIT".into();
        let data = aggregate(&db(vec![a, b, port("a", "c")]));
        assert_eq!(data.licenses_by_use(), vec![("MIT", 2), ("Apache-2.0", 1)]);
    }

    #[test]
    fn build_stats_average_success_duration() {
        let with = |status, duration| CiInfo {
            status,
            build_duration: duration,
            ..Default::default()
        };
        let mut a = port("a", "a");
        a.ci = Some(with(CiStatus::Success, 100));
        let mut b = port("a", "b");
        b.ci = Some(with(CiStatus::Success, 50));
        let mut c = port("a", "c");
        c.ci = Some(with(CiStatus::Failed, 999));
        let data = aggregate(&db(vec![a, b, c, port("a", "d")]));
        assert_eq!(
            data.build_stats,
            BuildStats {
                total: 3,
                success: 2,
                failed: 1,
                total_time: 150,
                avg_time: 75,
            }
        );
    }

    #[test]
    fn top_recipes_are_stable_and_report_top5_share() {
        let ports: Vec<Port> = [("a", 10), ("b", 50), ("c", 10), ("d", 30), ("e", 0), ("f", 0)]
            .into_iter()
            .map(|(n, lines)| Port {
                recipe_lines: lines,
                ..port("x", n)
            })
            .collect();
        let data = aggregate(&db(ports));
        assert_eq!(names(&data.top_recipes), vec!["b", "d", "a", "c", "e", "f"]);
        assert_eq!(data.total_recipe_lines, 100);
        assert!((data.top5_line_percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn top_lists_are_capped() {
        let ports: Vec<Port> = (0..15)
            .map(|i| {
                let mut p = port("x", &format!("p{i:02}"));
                p.recipe_lines = i;
                p.ci = Some(CiInfo {
                    size: i as i64,
                    ..Default::default()
                });
                p
            })
            .collect();
        let data = aggregate(&db(ports));
        assert_eq!(data.top_recipes.len(), TOP_N);
        assert_eq!(data.top_recipes[0].name, "p14");
        // p00 has size 0 and is excluded; only the 10 largest remain.
        assert_eq!(data.top_sizes.len(), TOP_N);
        assert_eq!(data.top_sizes[9].name, "p05");
    }

    #[test]
    fn contributors_ranked_by_count() {
        let mut snapshot = db(vec![]);
        for (email, name, count) in [("a@x", "Ann", 2), ("b@x", "Bob", 5), ("c@x", "Cy", 2)] {
            snapshot.contributors.insert(
                email.into(),
                Contributor {
                    name: name.into(),
                    email: email.into(),
                    count,
                    other_names: BTreeSet::new(),
                },
            );
        }
        let data = aggregate(&snapshot);
        let ranked: Vec<&str> = data.top_contributors.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(ranked, vec!["Bob", "Ann", "Cy"]);
        assert_eq!(data.total_commits, 9);
        assert_eq!(data.all_authors, vec!["Ann", "Bob", "Cy"]);
    }

    #[test]
    fn daily_series_spans_61_days_with_running_max() {
        let mut snapshot = db(vec![]);
        snapshot.recent_commits = vec![commit("a", 0), commit("b", 0), commit("c", 2), commit("d", 90)];
        let data = aggregate(&snapshot);
        assert_eq!(data.daily.len(), 61);
        assert_eq!(data.daily.last().unwrap().date, now().date_naive());
        assert_eq!(data.daily.last().unwrap().commits, 2);
        assert_eq!(data.daily[58].commits, 1);
        assert_eq!(data.max_daily, 2);

        let quiet = aggregate(&db(vec![]));
        assert_eq!(quiet.max_daily, 1);
    }

    #[test]
    fn recent_updates_newest_first_without_history_last() {
        let mut a = port("x", "a");
        a.last_commit = Some(commit("a", 5));
        let mut b = port("x", "b");
        b.last_commit = Some(commit("b", 1));
        let data = aggregate(&db(vec![port("x", "none"), a, b]));
        assert_eq!(names(&data.recent_updates), vec!["b", "a", "none"]);
    }
}
