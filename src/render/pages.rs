use super::format::{contributor_tooltip, format_bytes, format_duration, time_ago};
use super::layout::base_document;
use super::PageContext;
use crate::model::{Category, CiStatus, Commit, DepKind, Port, PortKey};
use maud::{Markup, PreEscaped, html};
use pulldown_cmark::{Parser, html as md_html};
use std::collections::BTreeSet;
use std::sync::Arc;

const SEARCH_JS: &str = include_str!("../../static/search.js");

/// Commits shown on the home page.
const HOME_COMMITS: usize = 10;

// ============================================================================
// Components
// ============================================================================

fn counter(label: &str, value: usize) -> Markup {
    html! {
        div.counter {
            span.counter-value { (value) }
            span.counter-label { (label) }
        }
    }
}

fn status_badge(status: Option<CiStatus>, broken: bool) -> Markup {
    let status = match status {
        Some(s) => s,
        None if broken => CiStatus::Broken,
        None => return html! {},
    };
    html! { span class={ "badge badge-" (status.as_str()) } { (status.as_str()) } }
}

fn port_table(ctx: &PageContext<'_>, ports: &[Arc<Port>]) -> Markup {
    let now = ctx.db.generated_at;
    html! {
        table.port-table {
            thead { tr { th { "Package" } th { "Version" } th { "Description" } th { "Updated" } } }
            tbody {
                @for port in ports {
                    tr {
                        td {
                            a href=(ctx.port_href(port)) { (port.category) "/" (port.name) }
                            " " (status_badge(port.ci_status(), port.broken))
                        }
                        td { (port.version) }
                        td { (port.description) }
                        td {
                            @match port.last_commit_date() {
                                Some(date) => { (time_ago(date, now)) }
                                None => { "-" }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Packages touched by a commit that exist in this site.
fn touched_ports<'a>(ctx: &'a PageContext<'_>, commit: &Commit) -> Vec<&'a Arc<Port>> {
    let keys: BTreeSet<PortKey> = commit
        .added
        .iter()
        .chain(&commit.modified)
        .chain(&commit.deleted)
        .filter_map(|path| PortKey::from_repo_path(path))
        .collect();
    keys.iter()
        .filter_map(|key| ctx.site.port_map.get(&key.to_string()))
        .collect()
}

fn commit_list<'a>(
    ctx: &PageContext<'_>,
    commits: impl IntoIterator<Item = &'a Arc<Commit>>,
    with_files: bool,
) -> Markup {
    let now = ctx.db.generated_at;
    html! {
        ul.commit-list {
            @for commit in commits {
                li.commit {
                    div.commit-head {
                        code.commit-id title=(commit.id) { (commit.short_id()) }
                        " "
                        span.commit-summary { (commit.summary()) }
                        @if commit.merge { " " span.badge { "merge" } }
                    }
                    div.commit-meta {
                        span.commit-author title=(commit.email) { (commit.author) }
                        " · "
                        time datetime=(commit.date.to_rfc3339()) { (time_ago(commit.date, now)) }
                        @for port in touched_ports(ctx, commit) {
                            " · "
                            a href=(ctx.port_href(port)) { (port.category) "/" (port.name) }
                        }
                    }
                    @if with_files {
                        ul.commit-files {
                            @for path in &commit.added { li.added { "A " (path) } }
                            @for path in &commit.modified { li.modified { "M " (path) } }
                            @for path in &commit.deleted { li.deleted { "D " (path) } }
                        }
                    }
                }
            }
        }
    }
}

fn ranked_ports(ctx: &PageContext<'_>, ports: &[Arc<Port>], value: impl Fn(&Port) -> String) -> Markup {
    html! {
        ol.ranking {
            @for port in ports {
                li {
                    a href=(ctx.port_href(port)) { (port.name) }
                    " " span.rank-value { (value(port.as_ref())) }
                }
            }
        }
    }
}

fn markdown(text: &str) -> Markup {
    let mut out = String::new();
    md_html::push_html(&mut out, Parser::new(text));
    PreEscaped(out)
}

// ============================================================================
// Pages
// ============================================================================

pub fn index(ctx: &PageContext<'_>) -> Markup {
    let site = ctx.site;
    let content = html! {
        section.hero {
            h1 { (ctx.config.title) }
            p { (ctx.config.description) }
        }
        section.counters {
            (counter("Packages", site.total_ports))
            (counter("Categories", ctx.db.categories.len()))
            (counter("Broken", site.broken_count))
            (counter("Unmaintained", site.unmaintained_count))
            (counter("Updated this week", site.updated_this_week))
            (counter("New this month", site.new_ports))
        }
        section {
            h2 { "Recent updates" }
            (port_table(ctx, &site.recent_updates))
        }
        section {
            h2 { "Latest commits" }
            (commit_list(ctx, ctx.db.recent_commits.iter().take(HOME_COMMITS), false))
            p { a href=(ctx.href("commits/")) { "All recent commits" } }
        }
    };
    base_document(ctx, "", content)
}

pub fn categories(ctx: &PageContext<'_>) -> Markup {
    let content = html! {
        h1 { "Categories" }
        ul.category-list {
            @for category in &ctx.db.categories {
                li {
                    a href=(ctx.category_href(&category.name)) { (category.name) }
                    " " span.count { "(" (category.ports.len()) ")" }
                }
            }
        }
    };
    base_document(ctx, "Categories", content)
}

pub fn category(ctx: &PageContext<'_>, category: &Category) -> Markup {
    let content = html! {
        nav.breadcrumb {
            a href=(ctx.href("categories/")) { "Categories" }
            " › "
            (category.name)
        }
        h1 { (category.name) }
        (port_table(ctx, &category.ports))
    };
    base_document(ctx, &category.name, content)
}

pub fn commits(ctx: &PageContext<'_>) -> Markup {
    let content = html! {
        h1 { "Recent commits" }
        (commit_list(ctx, &ctx.db.recent_commits, true))
    };
    base_document(ctx, "Commits", content)
}

pub fn stats(ctx: &PageContext<'_>) -> Markup {
    let site = ctx.site;
    let builds = &site.build_stats;
    let bar = |value: usize| format!("height: {}%", value * 100 / site.max_daily);
    let content = html! {
        h1 { "Statistics" }
        section.counters {
            (counter("Packages", site.total_ports))
            (counter("Builds", builds.total))
            (counter("Succeeded", builds.success))
            (counter("Failed", builds.failed))
            (counter("Commits", site.total_commits as usize))
            (counter("Contributors", site.top_contributors.len()))
        }
        @if builds.success > 0 {
            p {
                "Average build time " (format_duration(builds.avg_time))
                ", total " (format_duration(builds.total_time)) "."
            }
        }
        section {
            h2 { "Activity, last 60 days" }
            div.activity {
                @for day in &site.daily {
                    div.day title={ (day.date) ": " (day.commits) " commits, " (day.updates) " updates, " (day.builds) " builds" } {
                        span.bar.commits style=(bar(day.commits)) {}
                        span.bar.updates style=(bar(day.updates)) {}
                        span.bar.builds style=(bar(day.builds)) {}
                    }
                }
            }
        }
        section.columns {
            div {
                h2 { "Largest recipes" }
                p { "The top 5 hold " (format!("{:.1}", site.top5_line_percentage)) "% of " (site.total_recipe_lines) " lines." }
                (ranked_ports(ctx, &site.top_recipes, |p| format!("{} lines", p.recipe_lines)))
            }
            div {
                h2 { "Largest packages" }
                (ranked_ports(ctx, &site.top_sizes, |p| {
                    format_bytes(p.ci.as_ref().map_or(0, |ci| ci.size))
                }))
            }
            div {
                h2 { "Licenses" }
                table.licenses {
                    @for (license, count) in site.licenses_by_use() {
                        tr {
                            td { a href={ (ctx.href("search/")) "?lic=" (license) } { (license) } }
                            td { (count) }
                        }
                    }
                }
            }
        }
        section {
            h2 { "Contributors" }
            ol.contributors {
                @for contributor in &site.top_contributors {
                    li title=(contributor_tooltip(contributor)) {
                        (contributor.name) " " span.count { (contributor.count) }
                    }
                }
            }
        }
    };
    base_document(ctx, "Stats", content)
}

pub fn search(ctx: &PageContext<'_>) -> Markup {
    let content = html! {
        h1 { "Search" }
        div id="search-app" data-ports-url=(ctx.href("ports.json")) data-root=(ctx.href("")) {
            form id="advanced-search-form" {
                input type="search" name="q" placeholder="name, description, category:net, license:MIT";
                select name="cat" {
                    option value="" { "Category" }
                    @for category in &ctx.db.categories {
                        option value=(category.name) { (category.name) }
                    }
                }
                select name="lic" {
                    option value="" { "License" }
                    @for license in ctx.site.licenses.keys() {
                        option value=(license) { (license) }
                    }
                }
            }
            div id="search-results" {}
        }
        script { (PreEscaped(SEARCH_JS)) }
    };
    base_document(ctx, "Search", content)
}

pub fn port(ctx: &PageContext<'_>, port: &Port) -> Markup {
    let now = ctx.db.generated_at;
    let deps_of = |kind: DepKind| port.deps.iter().filter(move |d| d.kind == kind);
    let content = html! {
        nav.breadcrumb {
            a href=(ctx.href("categories/")) { "Categories" }
            " › "
            a href=(ctx.category_href(&port.category)) { (port.category) }
            " › "
            (port.name)
        }
        header.port-header {
            h1 { (port.name) " " span.version { (port.version) @if !port.release.is_empty() { "-" (port.release) } } }
            (status_badge(port.ci_status(), port.broken))
            @if port.unmaintained { " " span.badge.badge-unmaintained { "unmaintained" } }
            p.description { (port.description) }
        }
        dl.port-meta {
            @if !port.license.is_empty() { dt { "License" } dd { (port.license) } }
            @if !port.upstream.is_empty() { dt { "Upstream" } dd { a href=(port.upstream) { (port.upstream) } } }
            dt { "Maintainer" }
            dd { @if port.unmaintained { "none" } @else { (port.maintainer) } }
            @if !port.provides.is_empty() { dt { "Provides" } dd { (port.provides.join(", ")) } }
            @if let Some(commit) = &port.last_commit {
                dt { "Last change" }
                dd { (time_ago(commit.date, now)) " by " (commit.author) }
            }
            dt { "Recipe" } dd { (port.recipe_lines) " lines" }
        }
        @if !port.deps.is_empty() {
            section.dependencies {
                h2 { "Dependencies" }
                @for (kind, label) in [(DepKind::Build, "Build"), (DepKind::Run, "Runtime"), (DepKind::Link, "Link")] {
                    @let deps: Vec<_> = deps_of(kind).collect();
                    @if !deps.is_empty() {
                        h3 { (label) }
                        ul.deps {
                            @for dep in deps {
                                li {
                                    @match ctx.site.resolve(&dep.name) {
                                        Some(target) => { a href=(ctx.port_href(target)) { (dep.name) } }
                                        None => { span.unresolved { (dep.name) } }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        @if let Some(ci) = &port.ci {
            section.ci {
                h2 { "Build" }
                dl {
                    dt { "Status" } dd { (ci.status.as_str()) }
                    @if ci.build_duration > 0 { dt { "Duration" } dd { (format_duration(ci.build_duration)) } }
                    @if ci.size > 0 { dt { "Package size" } dd { (format_bytes(ci.size)) } }
                    @if ci.installed_size > 0 { dt { "Installed size" } dd { (format_bytes(ci.installed_size)) } }
                    @if ci.deps_size > 0 { dt { "With dependencies" } dd { (format_bytes(ci.deps_size)) } }
                    @if ci.deps_installed_size > 0 { dt { "Installed with dependencies" } dd { (format_bytes(ci.deps_installed_size)) } }
                    @if !ci.builder_info.is_empty() { dt { "Builder" } dd { (ci.builder_info) } }
                    @if !ci.build_log.is_empty() { dt { "Log" } dd { a href=(ci.build_log) { "build log" } } }
                }
            }
        }
        @if !port.packages.is_empty() {
            section.packages {
                h2 { "Binary packages" }
                ul {
                    @for pkg in &port.packages {
                        li { (pkg.filename) " " span.size { (format_bytes(pkg.size as i64)) } }
                    }
                }
            }
        }
        @if !port.commits.is_empty() {
            section.history {
                h2 { "History" }
                (commit_list(ctx, &port.commits, false))
            }
        }
        @if let Some(readme) = &port.readme {
            section.readme { (markdown(readme)) }
        }
    };
    base_document(ctx, &format!("{}/{}", port.category, port.name), content)
}
