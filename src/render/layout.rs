//! Shared page chrome: document head, header navigation, footer.

use super::{Page, PageContext};
use maud::{DOCTYPE, Markup, PreEscaped, html};

const CSS: &str = include_str!("../../static/style.css");

/// Renders the base HTML document structure
pub fn base_document(ctx: &PageContext<'_>, title: &str, content: Markup) -> Markup {
    let config = ctx.config;
    let full_title = if title.is_empty() {
        config.title.clone()
    } else {
        format!("{} | {}", title, config.title)
    };
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                meta name="description" content=(config.description);
                title { (full_title) }
                @if let Some(url) = config.canonical_url(&ctx.path) {
                    link rel="canonical" href=(url);
                }
                @if !config.favicon.is_empty() {
                    link rel="icon" href=(ctx.asset_href(&config.favicon));
                }
                style { (PreEscaped(CSS)) }
                @for css in &config.extra_css {
                    link rel="stylesheet" href=(ctx.asset_href(css));
                }
            }
            body data-base-url=(config.base_url) {
                (site_header(ctx))
                main { (content) }
                (site_footer(ctx))
                @if !config.fortunes.is_empty() {
                    script src=(ctx.asset_href("fortunes.js")) defer {}
                }
                @for js in &config.extra_js {
                    script src=(ctx.asset_href(js)) defer {}
                }
            }
        }
    }
}

fn site_header(ctx: &PageContext<'_>) -> Markup {
    let current = |page: &str| -> Option<&'static str> {
        let active = match ctx.page {
            Page::Index => page == "home",
            Page::Categories | Page::Category(_) => page == "categories",
            Page::Commits => page == "commits",
            Page::Stats => page == "stats",
            Page::Search => page == "search",
            Page::Port(_) => false,
        };
        active.then_some("current")
    };
    html! {
        header.site-header {
            a.site-title href=(ctx.href("")) { (ctx.config.title) }
            nav.site-nav {
                a class=[current("categories")] href=(ctx.href("categories/")) { "Categories" }
                a class=[current("commits")] href=(ctx.href("commits/")) { "Commits" }
                a class=[current("stats")] href=(ctx.href("stats/")) { "Stats" }
                a class=[current("search")] href=(ctx.href("search/")) { "Search" }
            }
            form.search-box action=(ctx.href("search/")) method="get" {
                input type="search" name="q" placeholder="Search packages";
            }
        }
    }
}

fn site_footer(ctx: &PageContext<'_>) -> Markup {
    let config = ctx.config;
    html! {
        footer.site-footer {
            @if !config.fortunes.is_empty() {
                div id="fortune-box" { p id="fortune-text" {} }
            }
            p {
                @if config.footer_url.is_empty() {
                    (config.footer_text)
                } @else {
                    a href=(config.footer_url) { (config.footer_text) }
                }
                @if !config.source_code_url.is_empty() {
                    " · "
                    a href=(config.source_code_url) { "Source" }
                }
            }
            p.generated {
                "Generated " (ctx.db.generated_at.format("%Y-%m-%d %H:%M UTC").to_string())
            }
        }
    }
}
