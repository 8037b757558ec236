//! Page rendering.
//!
//! The engine decides *whether* an artifact is written; a [`Renderer`]
//! decides *what* goes in it. [`HtmlRenderer`] is the built-in maud
//! implementation.
//!
//! ## Generated pages
//!
//! - `index.html`: counters, recent updates, latest commits
//! - `categories/index.html` and `categories/<name>/index.html`
//! - `commits/index.html`: the recent-commit feed with changed files
//! - `stats/index.html`: build outcomes, activity, rankings, contributors
//! - `search/index.html`: client-side search over `ports.json`
//! - `ports/<category>/<name>/index.html`: one page per package
//!
//! Every link is relative to the page it appears on, so the output tree can
//! be served under any prefix.

pub mod format;
mod layout;
mod pages;

use crate::aggregate::SiteData;
use crate::config::SiteConfig;
use crate::model::{Category, Database, Port};
use std::io;

/// Template sources folded into the global hash: editing any of them
/// invalidates every page.
pub const TEMPLATE_SOURCES: &[&str] = &[
    include_str!("layout.rs"),
    include_str!("pages.rs"),
    include_str!("format.rs"),
    include_str!("../../static/style.css"),
    include_str!("../../static/search.js"),
];

/// Delimiter between entries of the fortunes text file.
pub const FORTUNE_DELIMITER: &str = "!---";

#[derive(Debug, Clone, Copy)]
pub enum Page<'a> {
    Index,
    Categories,
    Category(&'a Category),
    Commits,
    Stats,
    Search,
    Port(&'a Port),
}

impl Page<'_> {
    /// Output-relative path of the page.
    pub fn path(&self) -> String {
        match self {
            Page::Index => "index.html".to_string(),
            Page::Categories => "categories/index.html".to_string(),
            Page::Category(category) => category.page_path(),
            Page::Commits => "commits/index.html".to_string(),
            Page::Stats => "stats/index.html".to_string(),
            Page::Search => "search/index.html".to_string(),
            Page::Port(port) => port.page_path(),
        }
    }
}

/// Everything a template may read.
pub struct PageContext<'a> {
    pub config: &'a SiteConfig,
    pub db: &'a Database,
    pub site: &'a SiteData,
    pub page: Page<'a>,
    /// Output-relative path being rendered.
    pub path: String,
}

impl<'a> PageContext<'a> {
    pub fn new(config: &'a SiteConfig, db: &'a Database, site: &'a SiteData, page: Page<'a>) -> Self {
        Self {
            config,
            db,
            site,
            path: page.path(),
            page,
        }
    }

    /// Link to an output-relative target from the current page.
    pub fn href(&self, target: &str) -> String {
        format::relative_href(&self.path, target)
    }

    pub fn port_href(&self, port: &Port) -> String {
        self.href(&format!("ports/{}/{}/", port.category, port.name))
    }

    pub fn category_href(&self, name: &str) -> String {
        self.href(&format!("categories/{}/", name))
    }

    /// Asset link: remote and absolute names pass through, local names
    /// resolve under `assets/`.
    pub fn asset_href(&self, name: &str) -> String {
        if name.starts_with('/') || crate::registry::is_remote(name) {
            name.to_string()
        } else {
            self.href(&format!("assets/{}", name))
        }
    }
}

/// Writes the bytes of one page.
pub trait Renderer: Send + Sync {
    fn render(&self, ctx: &PageContext<'_>, out: &mut dyn io::Write) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn render(&self, ctx: &PageContext<'_>, out: &mut dyn io::Write) -> io::Result<()> {
        let markup = match ctx.page {
            Page::Index => pages::index(ctx),
            Page::Categories => pages::categories(ctx),
            Page::Category(category) => pages::category(ctx, category),
            Page::Commits => pages::commits(ctx),
            Page::Stats => pages::stats(ctx),
            Page::Search => pages::search(ctx),
            Page::Port(port) => pages::port(ctx, port),
        };
        out.write_all(markup.into_string().as_bytes())
    }
}

/// Render a page into memory.
pub fn render_to_vec(renderer: &dyn Renderer, ctx: &PageContext<'_>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    renderer.render(ctx, &mut buf)?;
    Ok(buf)
}

/// Split a fortunes file on [`FORTUNE_DELIMITER`], dropping blank entries.
pub fn split_fortunes(text: &str) -> Vec<String> {
    text.split(FORTUNE_DELIMITER)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// `assets/fortunes.js`: picks one entry at random into `#fortune-text`.
pub fn fortunes_script(fortunes: &[String]) -> String {
    // A list of strings always serializes.
    let list = serde_json::to_string(fortunes).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(function(){{var f={list};document.addEventListener('DOMContentLoaded',function(){{\
var b=document.getElementById('fortune-box'),t=document.getElementById('fortune-text');\
if(!b||!t)return;if(!f.length){{b.classList.add('display-none');return;}}\
t.textContent=f[Math.floor(Math.random()*f.length)];}});}})();\n"
    )
}
