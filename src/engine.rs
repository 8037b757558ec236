//! The incremental build engine.
//!
//! One [`Engine::run`] moves through `Collecting → Rendering → Finalizing →
//! Idle`:
//!
//! 1. Drain the [`Collector`]'s two channels and its task result in one
//!    `select!` loop, cancellation first.
//! 2. Derive [`SiteData`] and the global and data hashes.
//! 3. Emit the fixed pages and one page per non-empty category.
//! 4. Emit package pages on blocking workers behind a semaphore of
//!    `build.render_workers` permits.
//! 5. Emit `assets/fortunes.js`, copy source assets and sweep stale ones.
//! 6. Emit `ports.json`, `commits.json` and `ci_status.json`.
//! 7. Delete manifested artifacts that were not touched, then save the
//!    manifest.
//!
//! Steps 3 to 7 run on blocking threads. Once the run is cancelled the
//! [`Emitter`] refuses further writes and deletions, even from workers that
//! had already started.
//!
//! Every artifact goes through [`Emitter::emit`]: the path is marked touched,
//! and the bytes are produced and written only when the manifest digest
//! differs or the output file is missing. A failed write is logged and
//! leaves the manifest entry stale, so the next run retries it.

use crate::aggregate::{SiteData, aggregate};
use crate::ci::status_summary;
use crate::collector::{CollectError, Collector, PORT_QUEUE};
use crate::config::SiteConfig;
use crate::digest::Digest;
use crate::hash::{category_hash, content_hash, data_hash, global_hash, page_hash, port_hash};
use crate::manifest::{Manifest, RunReport, write_atomic};
use crate::model::{CiStatus, Database, Port};
use crate::registry::Registry;
use crate::render::{
    Page, PageContext, Renderer, TEMPLATE_SOURCES, fortunes_script, render_to_vec, split_fortunes,
};
use crate::scan::Scanner;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error("collection finished without a site snapshot")]
    MissingAggregate,
    #[error("build cancelled")]
    Cancelled,
    #[error("build worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Collecting,
    Rendering,
    Finalizing,
}

/// Top-level pages rendered on every run.
const FIXED_PAGES: [Page<'static>; 5] = [
    Page::Index,
    Page::Categories,
    Page::Commits,
    Page::Stats,
    Page::Search,
];

pub struct Engine {
    config: Arc<SiteConfig>,
    registry: Arc<Registry>,
    scanner: Arc<dyn Scanner>,
    renderer: Arc<dyn Renderer>,
    state: Mutex<EngineState>,
    ready: Mutex<Option<mpsc::Sender<()>>>,
}

impl Engine {
    pub fn new(
        config: Arc<SiteConfig>,
        registry: Arc<Registry>,
        scanner: Arc<dyn Scanner>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            config,
            registry,
            scanner,
            renderer,
            state: Mutex::new(EngineState::Idle),
            ready: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    fn set_state(&self, state: EngineState) {
        debug!(?state, "engine state");
        *lock(&self.state) = state;
    }

    /// Readiness notifications: at run start, after roughly a tenth of the
    /// package pages, and at run end. The channel holds one pending signal;
    /// further signals are dropped until it is received. Subscribing again
    /// replaces the previous receiver.
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        *lock(&self.ready) = Some(tx);
        rx
    }

    fn ready_sender(&self) -> Option<mpsc::Sender<()>> {
        lock(&self.ready).clone()
    }

    fn signal_ready(&self) {
        if let Some(tx) = self.ready_sender() {
            notify(&tx);
        }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<RunReport, EngineError> {
        self.set_state(EngineState::Collecting);
        self.signal_ready();
        let result = self.build(&ctx).await;
        self.set_state(EngineState::Idle);
        if result.is_ok() {
            self.signal_ready();
        }
        result
    }

    async fn build(&self, ctx: &CancellationToken) -> Result<RunReport, EngineError> {
        let manifest = Manifest::load(&self.registry.manifest_path());
        let global = global_hash(&self.config, TEMPLATE_SOURCES);

        let (ports, db) = self.collect(ctx).await?;
        let site = aggregate(&db);
        let data = data_hash(&site);
        info!(
            ports = ports.len(),
            categories = db.categories.len(),
            commits = db.recent_commits.len(),
            "collected"
        );

        self.set_state(EngineState::Rendering);
        let shared = RunShared {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            renderer: Arc::clone(&self.renderer),
            emitter: Arc::new(Emitter::new(Arc::clone(&self.registry), manifest, ctx.clone())),
            db: Arc::new(db),
            site: Arc::new(site),
            global,
            data,
        };

        let overview = shared.clone();
        run_blocking(ctx, move || overview.emit_overview_pages()).await?;
        self.render_ports(ctx, &shared, &ports).await?;

        self.set_state(EngineState::Finalizing);
        run_blocking(ctx, move || shared.finalize(&ports)).await
    }

    /// Run the collector and drain both of its channels.
    async fn collect(
        &self,
        ctx: &CancellationToken,
    ) -> Result<(Vec<Arc<Port>>, Database), EngineError> {
        let collector = Collector::new(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.scanner),
        );
        let (port_tx, mut port_rx) = mpsc::channel(PORT_QUEUE);
        let (db_tx, mut db_rx) = mpsc::channel(1);
        let mut task = tokio::spawn(collector.stream(ctx.clone(), port_tx, db_tx));

        let mut ports = Vec::new();
        let mut snapshot = None;
        let (mut ports_open, mut db_open, mut task_done) = (true, true, false);
        while ports_open || db_open || !task_done {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    task.abort();
                    return Err(EngineError::Cancelled);
                }
                joined = &mut task, if !task_done => {
                    task_done = true;
                    match joined.map_err(CollectError::from).and_then(|r| r) {
                        Ok(()) => {}
                        Err(CollectError::Cancelled) => return Err(EngineError::Cancelled),
                        Err(e) => return Err(e.into()),
                    }
                }
                port = port_rx.recv(), if ports_open => match port {
                    Some(port) => ports.push(port),
                    None => ports_open = false,
                },
                db = db_rx.recv(), if db_open => match db {
                    Some(db) => snapshot = Some(db),
                    None => db_open = false,
                },
            }
        }
        let db = snapshot.ok_or(EngineError::MissingAggregate)?;
        Ok((ports, db))
    }

    async fn render_ports(
        &self,
        ctx: &CancellationToken,
        shared: &RunShared,
        ports: &[Arc<Port>],
    ) -> Result<(), EngineError> {
        let gate = Arc::new(Semaphore::new(self.config.build.render_workers));
        let threshold = (ports.len() / 10).max(1);
        let rendered = Arc::new(AtomicUsize::new(0));
        let ready = self.ready_sender();
        let mut workers = JoinSet::new();

        for port in ports {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    workers.abort_all();
                    return Err(EngineError::Cancelled);
                }
                permit = Arc::clone(&gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let port = Arc::clone(port);
            let shared = shared.clone();
            let rendered = Arc::clone(&rendered);
            let ready = ready.clone();
            let ctx = ctx.clone();
            workers.spawn_blocking(move || {
                let _permit = permit;
                // Started workers outlive abort_all.
                if ctx.is_cancelled() {
                    return;
                }
                shared.emit_port(&port);
                if rendered.fetch_add(1, Ordering::Relaxed) + 1 == threshold {
                    if let Some(tx) = &ready {
                        notify(tx);
                    }
                }
            });
        }

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    workers.abort_all();
                    return Err(EngineError::Cancelled);
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => warn!(error = %e, "render worker failed"),
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Collect and write `ci_status.json` directly, bypassing the manifest.
    pub async fn write_ci_status(&self, ctx: CancellationToken) -> Result<PathBuf, EngineError> {
        self.set_state(EngineState::Collecting);
        let collected = self.collect(&ctx).await;
        self.set_state(EngineState::Idle);
        let (ports, _) = collected?;

        let registry = Arc::clone(&self.registry);
        run_blocking(&ctx, move || {
            let summary = status_summary(ports.iter().map(|p| p.as_ref()), &registry);
            let path = registry.output_path("ci_status.json");
            let written = serde_json::to_vec(&summary)
                .map_err(io::Error::from)
                .and_then(|bytes| write_atomic(&path, &bytes));
            match written {
                Ok(()) => info!(path = %path.display(), packages = summary.len(), "wrote CI status"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not write CI status"),
            }
            path
        })
        .await
    }
}

/// Run blocking work off the runtime. Cancellation returns at once; the
/// work itself runs to completion, and its writes stop at the [`Emitter`].
async fn run_blocking<T, F>(ctx: &CancellationToken, work: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(EngineError::Cancelled),
        joined = task => Ok(joined?),
    }
}

/// Everything the blocking side of one run reads.
#[derive(Clone)]
struct RunShared {
    config: Arc<SiteConfig>,
    registry: Arc<Registry>,
    renderer: Arc<dyn Renderer>,
    emitter: Arc<Emitter>,
    db: Arc<Database>,
    site: Arc<SiteData>,
    global: Digest,
    data: Digest,
}

impl RunShared {
    fn emit_page(&self, page: Page<'_>, digest: Digest) {
        let path = page.path();
        let page_ctx = PageContext::new(&self.config, &self.db, &self.site, page);
        self.emitter.emit(&path, digest, || {
            render_to_vec(self.renderer.as_ref(), &page_ctx)
        });
    }

    /// Fixed pages and one page per non-empty category.
    fn emit_overview_pages(&self) {
        for page in FIXED_PAGES {
            let digest = page_hash(&self.global, &self.data, &page.path());
            self.emit_page(page, digest);
        }
        for category in self.db.categories.iter().filter(|c| !c.ports.is_empty()) {
            let digest = category_hash(category, &self.global, &self.data);
            self.emit_page(Page::Category(category), digest);
        }
    }

    fn emit_port(&self, port: &Port) {
        let digest = port_hash(port, &self.global, &self.data, &self.site.simple_map);
        self.emit_page(Page::Port(port), digest);
    }

    fn finalize(&self, ports: &[Arc<Port>]) -> RunReport {
        self.write_fortunes();
        self.sync_assets();

        let emitter = &self.emitter;
        emit_json(emitter, "ports.json", &self.global, &search_index(ports));
        emit_json(emitter, "commits.json", &self.global, &self.db.recent_commits);
        let summary = status_summary(ports.iter().map(|p| p.as_ref()), &self.registry);
        emit_json(emitter, "ci_status.json", &self.global, &summary);

        emitter.remove_untouched();
        if emitter.is_cancelled() {
            return emitter.report();
        }
        if let Err(e) = emitter.manifest.save(&self.registry.manifest_path()) {
            warn!(error = %e, "could not save manifest");
        }
        emitter.report()
    }

    fn write_fortunes(&self) {
        let fortunes = &self.config.fortunes;
        if fortunes.is_empty() {
            return;
        }
        let source = if Path::new(fortunes).is_absolute() {
            PathBuf::from(fortunes)
        } else {
            self.registry.asset_source(fortunes)
        };
        let text = match fs::read_to_string(&source) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %source.display(), error = %e, "could not read fortunes file");
                return;
            }
        };
        let entries = split_fortunes(&text);
        if entries.is_empty() {
            return;
        }
        let digest = content_hash(&self.global, text.as_bytes());
        self.emitter.emit("assets/fortunes.js", digest, || {
            Ok(fortunes_script(&entries).into_bytes())
        });
    }

    /// Copy top-level files of the assets directory into `assets/`, then
    /// delete output assets that nothing touched this run.
    fn sync_assets(&self) {
        let emitter = &self.emitter;
        match fs::read_dir(self.registry.assets_root()) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let source = entry.path();
                    if !source.is_file() {
                        continue;
                    }
                    let path = format!("assets/{}", entry.file_name().to_string_lossy());
                    match fs::read(&source) {
                        Ok(bytes) => {
                            let digest = content_hash(&self.global, &bytes);
                            emitter.emit(&path, digest, || Ok(bytes));
                        }
                        Err(e) => {
                            warn!(path = %source.display(), error = %e, "could not read asset");
                            emitter.touch(&path);
                            emitter.fail(&path);
                        }
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.registry.assets_root().display(), "no assets directory");
            }
            Err(e) => warn!(error = %e, "could not list assets"),
        }

        let Ok(entries) = fs::read_dir(self.registry.output_path("assets")) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let path = format!("assets/{}", entry.file_name().to_string_lossy());
            if !emitter.is_touched(&path) {
                emitter.delete(&path);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn notify(tx: &mpsc::Sender<()>) {
    // Full or closed: the signal is dropped.
    let _ = tx.try_send(());
}

// ============================================================================
// Artifact emission
// ============================================================================

/// Per-run write gate shared with the render workers.
struct Emitter {
    registry: Arc<Registry>,
    manifest: Manifest,
    ctx: CancellationToken,
    touched: Mutex<HashSet<String>>,
    report: Mutex<RunReport>,
}

impl Emitter {
    fn new(registry: Arc<Registry>, manifest: Manifest, ctx: CancellationToken) -> Self {
        Self {
            registry,
            manifest,
            ctx,
            touched: Mutex::new(HashSet::new()),
            report: Mutex::new(RunReport::default()),
        }
    }

    fn touch(&self, path: &str) {
        lock(&self.touched).insert(path.to_string());
    }

    fn is_touched(&self, path: &str) -> bool {
        lock(&self.touched).contains(path)
    }

    fn fail(&self, path: &str) {
        lock(&self.report).fail(path);
    }

    fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    fn emit(&self, path: &str, digest: Digest, produce: impl FnOnce() -> io::Result<Vec<u8>>) {
        self.touch(path);
        let target = self.registry.output_path(path);
        if !self.manifest.has_changed(path, &digest) && target.is_file() {
            lock(&self.report).skip();
            return;
        }
        let written = produce().and_then(|bytes| {
            // Nothing lands on disk once the run is cancelled.
            if self.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "build cancelled"));
            }
            write_atomic(&target, &bytes)
        });
        match written {
            Ok(()) => {
                self.manifest.update(path, digest);
                lock(&self.report).write(path);
                debug!(path, "wrote");
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => debug!(path, "skipped, cancelled"),
            Err(e) => {
                warn!(path, error = %e, "could not write artifact");
                self.fail(path);
            }
        }
    }

    /// Remove an artifact from disk and from the manifest. The entry stays
    /// when the file exists but cannot be removed.
    fn delete(&self, path: &str) {
        if self.is_cancelled() {
            return;
        }
        let target = self.registry.output_path(path);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path, error = %e, "could not delete stale artifact");
                return;
            }
        }
        self.manifest.remove(path);
        lock(&self.report).remove(path);
        debug!(path, "removed");
        prune_empty_dirs(&target, self.registry.output_root());
    }

    fn remove_untouched(&self) {
        for path in self.manifest.paths() {
            if !self.is_touched(&path) {
                self.delete(&path);
            }
        }
    }

    fn report(&self) -> RunReport {
        lock(&self.report).clone()
    }
}

/// Remove now-empty parent directories of `file`, stopping at `root`.
fn prune_empty_dirs(file: &Path, root: &Path) {
    let mut dir = file.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

fn emit_json<T: Serialize + ?Sized>(emitter: &Emitter, path: &str, global: &Digest, value: &T) {
    match serde_json::to_vec(value) {
        Ok(bytes) => emitter.emit(path, content_hash(global, &bytes), || Ok(bytes)),
        Err(e) => {
            warn!(path, error = %e, "could not serialize export");
            emitter.touch(path);
            emitter.fail(path);
        }
    }
}

// ============================================================================
// Search index
// ============================================================================

/// One `ports.json` entry. Keys are short to keep the index small; empty
/// values are omitted.
#[derive(Debug, Serialize, PartialEq)]
pub struct SearchEntry {
    pub n: String,
    pub c: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub d: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub v: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub l: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pds: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dps: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub br: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub un: bool,
    /// Unix time of the last commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub a: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub st: Option<CiStatus>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl From<&Port> for SearchEntry {
    fn from(port: &Port) -> Self {
        Self {
            n: port.name.clone(),
            c: port.category.clone(),
            d: port.description.clone(),
            v: port.version.clone(),
            l: port.license.clone(),
            pds: port.provides.clone(),
            dps: port.deps.iter().map(|d| d.name.clone()).collect(),
            br: port.broken,
            un: port.unmaintained,
            dt: port.last_commit_date().map(|d| d.timestamp()),
            a: port.maintainer.clone(),
            st: port.ci_status(),
        }
    }
}

pub fn search_index(ports: &[Arc<Port>]) -> Vec<SearchEntry> {
    ports.iter().map(|p| SearchEntry::from(p.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HtmlRenderer;
    use crate::scan::scanner_for;
    use crate::test_helpers::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Site {
        tmp: TempDir,
        engine: Engine,
    }

    impl Site {
        fn root(&self) -> &Path {
            self.tmp.path()
        }

        fn ports(&self) -> PathBuf {
            self.root().join("ports")
        }

        fn out(&self, rel: &str) -> PathBuf {
            self.root().join("public").join(rel)
        }

        async fn build(&self) -> RunReport {
            self.engine.run(CancellationToken::new()).await.unwrap()
        }
    }

    fn site(configure: impl FnOnce(&Path, &mut SiteConfig)) -> Site {
        site_with(Arc::new(HtmlRenderer), configure)
    }

    fn site_with(
        renderer: Arc<dyn Renderer>,
        configure: impl FnOnce(&Path, &mut SiteConfig),
    ) -> Site {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let path = |rel: &str| root.join(rel).to_string_lossy().into_owned();
        let mut config = SiteConfig {
            ports_path: path("ports"),
            out_dir: path("public"),
            cache_dir: path("cache"),
            assets_dir: path("assets"),
            ..SiteConfig::default()
        };
        write_port(&root.join("ports"), "net", "ok", "version: 1.0\ndescription: fine", "");
        write_port(&root.join("ports"), "net", "broken", "version: 2.0", "");
        write_port(&root.join("ports"), "libs", "base", "version: 0.1", "");
        configure(root, &mut config);

        let config = Arc::new(config);
        let registry = Arc::new(Registry::new(&config));
        let scanner = scanner_for(&config.package_manager, Arc::clone(&registry)).unwrap();
        let engine = Engine::new(config, registry, scanner, renderer);
        Site { tmp, engine }
    }

    /// Adds `count` packages to the `extra` category.
    fn more_ports(root: &Path, count: usize) {
        for i in 0..count {
            write_port(&root.join("ports"), "extra", &format!("p{i:02}"), "version: 1", "");
        }
    }

    fn is_port_page(ctx: &PageContext<'_>) -> bool {
        matches!(ctx.page, Page::Port(_))
    }

    /// Holds each package page briefly and records the most rendered at once.
    #[derive(Default)]
    struct PeakRenderer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Renderer for PeakRenderer {
        fn render(&self, ctx: &PageContext<'_>, out: &mut dyn io::Write) -> io::Result<()> {
            if is_port_page(ctx) {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            HtmlRenderer.render(ctx, out)
        }
    }

    /// Lets package pages through only while fewer than `allowed` have
    /// started.
    #[derive(Default)]
    struct HeldRenderer {
        started: AtomicUsize,
        allowed: AtomicUsize,
    }

    impl Renderer for HeldRenderer {
        fn render(&self, ctx: &PageContext<'_>, out: &mut dyn io::Write) -> io::Result<()> {
            if is_port_page(ctx) {
                let n = self.started.fetch_add(1, Ordering::SeqCst);
                while n >= self.allowed.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            HtmlRenderer.render(ctx, out)
        }
    }

    /// Cancels the run from inside the first package page it renders.
    struct CancellingRenderer {
        ctx: CancellationToken,
    }

    impl Renderer for CancellingRenderer {
        fn render(&self, ctx: &PageContext<'_>, out: &mut dyn io::Write) -> io::Result<()> {
            if is_port_page(ctx) {
                self.ctx.cancel();
            }
            HtmlRenderer.render(ctx, out)
        }
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    // =========================================================================
    // Incremental behavior
    // =========================================================================

    #[tokio::test]
    async fn first_run_writes_the_whole_site() {
        let s = site(|_, _| {});
        let report = s.build().await;
        for rel in [
            "index.html",
            "categories/index.html",
            "categories/net/index.html",
            "categories/libs/index.html",
            "commits/index.html",
            "stats/index.html",
            "search/index.html",
            "ports/net/ok/index.html",
            "ports/net/broken/index.html",
            "ports/libs/base/index.html",
            "ports.json",
            "commits.json",
            "ci_status.json",
        ] {
            assert!(report.written.contains(rel), "{rel} not written");
            assert!(s.out(rel).is_file(), "{rel} missing");
        }
        assert!(report.failed.is_empty());
        assert!(s.root().join("cache/manifest.json").is_file());
        assert_eq!(s.engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let s = site(|_, _| {});
        s.build().await;
        let report = s.build().await;
        assert!(report.is_noop(), "{report}");
        assert_eq!(report.unchanged as usize, report.total());
    }

    #[tokio::test]
    async fn editing_one_package_rewrites_only_its_pages() {
        let s = site(|_, _| {});
        s.build().await;
        write_port(&s.ports(), "net", "broken", "version: 2.1", "");
        let report = s.build().await;

        assert!(report.written.contains("ports/net/broken/index.html"));
        assert!(report.written.contains("categories/net/index.html"));
        assert!(report.written.contains("ports.json"));
        assert!(!report.written.iter().any(|p| p.starts_with("ports/net/ok/")));
        assert!(!report.written.contains("ports/libs/base/index.html"));
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn dependency_change_rewrites_dependents() {
        let s = site(|root, _| {
            write_port(&root.join("ports"), "net", "ok", "version: 1.0", "base");
        });
        s.build().await;
        write_port(&s.ports(), "libs", "base", "version: 0.2", "");
        let report = s.build().await;
        assert!(report.written.contains("ports/libs/base/index.html"));
        assert!(report.written.contains("ports/net/ok/index.html"));
        assert!(!report.written.contains("ports/net/broken/index.html"));
    }

    #[tokio::test]
    async fn removed_package_is_cleaned_up() {
        let s = site(|_, _| {});
        s.build().await;
        fs::remove_dir_all(s.ports().join("net/broken")).unwrap();
        let report = s.build().await;

        assert!(report.removed.contains("ports/net/broken/index.html"));
        assert!(!s.out("ports/net/broken/index.html").exists());
        assert!(!s.out("ports/net/broken").exists());
        assert!(s.out("ports/net/ok/index.html").is_file());

        let manifest = Manifest::load(&s.root().join("cache/manifest.json"));
        assert!(manifest.get("ports/net/broken/index.html").is_none());
    }

    #[tokio::test]
    async fn deleted_output_is_rewritten() {
        let s = site(|_, _| {});
        s.build().await;
        fs::remove_file(s.out("stats/index.html")).unwrap();
        let report = s.build().await;
        assert_eq!(
            report.written,
            BTreeSet::from(["stats/index.html".to_string()])
        );
    }

    // =========================================================================
    // Exports
    // =========================================================================

    #[tokio::test]
    async fn search_index_omits_empty_fields() {
        let s = site(|_, _| {});
        s.build().await;
        let index = read_json(&s.out("ports.json"));
        let entries = index.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        let ok = entries.iter().find(|e| e["n"] == "ok").unwrap();
        assert_eq!(ok["c"], "net");
        assert_eq!(ok["v"], "1.0");
        assert_eq!(ok["d"], "fine");
        assert!(ok.get("br").is_none());
        assert!(ok.get("dt").is_none());
        assert!(ok.get("st").is_none());
        let raw = fs::read_to_string(s.out("ports.json")).unwrap();
        assert!(!raw.contains('\n'));
    }

    #[tokio::test]
    async fn ci_status_reflects_outputs_on_disk() {
        let s = site(|root, config| {
            write_file(
                root,
                "ci.json",
                r#"{"net/ok": {"status": "success"}, "net/broken": {"status": "failed"}}"#,
            );
            config.metadata.ci_status = root.join("ci.json").to_string_lossy().into_owned();
        });
        s.build().await;
        let summary: BTreeMap<String, crate::model::CiInfo> =
            serde_json::from_value(read_json(&s.out("ci_status.json"))).unwrap();
        assert_eq!(summary["net/ok"].status, CiStatus::Success);
        assert_eq!(summary["net/broken"].status, CiStatus::Failed);
        assert_eq!(summary["libs/base"].status, CiStatus::Success);
    }

    #[tokio::test]
    async fn ci_status_without_output_is_failed() {
        let s = site(|root, config| {
            write_file(root, "ci.json", r#"{"net/ok": {"status": "success"}}"#);
            config.metadata.ci_status = root.join("ci.json").to_string_lossy().into_owned();
        });
        let path = s.engine.write_ci_status(CancellationToken::new()).await.unwrap();
        let summary = read_json(&path);
        assert_eq!(summary["net/ok"]["status"], "failed");
    }

    // =========================================================================
    // Assets
    // =========================================================================

    #[tokio::test]
    async fn assets_are_synced_and_swept() {
        let s = site(|root, config| {
            write_file(root, "assets/logo.svg", "<svg/>");
            write_file(root, "assets/quotes.txt", "one\n!---\ntwo\n");
            config.fortunes = "quotes.txt".into();
        });
        let report = s.build().await;
        assert!(report.written.contains("assets/logo.svg"));
        assert!(report.written.contains("assets/fortunes.js"));
        let js = fs::read_to_string(s.out("assets/fortunes.js")).unwrap();
        assert!(js.contains(r#"["one","two"]"#));

        fs::remove_file(s.root().join("assets/logo.svg")).unwrap();
        fs::write(s.out("assets/stray.css"), "x").unwrap();
        let report = s.build().await;
        assert!(report.removed.contains("assets/logo.svg"));
        assert!(report.removed.contains("assets/stray.css"));
        assert!(!s.out("assets/logo.svg").exists());
        assert!(s.out("assets/fortunes.js").is_file());
    }

    // =========================================================================
    // Failure and signalling
    // =========================================================================

    #[tokio::test]
    async fn missing_ports_tree_fails_the_run() {
        let s = site(|root, config| {
            config.ports_path = root.join("absent").to_string_lossy().into_owned();
        });
        let err = s.engine.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Collect(CollectError::Scan(_))));
        assert!(!s.out("index.html").exists());
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let s = site(|_, _| {});
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = s.engine.run(ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(!s.out("index.html").exists());
        assert_eq!(s.engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn readiness_never_blocks_and_coalesces() {
        let s = site(|_, _| {});
        let mut ready = s.engine.subscribe();
        s.build().await;
        // Start, threshold and end signals collapse into the single slot.
        assert!(ready.try_recv().is_ok());
        assert!(ready.try_recv().is_err());

        drop(ready);
        s.build().await;
    }

    #[tokio::test]
    async fn failed_write_is_retried_next_run() {
        let s = site(|root, _| {
            write_port(&root.join("ports"), "net", "bad", "version: 1.0", "");
            // A directory where the page should go makes the rename fail.
            fs::create_dir_all(root.join("public/ports/net/bad/index.html")).unwrap();
        });
        let report = s.build().await;
        assert_eq!(
            report.failed,
            BTreeSet::from(["ports/net/bad/index.html".to_string()])
        );
        assert!(report.written.contains("ports/net/ok/index.html"));
        assert!(report.written.contains("index.html"));
        assert!(report.written.contains("ports.json"));
        let manifest = Manifest::load(&s.root().join("cache/manifest.json"));
        assert!(manifest.get("ports/net/bad/index.html").is_none());
        assert!(manifest.get("ports/net/ok/index.html").is_some());

        fs::remove_dir(s.out("ports/net/bad/index.html")).unwrap();
        let report = s.build().await;
        assert!(report.failed.is_empty());
        assert!(report.written.contains("ports/net/bad/index.html"));
        assert!(!report.written.contains("ports/net/ok/index.html"));
        assert!(s.out("ports/net/bad/index.html").is_file());
    }

    #[tokio::test]
    async fn cancellation_during_rendering_stops_writes() {
        let token = CancellationToken::new();
        let renderer = Arc::new(CancellingRenderer { ctx: token.clone() });
        let s = site_with(renderer, |_, config| config.build.render_workers = 1);

        let err = s.engine.run(token).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        // Give the worker that was mid-render time to finish.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(s.out("index.html").is_file());
        assert!(!s.out("ports").exists());
        assert!(!s.root().join("cache/manifest.json").exists());
    }

    #[tokio::test]
    async fn readiness_fires_partway_through_rendering() {
        let renderer = Arc::new(HeldRenderer::default());
        let s = site_with(renderer.clone(), |root, _| more_ports(root, 20));
        let mut ready = s.engine.subscribe();

        let observe = async {
            assert!(ready.recv().await.is_some());
            // 23 packages: the threshold is 23 / 10 = 2.
            renderer.allowed.store(2, Ordering::SeqCst);
            let mid = tokio::time::timeout(Duration::from_secs(10), ready.recv()).await;
            let state = s.engine.state();
            renderer.allowed.store(usize::MAX, Ordering::SeqCst);
            (mid, state)
        };
        let (result, (mid, state)) = tokio::join!(s.engine.run(CancellationToken::new()), observe);

        assert!(matches!(mid, Ok(Some(()))), "no signal while pages were held");
        assert_eq!(state, EngineState::Rendering);
        assert_eq!(renderer.started.load(Ordering::SeqCst), 23);
        result.unwrap();
        assert!(ready.try_recv().is_ok());
    }

    #[tokio::test]
    async fn render_workers_bound_concurrent_pages() {
        let renderer = Arc::new(PeakRenderer::default());
        let s = site_with(renderer.clone(), |root, config| {
            more_ports(root, 20);
            config.build.render_workers = 2;
        });
        let report = s.build().await;

        let pages = report.written.iter().filter(|p| p.starts_with("ports/")).count();
        assert_eq!(pages, 23);
        let peak = renderer.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "{peak} pages rendered at once");
    }

    #[tokio::test]
    async fn single_worker_still_renders_everything() {
        let s = site(|_, config| config.build.render_workers = 1);
        let report = s.build().await;
        assert!(report.written.contains("ports/libs/base/index.html"));
        assert!(report.written.contains("ports/net/ok/index.html"));
    }
}
