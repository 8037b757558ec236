//! Rebuild on change.
//!
//! [`WatchLoop`] consumes filesystem events on a single task. A relevant
//! event (re)arms a debounce timer; only the timer firing triggers work, so a
//! burst of saves produces one rebuild. Events arriving during a rebuild
//! queue up and arm the timer again once it finishes.
//!
//! In a development checkout (`Cargo.toml` next to `src/`) a fire recompiles
//! the binary and replaces the running process with it instead.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::convert::Infallible;
use std::env;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// Buffered events between the notify thread and the loop.
const EVENT_QUEUE: usize = 256;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("`cargo build` exited with {0}")]
    Build(std::process::ExitStatus),
}

/// What the loop does after a fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct WatchLoop {
    debounce: Duration,
    ignored: Vec<PathBuf>,
}

impl WatchLoop {
    /// Events under any of `ignored` never arm the timer.
    pub fn new(debounce: Duration, ignored: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            debounce,
            ignored: ignored.into_iter().map(|p| absolute(&p)).collect(),
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored.iter().any(|root| path.starts_with(root))
            || path.components().any(|c| c.as_os_str() == ".git")
            || path.extension().is_some_and(|ext| ext == "tmp")
    }

    pub fn is_relevant(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event.paths.iter().any(|p| !self.is_ignored(p))
    }

    /// Run until `events` closes or `on_fire` returns [`Flow::Stop`].
    /// Returns the number of fires.
    pub async fn run<F, Fut>(&self, mut events: mpsc::Receiver<Event>, mut on_fire: F) -> usize
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Flow>,
    {
        let timer = sleep_until(Instant::now());
        tokio::pin!(timer);
        let mut armed = false;
        let mut fires = 0;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) if self.is_relevant(&event) => {
                        debug!(paths = ?event.paths, "change");
                        timer.as_mut().reset(Instant::now() + self.debounce);
                        armed = true;
                    }
                    Some(_) => {}
                    None => break,
                },
                () = &mut timer, if armed => {
                    armed = false;
                    fires += 1;
                    info!("changes detected, rebuilding");
                    if on_fire().await == Flow::Stop {
                        break;
                    }
                }
            }
        }
        fires
    }
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// A source checkout of this program.
pub fn is_development_tree(dir: &Path) -> bool {
    dir.join("Cargo.toml").is_file() && dir.join("src").is_dir()
}

/// Recompile with cargo, then replace the current process with the new
/// binary, keeping arguments and environment. Only returns on failure.
pub fn rebuild_and_restart(project: &Path) -> Result<Infallible, WatchError> {
    let exe = env::current_exe()?;
    let mut build = Command::new("cargo");
    build.arg("build").current_dir(project);
    if !cfg!(debug_assertions) {
        build.arg("--release");
    }
    let status = build.status()?;
    if !status.success() {
        return Err(WatchError::Build(status));
    }
    info!(exe = %exe.display(), "restarting");
    Err(replace_process(&exe).into())
}

#[cfg(unix)]
fn replace_process(exe: &Path) -> io::Error {
    use std::os::unix::process::CommandExt;
    Command::new(exe).args(env::args_os().skip(1)).exec()
}

#[cfg(not(unix))]
fn replace_process(exe: &Path) -> io::Error {
    match Command::new(exe).args(env::args_os().skip(1)).status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => e,
    }
}

/// Watch `roots` recursively (missing roots are skipped). The returned
/// watcher must be kept alive for events to flow.
pub fn spawn_fs_watcher(
    roots: &[PathBuf],
) -> Result<(RecommendedWatcher, mpsc::Receiver<Event>), WatchError> {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            // Closed receiver: the loop has stopped.
            let _ = tx.blocking_send(event);
        }
        Err(e) => warn!(error = %e, "watch error"),
    })?;
    for root in roots {
        if root.exists() {
            watcher.watch(root, RecursiveMode::Recursive)?;
            debug!(path = %root.display(), "watching");
        } else {
            warn!(path = %root.display(), "not watching missing path");
        }
    }
    Ok((watcher, rx))
}
