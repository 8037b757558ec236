use clap::{Parser, Subcommand};
use portsite::config::{self, SiteConfig};
use portsite::engine::{Engine, EngineError};
use portsite::registry::Registry;
use portsite::render::HtmlRenderer;
use portsite::watch::{self, Flow, WatchLoop};
use portsite::{output, scan};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    if env!("PORTSITE_RELEASE") == "true" {
        return env!("CARGO_PKG_VERSION");
    }
    match env!("PORTSITE_GIT_HASH") {
        "" => "dev@unknown",
        // Leaked once at startup
        hash => Box::leak(format!("dev@{hash}").into_boxed_str()),
    }
}

#[derive(Parser)]
#[command(name = "portsite")]
#[command(about = "Incremental documentation site generator for ports trees")]
#[command(long_about = "\
Incremental documentation site generator for ports trees

Reads a tree of package recipes, its git history, CI results and built
artifacts, and writes a static site. Only pages whose inputs changed are
rewritten; pages for removed packages are deleted.

Ports tree layout:

  ports/
  ├── net/                 # Category
  │   ├── curl/            # Package
  │   │   ├── info         # version, description, license, upstream, ...
  │   │   ├── deps         # one dependency per line: .build >run /link
  │   │   ├── ndmake.sh    # recipe
  │   │   ├── README.md    # optional, shown on the package page
  │   │   └── BROKEN       # optional marker
  │   └── wget/
  └── libs/

Run 'portsite gen-config' to print a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (optional)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Ports tree root
    #[arg(long, global = true)]
    ports: Option<String>,

    /// Output directory
    #[arg(long, global = true)]
    out: Option<String>,

    /// CI status source: a path or an http(s) URL
    #[arg(long = "ci-status", global = true)]
    ci_status: Option<String>,

    /// Site title
    #[arg(long, global = true)]
    title: Option<String>,

    /// Site description
    #[arg(long, global = true)]
    description: Option<String>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Build the site once (the default)
    Build {
        /// Keep watching and rebuild on change
        #[arg(long)]
        watch: bool,
    },
    /// Build, then rebuild whenever the ports tree, assets or config change
    Watch,
    /// Write ci_status.json only
    CiStatus,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

impl Cli {
    /// Command-line values as a TOML overlay on the config file.
    fn overrides(&self) -> toml::Value {
        let mut table = toml::Table::new();
        let mut set = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                table.insert(key.to_string(), toml::Value::String(v.clone()));
            }
        };
        set("ports_path", &self.ports);
        set("out_dir", &self.out);
        set("title", &self.title);
        set("description", &self.description);
        if let Some(source) = &self.ci_status {
            let mut metadata = toml::Table::new();
            metadata.insert("ci_status".into(), toml::Value::String(source.clone()));
            table.insert("metadata".into(), toml::Value::Table(metadata));
        }
        toml::Value::Table(table)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.clone().unwrap_or(Command::Build { watch: false });
    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = Arc::new(config::load_config(&cli.config, cli.overrides())?);
    let registry = Arc::new(Registry::new(&config));
    let scanner = scan::scanner_for(&config.package_manager, Arc::clone(&registry))?;
    let engine = Engine::new(Arc::clone(&config), registry, scanner, Arc::new(HtmlRenderer));

    let ctx = CancellationToken::new();
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            on_signal.cancel();
        }
    });

    match command {
        Command::Build { watch: false } => build_once(&engine, &ctx).await?,
        Command::Build { watch: true } => {
            build_once(&engine, &ctx).await?;
            watch_and_rebuild(&engine, &config, &cli.config, &ctx).await?;
        }
        Command::Watch => {
            if let Err(e) = build_once(&engine, &ctx).await {
                error!(error = %e, "initial build failed");
            }
            watch_and_rebuild(&engine, &config, &cli.config, &ctx).await?;
        }
        Command::CiStatus => {
            let path = engine.write_ci_status(ctx.clone()).await?;
            println!("Wrote {}", path.display());
        }
        Command::GenConfig => {}
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,portsite=debug" } else { "warn,portsite=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn build_once(engine: &Engine, ctx: &CancellationToken) -> Result<(), EngineError> {
    let started = Instant::now();
    let report = engine.run(ctx.clone()).await?;
    output::print_run_report(&report, started.elapsed());
    Ok(())
}

async fn watch_and_rebuild(
    engine: &Engine,
    config: &SiteConfig,
    config_path: &Path,
    ctx: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let development = watch::is_development_tree(&cwd);

    let mut roots = vec![
        PathBuf::from(&config.ports_path),
        PathBuf::from(&config.assets_dir),
    ];
    if config_path.exists() {
        roots.push(config_path.to_path_buf());
    }
    if development {
        roots.extend([cwd.join("src"), cwd.join("static")]);
    }
    let (_watcher, events) = watch::spawn_fs_watcher(&roots)?;
    output::print_watch_banner(&roots, development);

    let ignored = [
        PathBuf::from(&config.out_dir),
        PathBuf::from(&config.cache_dir),
        cwd.join("target"),
    ];
    let watch_loop = WatchLoop::new(Duration::from_millis(config.watch.debounce_ms), ignored);
    let cwd = cwd.as_path();
    let fires = watch_loop.run(events, move || async move {
        if development {
            if let Err(e) = watch::rebuild_and_restart(cwd) {
                error!(error = %e, "rebuild failed");
            }
            return Flow::Stop;
        }
        if let Err(e) = build_once(engine, ctx).await {
            error!(error = %e, "build failed");
        }
        Flow::Continue
    });

    tokio::select! {
        _ = fires => {}
        _ = ctx.cancelled() => {}
    }
    Ok(())
}
