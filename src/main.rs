//! mod-warden - game server supervisor
//!
//! Main entry point: loads the configuration, starts the server with its mod
//! watchers and health monitor, then runs the operator console until `exit`,
//! end of input, or Ctrl-C.
//!
//! Usage:
//!   mod-warden [--config-dir <dir>] [--base-path <dir>] [--verbose]

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use mod_warden::config::{ConfigStore, ConfigStoreConfig, LoadOutcome, WardenConfig};
use mod_warden::console::{spawn_line_reader, Console, ConsoleExit};
use mod_warden::core::utils::{normalize_path, split_args};
use mod_warden::logging::LoggingSystem;
use mod_warden::monitor::{HealthMonitor, PeriodicMarker};
use mod_warden::sync::{SuppressionRegistry, TreeSynchronizer};
use mod_warden::watchdog::{LaunchSpec, ProcessControl, ProcessSupervisor};
use mod_warden::watcher::{
    AssetsWatcher, AssetsWatcherConfig, RegistryLayout, WatchSourceConfig, WatcherRegistry,
};
use mod_warden::WardenError;

/// Command line arguments
struct Args {
    /// Directory holding `config.json`; defaults to the working directory
    config_dir: Option<PathBuf>,
    /// Server installation directory, overriding the configured one
    base_path: Option<PathBuf>,
    /// Force debug logging
    verbose: bool,
}

impl Args {
    fn parse() -> Result<Self, String> {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config_dir: None,
            base_path: None,
            verbose: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config-dir" | "-c" => {
                    parsed.config_dir = Some(args.next().map(PathBuf::from).ok_or("--config-dir needs a value")?);
                }
                "--base-path" | "-b" => {
                    parsed.base_path = Some(args.next().map(PathBuf::from).ok_or("--base-path needs a value")?);
                }
                "--verbose" | "-v" => parsed.verbose = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => return Err(format!("Unknown argument: {}", other)),
            }
        }

        Ok(parsed)
    }
}

fn print_usage() {
    println!(
        r#"mod-warden - game server supervisor

Usage:
  mod-warden [OPTIONS]

Options:
  -c, --config-dir <dir>   Directory holding config.json (default: working directory)
  -b, --base-path <dir>    Server installation directory (overrides config)
  -v, --verbose            Debug logging
  -h, --help               Show this help
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    let cwd = std::env::current_dir().context("Cannot determine working directory")?;
    let config_dir = args.config_dir.clone().unwrap_or_else(|| cwd.clone());

    let store = Arc::new(
        ConfigStore::new(ConfigStoreConfig::in_dir(&config_dir))
            .await
            .with_context(|| format!("Failed to load configuration from {}", config_dir.display()))?,
    );
    let mut config = store.get().await;

    let mut logging_config = config.logging.clone();
    if args.verbose {
        logging_config = logging_config.verbose();
    }
    // Held until exit so buffered file output is flushed
    let logging = Arc::new(
        LoggingSystem::init(&logging_config, &config_dir).context("Failed to initialize logging")?,
    );
    spawn_log_pruning(Arc::clone(&logging));

    tracing::info!(config = %store.config_path().display(), "Starting mod-warden {}", env!("CARGO_PKG_VERSION"));
    match store.load_outcome() {
        LoadOutcome::Loaded => {}
        LoadOutcome::Created => tracing::info!("Default configuration written"),
        LoadOutcome::Repaired => tracing::warn!("Configuration was damaged and has been repaired"),
        LoadOutcome::Replaced { backup } => tracing::warn!(
            backup = %backup.display(),
            "Configuration was unreadable; defaults restored"
        ),
    }

    let base_path = resolve_base_path(&store, &config, args.base_path.as_deref()).await?;
    config.server.base_path = base_path.to_string_lossy().into_owned();

    run(config, store, &cwd, &config_dir)
        .await
        .context("Supervisor stopped with an error")
}

/// Check hourly whether a new log period started and drop old files
fn spawn_log_pruning(logging: Arc<LoggingSystem>) {
    if logging.log_directory().is_none() {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.tick().await;
        loop {
            interval.tick().await;
            match logging.prune_if_due() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Old log files removed"),
                Err(e) => tracing::warn!("Log cleanup failed: {}", e),
            }
        }
    });
}

/// Use the configured base path if it exists, otherwise ask the operator
async fn resolve_base_path(
    store: &ConfigStore,
    config: &WardenConfig,
    override_path: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = override_path {
        let path = normalize_path(path);
        if !path.is_dir() {
            bail!("Base path does not exist: {}", path.display());
        }
        return Ok(path);
    }

    let configured = config.server.base_path.trim();
    if !configured.is_empty() && Path::new(configured).is_dir() {
        tracing::info!(base_path = configured, "Using configured server path");
        return Ok(PathBuf::from(configured));
    }

    let path = tokio::task::spawn_blocking(prompt_base_path)
        .await
        .context("Base path prompt failed")??;
    store
        .set_base_path(&path)
        .await
        .context("Failed to save base path")?;
    tracing::info!(base_path = %path.display(), "Server path saved to configuration");
    Ok(path)
}

fn prompt_base_path() -> anyhow::Result<PathBuf> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        println!("Enter the server installation directory (the one containing Server/):");
        let Some(line) = lines.next() else {
            bail!("No server path configured and input is closed");
        };
        let line = line.context("Failed to read server path")?;
        let trimmed = line.trim().trim_matches('"');
        if trimmed.is_empty() {
            continue;
        }
        let path = normalize_path(Path::new(trimmed));
        if path.is_dir() {
            return Ok(path);
        }
        println!("Directory not found: {}", path.display());
    }
}

async fn run(
    config: WardenConfig,
    store: Arc<ConfigStore>,
    cwd: &Path,
    config_dir: &Path,
) -> mod_warden::Result<()> {
    let local_mods = cwd.join("mods");
    let local_assets = cwd.join("assets");
    for dir in [&local_mods, &local_assets] {
        std::fs::create_dir_all(dir)?;
    }

    let executable = config.server.executable_path();
    if !executable.is_file() {
        tracing::warn!(executable = %executable.display(), "Server executable not found");
    }
    let process: Arc<dyn ProcessControl> = Arc::new(ProcessSupervisor::new(LaunchSpec {
        interpreter: config.server.interpreter.clone(),
        executable,
        args: split_args(&config.server.args),
        assets_dir: Some(local_assets.clone()),
    }));

    let suppression = Arc::new(SuppressionRegistry::new());
    let synchronizer = Arc::new(TreeSynchronizer::new(
        Arc::clone(&suppression),
        config.sync.synchronizer(),
    ));

    let layout = RegistryLayout {
        local_mirror: local_mods,
        live_target: config.server.live_mods_dir(),
        build_patterns: config.sync.build_patterns.clone(),
    };
    let registry = {
        let process = Arc::clone(&process);
        tokio::task::spawn_blocking(move || {
            WatcherRegistry::new(layout, synchronizer, process, WatchSourceConfig::default())
        })
        .await??
    };
    let registry = Arc::new(registry);

    register_configured_watchers(&registry, &config, cwd).await;

    if let Err(e) = process.start() {
        tracing::error!(target: "process", "Server failed to start: {}", e);
    }

    let assets_watcher = match AssetsWatcher::spawn(
        &local_assets,
        Arc::clone(&suppression),
        Arc::clone(&process),
        AssetsWatcherConfig::default(),
        WatchSourceConfig::default(),
    ) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::error!(target: "watcher", "Assets watcher not started: {}", e);
            None
        }
    };

    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&process),
        config.monitor.clone(),
        Some(PeriodicMarker::in_dir(config_dir)),
    ));
    if config.monitor.enabled {
        monitor.start();
    } else {
        tracing::info!(target: "monitor", "Health monitor disabled");
    }

    let console = Console::new(Arc::clone(&registry), Arc::clone(&process), Arc::clone(&store))
        .with_base_dir(cwd)
        .with_monitor(Arc::clone(&monitor));
    let input = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match console.run(input, interrupted).await {
        ConsoleExit::Command => tracing::info!("Exit requested"),
        ConsoleExit::EndOfInput => tracing::info!("Console input closed"),
        ConsoleExit::Interrupted => tracing::info!("Interrupted"),
    }

    shutdown(registry, assets_watcher, monitor, process).await
}

/// Register the extra watch paths from the configuration; missing paths are skipped
async fn register_configured_watchers(registry: &Arc<WatcherRegistry>, config: &WardenConfig, cwd: &Path) {
    for path in config.watch_paths() {
        let path = normalize_path(&cwd.join(path));
        if !path.is_dir() {
            tracing::warn!(target: "watcher", path = %path.display(), "Configured watch path does not exist, skipping");
            continue;
        }

        let registry = Arc::clone(registry);
        let source = path.clone();
        match tokio::task::spawn_blocking(move || registry.add_watcher(&source)).await {
            Ok(Ok(entry)) => tracing::info!(
                target: "watcher",
                source = %entry.source.display(),
                policy = %entry.policy,
                "Configured watcher registered"
            ),
            Ok(Err(e)) => tracing::warn!(target: "watcher", path = %path.display(), "Configured watcher rejected: {}", e),
            Err(e) => tracing::error!(target: "watcher", path = %path.display(), "Watcher registration panicked: {}", e),
        }
    }
}

async fn shutdown(
    registry: Arc<WatcherRegistry>,
    assets_watcher: Option<AssetsWatcher>,
    monitor: Arc<HealthMonitor>,
    process: Arc<dyn ProcessControl>,
) -> mod_warden::Result<()> {
    tracing::info!("Shutting down");

    tokio::task::spawn_blocking(move || {
        registry.shutdown_all();
        if let Some(mut watcher) = assets_watcher {
            watcher.stop();
        }
        monitor.shutdown();
        process.stop();
    })
    .await
    .map_err(|e| WardenError::Internal(format!("shutdown did not complete cleanly: {}", e)))?;

    tracing::info!("Shutdown complete");
    Ok(())
}
