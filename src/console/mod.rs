//! Operator Console
//!
//! Reads commands line by line from the operator, manages extra watch
//! directories, forwards raw commands to the server and reports status.
//! Watcher changes are persisted to the configuration file once the
//! registry has accepted them.

mod command;

pub use command::{ConsoleCommand, ParseError, USAGE};

use std::future::Future;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;

use crate::config::ConfigStore;
use crate::core::utils::normalize_path;
use crate::monitor::HealthMonitor;
use crate::watchdog::ProcessControl;
use crate::watcher::WatcherRegistry;

/// What one executed line produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleReply {
    /// Lines to show the operator
    pub lines: Vec<String>,
    /// The operator asked to shut down
    pub exit: bool,
}

impl ConsoleReply {
    fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            exit: false,
        }
    }

    fn push(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }
}

/// Forward lines from a blocking reader into a channel on a dedicated thread.
///
/// The thread ends when the reader is exhausted or the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R) -> std::io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "console", "Console input failed: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Why [`Console::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// `exit` or `quit`
    Command,
    /// Input closed
    EndOfInput,
    /// The shutdown future completed
    Interrupted,
}

/// Command dispatcher over the running components
pub struct Console {
    registry: Arc<WatcherRegistry>,
    process: Arc<dyn ProcessControl>,
    store: Arc<ConfigStore>,
    monitor: Option<Arc<HealthMonitor>>,
    base_dir: PathBuf,
}

impl Console {
    pub fn new(
        registry: Arc<WatcherRegistry>,
        process: Arc<dyn ProcessControl>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            registry,
            process,
            store,
            monitor: None,
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Monitor that receives reloaded settings
    pub fn with_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Directory relative watch paths are resolved against
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Execute lines from `input` until `exit`, the input closes, or
    /// `shutdown` completes, printing every reply to stdout
    pub async fn run<F>(&self, mut input: mpsc::Receiver<String>, shutdown: F) -> ConsoleExit
    where
        F: Future<Output = ()>,
    {
        println!("{}", USAGE);
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                _ = &mut shutdown => return ConsoleExit::Interrupted,
                line = input.recv() => line,
            };
            let Some(line) = line else {
                return ConsoleExit::EndOfInput;
            };

            let reply = self.execute(&line).await;
            for text in &reply.lines {
                println!("{}", text);
            }
            if reply.exit {
                return ConsoleExit::Command;
            }
        }
    }

    /// Parse and execute one console line
    pub async fn execute(&self, line: &str) -> ConsoleReply {
        match line.parse::<ConsoleCommand>() {
            Ok(command) => self.dispatch(command).await,
            Err(ParseError::Empty) => ConsoleReply::default(),
            Err(e) => {
                let mut reply = ConsoleReply::line(format!("Invalid command: {}", e));
                reply.push(USAGE);
                reply
            }
        }
    }

    pub async fn dispatch(&self, command: ConsoleCommand) -> ConsoleReply {
        tracing::debug!(target: "console", ?command, "Console command");
        match command {
            ConsoleCommand::WatchAdd(path) => self.watch_add(&path).await,
            ConsoleCommand::WatchRemove(path) => self.watch_remove(&path).await,
            ConsoleCommand::WatchList => self.watch_list().await,
            ConsoleCommand::BackendSend(line) => self.backend_send(line).await,
            ConsoleCommand::BackendStatus => self.backend_status().await,
            ConsoleCommand::ReloadConfig => self.reload_config().await,
            ConsoleCommand::Help => ConsoleReply::line(USAGE),
            ConsoleCommand::Exit => ConsoleReply {
                lines: vec!["Shutting down...".to_string()],
                exit: true,
            },
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        normalize_path(&self.base_dir.join(path))
    }

    async fn watch_add(&self, path: &Path) -> ConsoleReply {
        let path = self.resolve(path);

        // Registration imports the directory; keep that off the async workers
        let registry = Arc::clone(&self.registry);
        let source = path.clone();
        let added = tokio::task::spawn_blocking(move || registry.add_watcher(&source)).await;

        let entry = match added {
            Ok(Ok(entry)) => entry,
            Ok(Err(e)) => return ConsoleReply::line(format!("Could not add watcher: {}", e)),
            Err(e) => {
                tracing::error!(target: "console", "Watcher registration task failed: {}", e);
                return ConsoleReply::line(format!("Could not add watcher: {}", e));
            }
        };

        let mut reply = ConsoleReply::line(format!(
            "Watching {} -> {} ({})",
            entry.source.display(),
            entry.target.display(),
            entry.policy
        ));

        if self.store.has_watch_path(&entry.source).await {
            reply.push(format!("Already listed in config: {}", entry.source.display()));
            return reply;
        }
        match self.store.add_watch_path(&entry.source).await {
            Ok(_) => reply.push(format!("Saved to config: {}", entry.source.display())),
            Err(e) => {
                tracing::error!(target: "console", path = %entry.source.display(), "Failed to persist watcher: {}", e);
                reply.push(format!("Watcher active but not saved: {}", e));
            }
        }
        reply
    }

    async fn watch_remove(&self, path: &Path) -> ConsoleReply {
        let path = self.resolve(path);

        let registry = Arc::clone(&self.registry);
        let source = path.clone();
        let removed = tokio::task::spawn_blocking(move || registry.remove_watcher(&source)).await;

        match removed {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                return ConsoleReply::line(format!("No watcher registered for {}", path.display()))
            }
            Ok(Err(e)) => return ConsoleReply::line(format!("Could not remove watcher: {}", e)),
            Err(e) => {
                tracing::error!(target: "console", "Watcher removal task failed: {}", e);
                return ConsoleReply::line(format!("Could not remove watcher: {}", e));
            }
        }

        let mut reply = ConsoleReply::line(format!("Stopped watching {}", path.display()));
        if !self.store.has_watch_path(&path).await {
            reply.push(format!("Not listed in config (removed in memory only): {}", path.display()));
            return reply;
        }
        match self.store.remove_watch_path(&path).await {
            Ok(_) => reply.push(format!("Removed from config: {}", path.display())),
            Err(e) => {
                tracing::error!(target: "console", path = %path.display(), "Failed to persist watcher removal: {}", e);
                reply.push(format!("Watcher stopped but config not updated: {}", e));
            }
        }
        reply
    }

    async fn watch_list(&self) -> ConsoleReply {
        let registry = Arc::clone(&self.registry);
        let entries = match tokio::task::spawn_blocking(move || registry.list_watchers()).await {
            Ok(entries) => entries,
            Err(e) => return ConsoleReply::line(format!("Could not list watchers: {}", e)),
        };
        if entries.is_empty() {
            return ConsoleReply::line("No watchers.");
        }

        let lines = entries
            .iter()
            .map(|entry| {
                let marker = if entry.builtin { " [builtin]" } else { "" };
                format!(
                    "{} -> {} ({}){}",
                    entry.source.display(),
                    entry.target.display(),
                    entry.policy,
                    marker
                )
            })
            .collect();
        ConsoleReply { lines, exit: false }
    }

    async fn backend_send(&self, line: String) -> ConsoleReply {
        let process = Arc::clone(&self.process);
        let sent = line.clone();
        let result = tokio::task::spawn_blocking(move || {
            if !process.is_running() {
                return false;
            }
            process.send_command(&sent);
            true
        })
        .await;
        match result {
            Ok(true) => ConsoleReply::line(format!("Sent: {}", line)),
            Ok(false) => ConsoleReply::line("Server is not running."),
            Err(e) => ConsoleReply::line(format!("Could not send command: {}", e)),
        }
    }

    async fn backend_status(&self) -> ConsoleReply {
        // The process lock is held for the whole of a restart
        let process = Arc::clone(&self.process);
        let registry = Arc::clone(&self.registry);
        let queried = tokio::task::spawn_blocking(move || {
            (process.is_running(), process.pid(), registry.len())
        })
        .await;
        let (running, pid, watchers) = match queried {
            Ok(status) => status,
            Err(e) => return ConsoleReply::line(format!("Could not query status: {}", e)),
        };

        let mut reply = match (running, pid) {
            (true, Some(pid)) => ConsoleReply::line(format!("Server: running (pid {})", pid)),
            (true, None) => ConsoleReply::line("Server: running"),
            (false, _) => ConsoleReply::line("Server: stopped"),
        };

        reply.push(format!("Watchers: {}", watchers));
        if let Some(monitor) = &self.monitor {
            let config = monitor.config();
            reply.push(format!(
                "Monitor: {} (every {}s, TPS floor {}, unanswered probes {})",
                if monitor.is_started() { "active" } else { "inactive" },
                config.check_interval().as_secs(),
                config.tps_min,
                monitor.unresponsive_count()
            ));
        }
        reply
    }

    async fn reload_config(&self) -> ConsoleReply {
        let config = match self.store.reload().await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(target: "console", "Failed to reload configuration: {}", e);
                return ConsoleReply::line(format!("Could not reload config: {}", e));
            }
        };

        let mut reply = ConsoleReply::line(format!(
            "Reloaded {}",
            self.store.config_path().display()
        ));
        if let Some(monitor) = &self.monitor {
            monitor.update_config(config.monitor);
            reply.push("Monitor settings applied.");
        }
        reply
    }
}
