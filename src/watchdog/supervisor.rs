//! Process Supervisor
//!
//! Owns the supervised server process: launch, graceful and forced stop,
//! restart, a line-oriented stdin command channel, and the bounded capture
//! queue fed by a background output reader.

use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::assets::collect_asset_args;
use super::output::{OutputLine, OutputQueue};
use crate::core::error::ProcessError;
use crate::core::utils::join_with_timeout;

/// Lifecycle operations on the supervised process.
///
/// Implemented by [`ProcessSupervisor`]; watchers and the health monitor only
/// depend on this trait.
pub trait ProcessControl: Send + Sync {
    /// Launch the process; no-op if it is already running
    fn start(&self) -> Result<(), ProcessError>;

    /// Terminate the process, escalating to a forced kill
    fn stop(&self);

    /// Wait for the process to exit on its own, forcing it after a bounded wait
    fn wait_for_stop(&self);

    /// Stop then start
    fn restart(&self) -> Result<(), ProcessError>;

    fn is_running(&self) -> bool;

    /// Write one command line to the process input; no-op when not running
    fn send_command(&self, command: &str);

    /// Next captured output line, waiting up to `timeout`
    fn poll_output_line(&self, timeout: Duration) -> Option<OutputLine>;

    /// OS process id while running, when the implementation has one
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// What to launch
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Program and leading arguments placed before the executable (e.g. `java -jar`)
    pub interpreter: Vec<String>,
    /// Server binary or jar
    pub executable: PathBuf,
    /// Static arguments
    pub args: Vec<String>,
    /// Directory scanned for asset archives before each launch
    pub assets_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Full command line for the next launch
    pub fn command_line(&self) -> Vec<String> {
        let mut command = self.interpreter.clone();
        command.push(self.executable.display().to_string());
        command.extend(self.args.iter().cloned());
        if let Some(ref dir) = self.assets_dir {
            command.extend(collect_asset_args(dir));
        }
        command
    }

    /// Working directory: the executable's parent, if it exists
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.executable
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty() && parent.is_dir())
            .map(|parent| parent.to_path_buf())
    }
}

/// Supervisor timing configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wait after a graceful termination request before forcing
    pub grace_period_ms: u64,

    /// Wait after a forced kill
    pub kill_wait_ms: u64,

    /// Wait for the process to exit on its own in `wait_for_stop`
    pub exit_wait_ms: u64,

    /// Bounded join of the output reader thread
    pub reader_join_ms: u64,

    /// Capacity of the output capture queue
    pub output_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5000,
            kill_wait_ms: 5000,
            exit_wait_ms: 30_000,
            reader_join_ms: 2000,
            output_capacity: super::output::OUTPUT_QUEUE_CAPACITY,
        }
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No process has been started or it was stopped
    Stopped,
    /// The process is alive
    Running,
    /// A process handle exists but the process has exited
    Exited,
}

struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
}

/// Supervisor for a single external server process
pub struct ProcessSupervisor {
    launch: LaunchSpec,
    config: SupervisorConfig,
    handle: Mutex<Option<ProcessHandle>>,
    output: Arc<OutputQueue>,
    start_count: AtomicU32,
}

impl ProcessSupervisor {
    /// Create a supervisor with default timings
    pub fn new(launch: LaunchSpec) -> Self {
        Self::with_config(launch, SupervisorConfig::default())
    }

    pub fn with_config(launch: LaunchSpec, config: SupervisorConfig) -> Self {
        let output = Arc::new(OutputQueue::with_capacity(config.output_capacity));
        Self {
            launch,
            config,
            handle: Mutex::new(None),
            output,
            start_count: AtomicU32::new(0),
        }
    }

    pub fn launch_spec(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Number of successful launches since creation
    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Current process state
    pub fn state(&self) -> ProcessState {
        let mut guard = self.handle.lock();
        match guard.as_mut() {
            None => ProcessState::Stopped,
            Some(handle) => {
                if is_alive(&mut handle.child) {
                    ProcessState::Running
                } else {
                    ProcessState::Exited
                }
            }
        }
    }

    /// OS process id of the running process
    pub fn pid(&self) -> Option<u32> {
        let mut guard = self.handle.lock();
        guard
            .as_mut()
            .and_then(|handle| is_alive(&mut handle.child).then(|| handle.child.id()))
    }

    /// Number of captured lines waiting to be polled
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    fn start_locked(&self, slot: &mut Option<ProcessHandle>) -> Result<(), ProcessError> {
        if let Some(handle) = slot.as_mut() {
            if is_alive(&mut handle.child) {
                tracing::info!(target: "process", pid = handle.child.id(), "Process already running");
                return Ok(());
            }
        }
        // A previous instance exited on its own; release its resources first.
        if let Some(handle) = slot.take() {
            self.release(handle);
        }

        let command_line = self.launch.command_line();
        let (program, args) = command_line
            .split_first()
            .ok_or_else(|| ProcessError::Prepare("empty command line".to_string()))?;
        let command_text = command_line.join(" ");

        let (reader, writer) = io::pipe()?;
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        if let Some(dir) = self.launch.working_dir() {
            tracing::info!(target: "process", dir = %dir.display(), "Working directory");
            command.current_dir(dir);
        }

        tracing::info!(target: "process", "Launching: {}", command_text);
        let spawned = command.spawn();
        // Release our copies of the pipe writer so the reader sees EOF on exit.
        drop(command);

        let mut child = spawned.map_err(|source| {
            tracing::error!(target: "process", "Failed to launch {}: {}", command_text, source);
            ProcessError::LaunchFailed {
                command: command_text.clone(),
                source,
            }
        })?;

        let stdin = child.stdin.take();
        let output = Arc::clone(&self.output);
        let reader = thread::Builder::new()
            .name("server-output-reader".to_string())
            .spawn(move || read_output(reader, &output));

        let reader = match reader {
            Ok(reader) => Some(reader),
            Err(e) => {
                tracing::warn!(target: "process", "Failed to spawn output reader: {}", e);
                None
            }
        };

        tracing::info!(target: "process", pid = child.id(), "Server started");
        self.start_count.fetch_add(1, Ordering::SeqCst);
        *slot = Some(ProcessHandle {
            child,
            stdin,
            reader,
        });
        Ok(())
    }

    fn stop_locked(&self, slot: &mut Option<ProcessHandle>) {
        let Some(mut handle) = slot.take() else {
            return;
        };

        if is_alive(&mut handle.child) {
            tracing::info!(target: "process", pid = handle.child.id(), "Stopping server");
            if let Err(e) = request_termination(&mut handle.child) {
                tracing::warn!(target: "process", "Termination request failed: {}", e);
            }

            let grace = Duration::from_millis(self.config.grace_period_ms);
            if wait_with_timeout(&mut handle.child, grace).is_none() {
                tracing::warn!(target: "process", "Server ignored termination, forcing");
                self.force_kill(&mut handle.child);
            }
        }

        self.release(handle);
        tracing::info!(target: "process", "Server stopped");
    }

    fn wait_for_stop_locked(&self, slot: &mut Option<ProcessHandle>) {
        let Some(mut handle) = slot.take() else {
            return;
        };

        let timeout = Duration::from_millis(self.config.exit_wait_ms);
        if wait_with_timeout(&mut handle.child, timeout).is_none() {
            tracing::warn!(
                target: "process",
                "Server did not exit within {:?}, forcing",
                timeout
            );
            self.force_kill(&mut handle.child);
        }

        self.release(handle);
    }

    fn force_kill(&self, child: &mut Child) {
        if let Err(e) = child.kill() {
            tracing::warn!(target: "process", "Forced kill failed: {}", e);
        }
        let wait = Duration::from_millis(self.config.kill_wait_ms);
        if wait_with_timeout(child, wait).is_none() {
            tracing::error!(target: "process", pid = child.id(), "Server still alive after forced kill");
        }
    }

    /// Close stdin, join the reader and clear captured output
    fn release(&self, handle: ProcessHandle) {
        let ProcessHandle { stdin, reader, .. } = handle;
        drop(stdin);
        if let Some(reader) = reader {
            join_with_timeout(reader, Duration::from_millis(self.config.reader_join_ms));
        }
        self.output.clear();
    }
}

impl ProcessControl for ProcessSupervisor {
    fn start(&self) -> Result<(), ProcessError> {
        let mut slot = self.handle.lock();
        self.start_locked(&mut slot)
    }

    fn stop(&self) {
        let mut slot = self.handle.lock();
        self.stop_locked(&mut slot);
    }

    fn wait_for_stop(&self) {
        let mut slot = self.handle.lock();
        self.wait_for_stop_locked(&mut slot);
    }

    fn restart(&self) -> Result<(), ProcessError> {
        let mut slot = self.handle.lock();
        self.stop_locked(&mut slot);
        self.start_locked(&mut slot)
    }

    fn is_running(&self) -> bool {
        let mut slot = self.handle.lock();
        slot.as_mut().is_some_and(|handle| is_alive(&mut handle.child))
    }

    fn pid(&self) -> Option<u32> {
        ProcessSupervisor::pid(self)
    }

    fn send_command(&self, command: &str) {
        let mut slot = self.handle.lock();
        let alive = slot.as_mut().is_some_and(|handle| is_alive(&mut handle.child));
        let handle = match slot.as_mut() {
            Some(handle) if alive => handle,
            _ => {
                tracing::info!(target: "process", "Server not running, command ignored: {}", command);
                return;
            }
        };

        let Some(stdin) = handle.stdin.as_mut() else {
            tracing::warn!(target: "process", "Server input closed, command ignored: {}", command);
            return;
        };

        let result = stdin
            .write_all(command.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        match result {
            Ok(()) => tracing::debug!(target: "process", "Sent command: {}", command),
            Err(e) => tracing::warn!(target: "process", "Failed to send command {}: {}", command, e),
        }
    }

    fn poll_output_line(&self, timeout: Duration) -> Option<OutputLine> {
        self.output.poll(timeout)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let mut slot = self.handle.get_mut().take();
        self.stop_locked(&mut slot);
    }
}

// ============================================================================
// Process Helpers
// ============================================================================

fn is_alive(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

/// Poll `child` until it exits or `timeout` elapses
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "process", "Failed to query process status: {}", e);
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Ask the process to terminate gracefully
#[cfg(unix)]
fn request_termination(child: &mut Child) -> io::Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: `pid` is our own unreaped child, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    child.kill()
}

/// Copy combined stdout/stderr lines into the capture queue until EOF
fn read_output(pipe: io::PipeReader, output: &OutputQueue) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches(['\r', '\n']);
                tracing::info!(target: "server", "{}", text);
                output.push(OutputLine::new(text));
            }
            Err(e) => {
                tracing::debug!(target: "process", "Output reader stopped: {}", e);
                break;
            }
        }
    }
}
