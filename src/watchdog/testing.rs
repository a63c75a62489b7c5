//! Recording stand-in for the supervised process

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::output::{OutputLine, OutputQueue};
use super::supervisor::ProcessControl;
use crate::core::error::ProcessError;

/// Counts lifecycle calls and answers commands from a canned reply
#[derive(Default)]
pub(crate) struct FakeProcess {
    running: AtomicBool,
    starts: AtomicU32,
    stops: AtomicU32,
    restarts: AtomicU32,
    commands: Mutex<Vec<String>>,
    reply: Mutex<Option<String>>,
    stop_delay: Mutex<Duration>,
    output: OutputQueue,
}

impl FakeProcess {
    pub(crate) fn running() -> Self {
        let fake = Self::default();
        fake.running.store(true, Ordering::SeqCst);
        fake
    }

    /// Line pushed to the output after every non-`stop` command; `None` stays silent
    pub(crate) fn set_reply(&self, reply: Option<&str>) {
        *self.reply.lock() = reply.map(str::to_string);
    }

    /// Queue a line as if the server had printed it
    pub(crate) fn push_output(&self, line: &str) {
        self.output.push(OutputLine::new(line));
    }

    pub(crate) fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock() = delay;
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub(crate) fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

impl ProcessControl for FakeProcess {
    fn start(&self) -> Result<(), ProcessError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&self) {
        let delay = *self.stop_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.running.swap(false, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        self.output.clear();
    }

    fn wait_for_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn restart(&self) -> Result<(), ProcessError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.stop();
        self.start()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send_command(&self, command: &str) {
        if !self.is_running() {
            return;
        }
        self.commands.lock().push(command.to_string());
        if command == "stop" {
            if self.running.swap(false, Ordering::SeqCst) {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
            return;
        }
        if let Some(reply) = self.reply.lock().clone() {
            self.output.push(OutputLine::new(reply));
        }
    }

    fn poll_output_line(&self, timeout: Duration) -> Option<OutputLine> {
        self.output.poll(timeout)
    }
}
