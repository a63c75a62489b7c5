//! Captured Output Queue
//!
//! Bounded FIFO of timestamped lines read from the child process. When the
//! queue is full the newest line is dropped so earlier history survives.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::{Condvar, Mutex};

/// Default queue capacity
pub const OUTPUT_QUEUE_CAPACITY: usize = 2000;

/// One line of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Local time the line was read
    pub timestamp: DateTime<Local>,
    /// Line text without the trailing newline
    pub text: String,
}

impl OutputLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            text: text.into(),
        }
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Bounded, thread-safe output queue
#[derive(Debug)]
pub struct OutputQueue {
    lines: Mutex<VecDeque<OutputLine>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::with_capacity(OUTPUT_QUEUE_CAPACITY)
    }
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(OUTPUT_QUEUE_CAPACITY))),
            available: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a line. Returns false if the queue was full and the line was dropped.
    pub fn push(&self, line: OutputLine) -> bool {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            drop(lines);
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                target: "process",
                dropped,
                "Output queue full, dropping line: {}",
                line.text
            );
            return false;
        }
        lines.push_back(line);
        drop(lines);
        self.available.notify_one();
        true
    }

    /// Remove and return the oldest line, waiting up to `timeout` for one to arrive
    pub fn poll(&self, timeout: Duration) -> Option<OutputLine> {
        let deadline = Instant::now() + timeout;
        let mut lines = self.lines.lock();
        loop {
            if let Some(line) = lines.pop_front() {
                return Some(line);
            }
            if self.available.wait_until(&mut lines, deadline).timed_out() {
                return lines.pop_front();
            }
        }
    }

    /// Discard every queued line
    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of lines dropped because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
