//! Progress reporting for long-running loops.
//!
//! The engine only calls [`ProgressSink`]; rendering happens wherever the
//! caller puts it. [`ChannelProgress`] forwards events to a task the caller
//! spawns, [`NoOpProgress`] discards them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc;

/// Receives one tick per processed user and a final `finish`.
pub trait ProgressSink: Send + Sync {
    /// Announce how many items the loop will visit.
    fn start(&self, _total: usize) {}

    /// One item processed.
    fn tick(&self);

    /// The loop is over.
    fn finish(&self);
}

/// Discards all progress.
#[derive(Debug, Default)]
pub struct NoOpProgress;

impl ProgressSink for NoOpProgress {
    fn tick(&self) {}

    fn finish(&self) {}
}

/// Counts ticks; used by tests and for summaries.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    total: AtomicUsize,
    ticks: AtomicUsize,
    finished: AtomicBool,
}

impl RecordingProgress {
    /// Create a new recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks so far.
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Announced total.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Whether `finish` was called.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ProgressSink for RecordingProgress {
    fn start(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Event forwarded by [`ChannelProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Loop started with this many items.
    Started(usize),
    /// One item processed.
    Tick,
    /// Loop finished.
    Finished,
}

/// Forwards progress to a receiver, typically a renderer task.
///
/// Sends never block; if the receiver is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    /// Create a sink and the receiver the renderer should drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn start(&self, total: usize) {
        let _ = self.tx.send(ProgressEvent::Started(total));
    }

    fn tick(&self) {
        let _ = self.tx.send(ProgressEvent::Tick);
    }

    fn finish(&self) {
        let _ = self.tx.send(ProgressEvent::Finished);
    }
}
