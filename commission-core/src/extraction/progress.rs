//! Progress events for an external notification channel.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc::UnboundedSender;

/// Extraction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Estimating and planning.
    Planning,
    /// A chunk request is about to be sent.
    ChunkStarted,
    /// A chunk produced results.
    ChunkCompleted,
    /// A chunk failed terminally.
    ChunkFailed,
    /// Merging chunk results.
    Merging,
    /// Done.
    Completed,
    /// The extraction as a whole failed.
    Failed,
}

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Stage name.
    pub stage: ProgressStage,
    /// 0-100, never decreasing within one extraction.
    pub percent: u8,
    /// Human-readable message.
    pub message: String,
}

/// Sends progress events, keeping percentages monotonic.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    sink: Option<UnboundedSender<ProgressEvent>>,
    high_water: AtomicU8,
}

impl ProgressReporter {
    /// A reporter that sends to `sink`, or discards events when `None`.
    #[must_use]
    pub const fn new(sink: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            sink,
            high_water: AtomicU8::new(0),
        }
    }

    /// Emits an event. A percentage lower than one already sent is raised to it.
    pub fn emit(&self, stage: ProgressStage, percent: u8, message: impl Into<String>) {
        let requested = percent.min(100);
        let previous = self.high_water.fetch_max(requested, Ordering::SeqCst);
        let percent = previous.max(requested);
        let message = message.into();
        tracing::debug!(event = "progress", stage = ?stage, percent, message = %message, "progress");
        if let Some(sink) = &self.sink {
            // A dropped receiver means nobody is listening any more.
            let _ = sink.send(ProgressEvent {
                stage,
                percent,
                message,
            });
        }
    }
}

/// Maps `done` of `total` chunks onto the band between planning (5%) and merging (90%).
#[must_use]
pub fn chunk_percent(done: usize, total: usize) -> u8 {
    const START: usize = 5;
    const SPAN: usize = 85;
    if total == 0 {
        return START as u8;
    }
    (START + SPAN * done.min(total) / total) as u8
}
