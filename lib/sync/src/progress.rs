//! Progress stream lifecycle: workers publish outcomes, the
//! state-writer task emits ordered events, and the channel is
//! closed exactly once when the engine drops the last sender.
//! Sends never block: a full buffer drops the event instead of
//! stalling a worker, and receivers can drain whatever is
//! buffered after the sync returns.

use serde::Serialize;
use strum::Display;
use tokio::sync::mpsc;

pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
  pub phase: SyncPhase,
  pub total: usize,
  /// Monotonic across one sync.
  pub processed: usize,
  pub current_key: Option<String>,
  pub percentage: f64,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncPhase {
  Planning,
  Fetching,
  Finalizing,
  Complete,
}

/// Sending half, held only by the engine for the duration of one
/// sync. Dropping every clone closes the stream.
#[derive(Debug, Clone)]
pub struct ProgressSender {
  tx: mpsc::Sender<Progress>,
}

pub fn channel() -> (ProgressSender, mpsc::Receiver<Progress>) {
  let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
  (ProgressSender { tx }, rx)
}

impl ProgressSender {
  pub fn send(&self, progress: Progress) {
    // Lossy on purpose: progress is advisory and a slow or
    // absent reader must never stall the pipeline.
    self.tx.try_send(progress).ok();
  }

  pub fn event(
    &self,
    phase: SyncPhase,
    total: usize,
    processed: usize,
    current_key: Option<String>,
  ) {
    let percentage = if total == 0 {
      100.0
    } else {
      processed as f64 * 100.0 / total as f64
    };
    self.send(Progress {
      phase,
      total,
      processed,
      current_key,
      percentage,
    });
  }
}
