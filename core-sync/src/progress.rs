//! # Pollable Progress State
//!
//! Shared by the sync engine and the legacy importer.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Running → Processing → Completed
//!           ↓          ↓
//!           └────────→ Failed | Cancelled
//! ```
//!
//! A tracker in `Running` or `Processing` rejects a second start, which is the
//! single-flight guard for the owning operation. The state lives in a `watch`
//! channel so callers can either poll [`ProgressTracker::snapshot`] or await
//! changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    Idle,
    /// Started, total not yet known
    Running,
    /// Total known, items being applied
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ProgressStatus::Running | ProgressStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStatus::Completed | ProgressStatus::Failed | ProgressStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Idle => "idle",
            ProgressStatus::Running => "running",
            ProgressStatus::Processing => "processing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
            ProgressStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of an operation's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub status: ProgressStatus,
    pub total_files: u64,
    pub processed_files: u64,
    pub phase: String,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// Completion percentage, 0 while the total is unknown.
    pub fn percent(&self) -> u8 {
        if self.total_files == 0 {
            return 0;
        }
        ((self.processed_files as f64 / self.total_files as f64) * 100.0).min(100.0) as u8
    }
}

#[derive(Debug)]
pub struct ProgressTracker {
    state: watch::Sender<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProgressSnapshot::default());
        Self { state }
    }

    /// Move to `Running` unless already active.
    ///
    /// Returns `false` when another run holds the tracker.
    pub fn try_begin(&self, phase: &str) -> bool {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if state.status.is_active() {
                return false;
            }
            *state = ProgressSnapshot {
                status: ProgressStatus::Running,
                phase: phase.to_string(),
                started_at: Some(Utc::now()),
                ..ProgressSnapshot::default()
            };
            started = true;
            true
        });
        started
    }

    /// Total is known; switch to `Processing`.
    pub fn set_total(&self, total: u64, phase: &str) {
        self.state.send_modify(|state| {
            state.status = ProgressStatus::Processing;
            state.total_files = total;
            state.phase = phase.to_string();
        });
    }

    pub fn set_phase(&self, phase: &str) {
        self.state.send_modify(|state| state.phase = phase.to_string());
    }

    pub fn advance(&self, processed: u64) {
        self.state
            .send_modify(|state| state.processed_files += processed);
    }

    pub fn set_processed(&self, processed: u64) {
        self.state
            .send_modify(|state| state.processed_files = processed);
    }

    pub fn push_errors<I>(&self, errors: I)
    where
        I: IntoIterator<Item = String>,
    {
        let errors: Vec<String> = errors.into_iter().collect();
        if errors.is_empty() {
            return;
        }
        self.state.send_modify(|state| state.errors.extend(errors));
    }

    pub fn complete(&self) {
        self.finish(ProgressStatus::Completed, None);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.finish(ProgressStatus::Failed, Some(message.into()));
    }

    pub fn cancel(&self) {
        self.finish(ProgressStatus::Cancelled, None);
    }

    fn finish(&self, status: ProgressStatus, error: Option<String>) {
        self.state.send_modify(|state| {
            state.status = status;
            state.finished_at = Some(Utc::now());
            if let Some(error) = error {
                state.errors.push(error);
            }
        });
    }

    /// Back to `Idle` with counters cleared. Ignored while active.
    pub fn reset(&self) {
        self.state.send_if_modified(|state| {
            if state.status.is_active() {
                return false;
            }
            *state = ProgressSnapshot::default();
            true
        });
    }

    /// Back to `Idle` even while active. Only the holder of the slot taken
    /// with [`try_begin`](Self::try_begin) may call this.
    pub(crate) fn release(&self) {
        self.state.send_replace(ProgressSnapshot::default());
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().status.is_active()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.state.subscribe()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.snapshot().status, ProgressStatus::Idle);

        assert!(tracker.try_begin("discovering"));
        assert_eq!(tracker.snapshot().status, ProgressStatus::Running);

        tracker.set_total(4, "persisting");
        tracker.advance(1);
        tracker.advance(1);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, ProgressStatus::Processing);
        assert_eq!(snapshot.percent(), 50);

        tracker.push_errors(vec!["bad row".to_string()]);
        tracker.complete();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, ProgressStatus::Completed);
        assert_eq!(snapshot.errors, vec!["bad row".to_string()]);
        assert!(snapshot.finished_at.is_some());
    }

    #[test]
    fn test_single_flight_guard() {
        let tracker = ProgressTracker::new();
        assert!(tracker.try_begin("a"));
        assert!(!tracker.try_begin("b"));

        tracker.set_total(1, "persisting");
        assert!(!tracker.try_begin("c"));

        tracker.fail("boom");
        assert!(tracker.try_begin("d"));
        assert!(tracker.snapshot().errors.is_empty());
    }

    #[test]
    fn test_reset_ignored_while_active() {
        let tracker = ProgressTracker::new();
        tracker.try_begin("a");
        tracker.reset();
        assert!(tracker.is_active());

        tracker.cancel();
        tracker.reset();
        assert_eq!(tracker.snapshot(), ProgressSnapshot::default());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProgressStatus::Processing).unwrap(),
            "\"processing\""
        );
    }
}
