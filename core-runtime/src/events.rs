//! # Event Bus System
//!
//! Typed events broadcast over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus decouples the indexing core from whoever is watching it (a
//! desktop UI, a LAN server). Producers emit and forget; every subscriber gets
//! its own receiver and sees events published after it subscribed.
//!
//! ```text
//! ┌────────────┐   emit    ┌──────────┐  subscribe  ┌────────────┐
//! │ SyncEngine ├──────────>│          ├────────────>│     UI     │
//! └────────────┘           │ EventBus │             └────────────┘
//! ┌────────────┐   emit    │          │  subscribe  ┌────────────┐
//! │  MediaCore ├──────────>│          ├────────────>│ LAN server │
//! └────────────┘           └──────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Library(LibraryEvent::MissingFilesRemoved { count: 3 })).ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Library(_)));
//! # }
//! ```
//!
//! ## Event Types
//!
//! - [`SyncEvent`]: full-sync lifecycle (`Started`, `Progress`, `Completed`,
//!   `Failed`, `Cancelled`)
//! - [`LibraryEvent`]: reconciliation and maintenance results
//! - [`BackupEvent`]: snapshot creation, deletion and restore outcomes
//! - [`CacheEvent`]: asset cache eviction

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, SendError},
};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Library(LibraryEvent),
    Backup(BackupEvent),
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
            CoreEvent::Backup(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Backup(BackupEvent::RestoreFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Backup(BackupEvent::Created { .. })
            | CoreEvent::Backup(BackupEvent::Restored { .. })
            | CoreEvent::Cache(CacheEvent::Evicted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of one full indexing pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started {
        job_id: String,
        /// Root directories being walked
        roots: Vec<String>,
    },
    Progress {
        job_id: String,
        items_processed: u64,
        /// Known once discovery has finished
        total_items: Option<u64>,
        /// Progress percentage (0-100)
        percent: u8,
        /// Current phase (e.g. "discovering", "persisting", "reconciling")
        phase: String,
    },
    Completed {
        job_id: String,
        scanned: u64,
        upserted: u64,
        failed: u64,
        /// Records whose backing file disappeared
        removed_missing: u64,
        removed_categories: u64,
        duration_ms: u64,
    },
    Failed {
        job_id: String,
        message: String,
        items_processed: u64,
    },
    Cancelled {
        job_id: String,
        items_processed: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    MissingFilesRemoved { count: u64 },
    CategoriesPruned { count: u64 },
    StatsRefreshed { total_files: u64, total_size: u64 },
    Optimized,
    LegacyImportCompleted { imported: u64, failed: u64 },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::MissingFilesRemoved { .. } => "Removed records for missing files",
            LibraryEvent::CategoriesPruned { .. } => "Removed unused categories",
            LibraryEvent::StatsRefreshed { .. } => "Library statistics refreshed",
            LibraryEvent::Optimized => "Database optimized",
            LibraryEvent::LegacyImportCompleted { .. } => "Legacy data imported",
        }
    }
}

// ============================================================================
// Backup Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum BackupEvent {
    Created {
        backup_id: String,
        file_name: String,
        size_bytes: u64,
    },
    Deleted {
        backup_id: String,
    },
    Restored {
        backup_id: String,
    },
    RestoreFailed {
        backup_id: String,
        message: String,
    },
}

impl BackupEvent {
    fn description(&self) -> &str {
        match self {
            BackupEvent::Created { .. } => "Backup created",
            BackupEvent::Deleted { .. } => "Backup deleted",
            BackupEvent::Restored { .. } => "Backup restored",
            BackupEvent::RestoreFailed { .. } => "Backup restore failed",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    Evicted {
        deleted_count: u64,
        freed_bytes: u64,
        /// "size-bound" or "unused"
        reason: String,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cached assets evicted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by producers and subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber backlog before events are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers, or an error when nobody is listening.
    /// Producers typically ignore that error with `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let backups_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Backup(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
