//! # Runtime events emitted by hubs and groups.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Membership events**: feeds entering and leaving a hub's wait set
//! - **Fault events**: processors failing or panicking while handling a value
//! - **Worker events**: restarts and terminal states of the dispatch worker
//!
//! The [`Event`] struct carries additional metadata such as timestamps, hub name,
//! feed identity, processor name and the remaining recovery budget.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use streamhub::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ProcessorPanicked)
//!     .with_hub("ingest")
//!     .with_processor("parser")
//!     .with_reason("boom")
//!     .with_remaining(Some(2));
//!
//! assert_eq!(ev.kind, EventKind::ProcessorPanicked);
//! assert_eq!(ev.hub.as_deref(), Some("ingest"));
//! assert_eq!(ev.remaining, Some(2));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::feed::FeedId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Membership events ===
    /// A feed joined the wait set.
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `feed`: feed identity
    FeedAdded,

    /// A feed could not join because its receiver is consumed elsewhere.
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `feed`: feed identity
    FeedBusy,

    /// A remove request was applied.
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `feed`: feed identity
    /// - `reason`: `"removed"` or `"not_found"`
    FeedRemoved,

    /// A feed was closed and drained; it left the wait set on its own.
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `feed`: feed identity
    FeedClosed,

    // === Fault events ===
    /// A processor returned an error for one value (the value is dropped).
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `processor`: stage that failed
    /// - `reason`: error message
    ProcessorFailed,

    /// A processor panicked while handling one value (the value is dropped).
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `processor`: stage that panicked
    /// - `reason`: panic message
    ProcessorPanicked,

    /// A slow call panicked off-worker; its callback receives an error `Return`.
    ///
    /// Sets:
    /// - `hub`: group name
    /// - `reason`: panic message
    SlowCallPanicked,

    // === Worker events ===
    /// The worker resumes serving its feeds after a fault.
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `remaining`: restarts left (`None` = unbounded)
    WorkerRestarted,

    /// The recovery budget is spent; the worker ended permanently.
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `reason`: label of the last fault
    /// - `remaining`: `Some(0)`
    WorkerExhausted,

    /// The worker ended because of misuse or a fatal processor error (not budgeted).
    ///
    /// Sets:
    /// - `hub`: hub name
    /// - `reason`: misuse/fatal message
    WorkerAborted,

    /// The control channel is closed and no feed is left; the worker ended.
    ///
    /// Sets:
    /// - `hub`: hub name
    WorkerDrained,

    /// `stop()` was called on the hub.
    ///
    /// Sets:
    /// - `hub`: hub name
    HubStopped,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the hub (or group) that published the event.
    pub hub: Option<Arc<str>>,
    /// Feed involved, if applicable.
    pub feed: Option<FeedId>,
    /// Processor involved, if applicable.
    pub processor: Option<Arc<str>>,
    /// Human-readable reason (errors, panic messages, etc.).
    pub reason: Option<Arc<str>>,
    /// Remaining restarts after a fault (`None` also means unbounded for `WorkerRestarted`).
    pub remaining: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            hub: None,
            feed: None,
            processor: None,
            reason: None,
            remaining: None,
        }
    }

    /// Attaches a hub name.
    #[inline]
    pub fn with_hub(mut self, hub: impl Into<Arc<str>>) -> Self {
        self.hub = Some(hub.into());
        self
    }

    /// Attaches a feed identity.
    #[inline]
    pub fn with_feed(mut self, feed: FeedId) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Attaches a processor name.
    #[inline]
    pub fn with_processor(mut self, processor: impl Into<Arc<str>>) -> Self {
        self.processor = Some(processor.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the remaining recovery budget.
    #[inline]
    pub fn with_remaining(mut self, remaining: Option<u32>) -> Self {
        self.remaining = remaining;
        self
    }

    /// Returns `true` for events after which the worker no longer serves feeds.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::WorkerExhausted | EventKind::WorkerAborted | EventKind::WorkerDrained
        )
    }
}
