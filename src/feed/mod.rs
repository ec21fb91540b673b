//! # Feeds: externally produced input queues.
//!
//! A [`Feed`] is a cloneable handle around the receiving half of a tokio mpsc
//! channel. Producers keep the sender; hubs consume the receiver.
//!
//! ## Ownership
//! ```text
//!            ┌──────────── Feed<T> (handle, Clone, identity = FeedId) ───────────┐
//!            │  slot: Mutex<Option<Rx<T>>>                                      │
//!            └────────────┬─────────────────────────────────────▲───────────────┘
//!                claim()  │ (worker applies Add)                 │ release() (Remove, feed
//!                         ▼                                      │  closed, worker ended)
//!                  hub worker wait set ──────────────────────────┘
//! ```
//!
//! ## Rules
//! - At most one hub worker holds the receiver at any instant: a second `Add`
//!   finds the slot empty and is rejected (`HubError::FeedBusy`).
//! - Values buffered in the channel stay with the receiver; moving a feed
//!   between hubs never loses or duplicates them.
//! - Closing is the producer's job (drop every sender).

pub mod probe;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::mpsc;

static NEXT_FEED_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Feed`]; shared by all clones of the handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(u64);

impl FeedId {
    fn next() -> Self {
        FeedId(NEXT_FEED_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric identity.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed#{}", self.0)
    }
}

/// Receiving half of either channel flavor.
pub(crate) enum Rx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> Rx<T> {
    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self {
            Rx::Bounded(rx) => rx.poll_recv(cx),
            Rx::Unbounded(rx) => rx.poll_recv(cx),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Rx::Bounded(rx) => rx.is_closed(),
            Rx::Unbounded(rx) => rx.is_closed(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Rx::Bounded(rx) => rx.is_empty(),
            Rx::Unbounded(rx) => rx.is_empty(),
        }
    }
}

struct Shared<T> {
    id: FeedId,
    slot: Mutex<Option<Rx<T>>>,
}

/// Handle to an input queue that hubs can attach and detach.
///
/// Cloning the handle does not clone the queue: every clone refers to the
/// same receiver and has the same [`FeedId`].
///
/// # Example
/// ```
/// use streamhub::feed;
///
/// let (tx, feed) = feed::channel::<u32>(4);
/// assert!(!feed.is_attached());
/// assert!(!feed.is_closed());
///
/// drop(tx);
/// assert!(feed.is_closed());
/// ```
pub struct Feed<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Feed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("id", &self.shared.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<T> Feed<T> {
    fn from_rx(rx: Rx<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: FeedId::next(),
                slot: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Wraps the receiving half of a bounded channel.
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self::from_rx(Rx::Bounded(rx))
    }

    /// Wraps the receiving half of an unbounded channel.
    pub fn unbounded(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self::from_rx(Rx::Unbounded(rx))
    }

    /// Returns the identity shared by all clones of this handle.
    pub fn id(&self) -> FeedId {
        self.shared.id
    }

    /// Returns `true` while a hub worker holds the receiver.
    pub fn is_attached(&self) -> bool {
        self.slot().is_none()
    }

    /// Returns `true` if the feed is at rest, closed and drained.
    ///
    /// See [`probe`] for the exact semantics.
    pub fn is_closed(&self) -> bool {
        probe::is_closed(self)
    }

    /// Takes the receiver out of the handle. `None` if a worker already holds it.
    pub(crate) fn claim(&self) -> Option<Rx<T>> {
        self.slot().take()
    }

    /// Puts the receiver back into the handle.
    pub(crate) fn release(&self, rx: Rx<T>) {
        *self.slot() = Some(rx);
    }

    fn slot(&self) -> MutexGuard<'_, Option<Rx<T>>> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> From<mpsc::Receiver<T>> for Feed<T> {
    fn from(rx: mpsc::Receiver<T>) -> Self {
        Feed::new(rx)
    }
}

impl<T> From<mpsc::UnboundedReceiver<T>> for Feed<T> {
    fn from(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Feed::unbounded(rx)
    }
}

/// Creates a bounded channel and wraps its receiver in a [`Feed`].
///
/// `capacity` is clamped to a minimum of 1.
pub fn channel<T>(capacity: usize) -> (mpsc::Sender<T>, Feed<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Feed::new(rx))
}

/// Creates an unbounded channel and wraps its receiver in a [`Feed`].
pub fn unbounded_channel<T>() -> (mpsc::UnboundedSender<T>, Feed<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Feed::unbounded(rx))
}
