//! # Closed-state probe.
//!
//! [`is_closed`] answers "is this queue shut down?" synchronously and without
//! consuming a value, so callers can fail fast instead of pushing work into a
//! queue nobody will ever read again.
//!
//! ## Semantics
//! ```text
//! Option<Sender>      None                   → true  (no capacity at all: terminal)
//! Sender / Unbounded  receiver dropped        → true
//! WeakSender          cannot be upgraded      → true
//! Feed (at rest)      closed AND drained      → true
//! Feed (at rest)      value buffered          → false (a reader still needs it)
//! Feed (checked out)  held by a hub worker    → false (nothing observable here)
//! ```

use tokio::sync::mpsc;

use super::Feed;

/// Synchronous, side-effect free closed check.
pub trait ClosedProbe {
    /// Returns `true` if no further value can ever be exchanged through `self`.
    fn probe_closed(&self) -> bool;
}

/// Returns `true` if `queue` is observed closed; see the module docs.
#[inline]
pub fn is_closed<P: ClosedProbe + ?Sized>(queue: &P) -> bool {
    queue.probe_closed()
}

impl<T> ClosedProbe for mpsc::Sender<T> {
    fn probe_closed(&self) -> bool {
        self.is_closed()
    }
}

impl<T> ClosedProbe for mpsc::UnboundedSender<T> {
    fn probe_closed(&self) -> bool {
        self.is_closed()
    }
}

impl<T> ClosedProbe for mpsc::WeakSender<T> {
    fn probe_closed(&self) -> bool {
        self.upgrade().is_none_or(|tx| tx.is_closed())
    }
}

impl<P: ClosedProbe> ClosedProbe for Option<P> {
    fn probe_closed(&self) -> bool {
        self.as_ref().is_none_or(ClosedProbe::probe_closed)
    }
}

impl<T> ClosedProbe for Feed<T> {
    fn probe_closed(&self) -> bool {
        match self.slot().as_ref() {
            Some(rx) => rx.is_closed() && rx.is_empty(),
            None => false,
        }
    }
}
