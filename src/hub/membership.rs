//! # Wait-set membership: control records and attached feeds.
//!
//! A [`MembershipOp`] travels through the hub's control channel and is applied
//! by the dispatch worker. An attached feed lives in the worker's wait set as a
//! [`BoxMember`]: a stream that checks the receiver out of its [`Feed`] handle on
//! [`Member::claim`] and hands it back when dropped.
//!
//! ## Rules
//! - Completion callbacks fire only after the wait set has changed.
//! - A member yields [`Arrival::Closed`] exactly once when its channel is closed
//!   and drained, then ends.
//! - Dropping a member (remove, closure, worker exit) always releases the receiver.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::feed::{Feed, FeedId, Rx};

/// Called by the worker once the change is applied; the flag tells whether the
/// wait set actually changed.
pub(crate) type Completion = Box<dyn FnOnce(bool) + Send + 'static>;

/// What a member stream yields to the worker.
pub(crate) enum Arrival<M> {
    Value(M),
    Closed,
}

/// A feed in (or about to enter) a worker's wait set.
pub(crate) trait Member<M>: Stream<Item = Arrival<M>> + Send + Unpin {
    /// Checks the receiver out of its feed. `false` if another worker holds it.
    fn claim(&mut self) -> bool;
}

pub(crate) type BoxMember<M> = Box<dyn Member<M>>;

/// Builds a member for `feed`, converting every value with `map`.
pub(crate) fn checkout<T, M>(feed: Feed<T>, map: fn(T) -> M) -> BoxMember<M>
where
    T: Send + 'static,
    M: Send + 'static,
{
    Box::new(Checkout {
        feed,
        rx: None,
        map,
        drained: false,
    })
}

struct Checkout<T, M> {
    feed: Feed<T>,
    rx: Option<Rx<T>>,
    map: fn(T) -> M,
    drained: bool,
}

// No field is ever pinned structurally.
impl<T, M> Unpin for Checkout<T, M> {}

impl<T, M> Stream for Checkout<T, M> {
    type Item = Arrival<M>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.drained {
            return Poll::Ready(None);
        }
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(value)) => Poll::Ready(Some(Arrival::Value((this.map)(value)))),
            Poll::Ready(None) => {
                this.drained = true;
                Poll::Ready(Some(Arrival::Closed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, M> Member<M> for Checkout<T, M>
where
    T: Send + 'static,
    M: Send + 'static,
{
    fn claim(&mut self) -> bool {
        if self.rx.is_none() {
            self.rx = self.feed.claim();
        }
        self.rx.is_some()
    }
}

impl<T, M> Drop for Checkout<T, M> {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.feed.release(rx);
        }
    }
}

/// Structural change requested through the control channel.
pub(crate) enum Change<M> {
    Add { feed: FeedId, member: BoxMember<M> },
    Remove { feed: FeedId },
}

/// Control record consumed exactly once by the dispatch worker.
pub(crate) struct MembershipOp<M> {
    pub(crate) change: Change<M>,
    pub(crate) on_applied: Option<Completion>,
}

impl<M> MembershipOp<M> {
    pub(crate) fn add(feed: FeedId, member: BoxMember<M>, on_applied: Option<Completion>) -> Self {
        Self {
            change: Change::Add { feed, member },
            on_applied,
        }
    }

    pub(crate) fn remove(feed: FeedId, on_applied: Option<Completion>) -> Self {
        Self {
            change: Change::Remove { feed },
            on_applied,
        }
    }
}
