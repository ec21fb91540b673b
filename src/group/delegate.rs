//! # Delegation: handing a feed to another group and taking it back.
//!
//! A feed's receiver lives in at most one worker at a time, so moving it is a
//! detach from one hub followed by an attach to the other. Both steps are
//! chained through completion callbacks: nothing waits on a worker, so a group
//! can hand off a feed from inside its own processors and handlers.
//!
//! ```text
//! delegate_with(feed, target):  self.detach_with ─► [self worker] flag = true, target.add
//!                                                        └─► [target worker] on_applied
//! reclaim_with(feed, from):     from.detach_with ─► [from worker] self.add
//!                                                        └─► [self worker] flag = false, on_applied
//! cancel_delegation():          flag = false              (the feed stays where it is)
//! ```
//!
//! `delegate_to` and `reclaim` wait for the chain to finish, except when awaited
//! from one of the two workers involved: there they return once the hand-off is
//! queued, and it completes right after the value being processed.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::{trace, warn};

use super::call::Envelope;
use super::handle::Group;
use crate::error::{HubError, Misuse};
use crate::feed::Feed;
use crate::hub::current_hub;

type Done = Box<dyn FnOnce(Result<(), HubError>) + Send + 'static>;

/// A [`Group`] that can lend one of its feeds to another group.
///
/// Dereferences to the underlying [`Group`].
pub struct DelegatingGroup<T> {
    group: Group<T>,
    delegated: Arc<AtomicBool>,
}

impl<T> Clone for DelegatingGroup<T> {
    fn clone(&self) -> Self {
        Self {
            group: self.group.clone(),
            delegated: Arc::clone(&self.delegated),
        }
    }
}

impl<T> Deref for DelegatingGroup<T> {
    type Target = Group<T>;

    fn deref(&self) -> &Group<T> {
        &self.group
    }
}

impl<T: Send + 'static> DelegatingGroup<T> {
    pub(crate) fn new(group: Group<T>) -> Self {
        Self {
            group,
            delegated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests `feed` to move from this group to `target` and returns at once.
    ///
    /// The delegated flag is set once this group has released the feed;
    /// `on_applied` runs on `target`'s worker once it serves the feed.
    ///
    /// # Errors
    /// [`HubError::HubStopped`] if this group no longer accepts membership changes.
    ///
    /// # Panics
    /// Raises [`Misuse::AlreadyDelegated`] if a delegation is already active.
    pub fn delegate_with(
        &self,
        feed: &Feed<T>,
        target: &Group<T>,
        on_applied: impl FnOnce() + Send + 'static,
    ) -> Result<(), HubError> {
        self.start_delegation(feed, target, settled(on_applied))
    }

    /// Moves `feed` from this group to `target` and waits until `target` serves it.
    ///
    /// Awaited from the worker of either group, resolves as soon as the hand-off
    /// is queued.
    ///
    /// # Errors
    /// [`HubError::HubStopped`] if either group stopped, [`HubError::FeedBusy`] if
    /// another worker holds the feed when `target` tries to take it.
    ///
    /// # Panics
    /// Raises [`Misuse::AlreadyDelegated`] if a delegation is already active.
    pub async fn delegate_to(&self, feed: &Feed<T>, target: &Group<T>) -> Result<(), HubError> {
        let (done, outcome) = oneshot::channel();
        self.start_delegation(feed, target, reply(done))?;
        if on_worker_of(&[&self.group, target]) {
            return Ok(());
        }
        outcome.await.unwrap_or_else(|_| Err(target.inner.hub.stopped()))
    }

    /// Requests `feed` back from `from` if a delegation is active, and returns at once.
    ///
    /// `on_applied` runs on this group's worker once it serves the feed again.
    /// Without an active delegation nothing happens and `on_applied` is dropped.
    pub fn reclaim_with(
        &self,
        feed: &Feed<T>,
        from: &Group<T>,
        on_applied: impl FnOnce() + Send + 'static,
    ) -> Result<(), HubError> {
        self.start_reclaim(feed, from, settled(on_applied)).map(|_| ())
    }

    /// Takes `feed` back from `from` if a delegation is active; otherwise does nothing.
    ///
    /// Awaited from the worker of either group, resolves as soon as the hand-off
    /// is queued.
    pub async fn reclaim(&self, feed: &Feed<T>, from: &Group<T>) -> Result<(), HubError> {
        let (done, outcome) = oneshot::channel();
        if !self.start_reclaim(feed, from, reply(done))? || on_worker_of(&[&self.group, from]) {
            return Ok(());
        }
        outcome.await.unwrap_or_else(|_| Err(self.group.inner.hub.stopped()))
    }

    /// Clears the delegated flag and returns whether it was set.
    ///
    /// The feed is not moved: it keeps being served by the group it was
    /// delegated to. Use [`reclaim`](DelegatingGroup::reclaim) to take it back.
    pub fn cancel_delegation(&self) -> bool {
        let was = self.delegated.swap(false, Ordering::AcqRel);
        trace!(group = %self.name(), delegated = was, "delegation cancelled");
        was
    }

    /// Returns `true` while a delegation is active.
    pub fn is_delegated(&self) -> bool {
        self.delegated.load(Ordering::Acquire)
    }

    fn start_delegation(&self, feed: &Feed<T>, target: &Group<T>, done: Done) -> Result<(), HubError> {
        if self.is_delegated() {
            Misuse::AlreadyDelegated {
                group: self.name().to_string(),
            }
            .raise();
        }
        let delegated = Arc::clone(&self.delegated);
        let group = self.name().to_string();
        let to = target.name().to_string();
        hand_off(
            &self.group,
            target,
            feed,
            move || {
                delegated.store(true, Ordering::Release);
                trace!(%group, target = %to, "delegation in effect");
            },
            done,
        )
    }

    /// Returns `false` when there is no delegation to reclaim.
    fn start_reclaim(&self, feed: &Feed<T>, from: &Group<T>, done: Done) -> Result<bool, HubError> {
        if !self.is_delegated() {
            trace!(group = %self.name(), "no delegation to reclaim");
            return Ok(false);
        }
        let delegated = Arc::clone(&self.delegated);
        let group = self.name().to_string();
        hand_off(
            from,
            &self.group,
            feed,
            || {},
            Box::new(move |res| {
                if res.is_ok() {
                    delegated.store(false, Ordering::Release);
                    trace!(%group, "delegation reclaimed");
                }
                done(res)
            }),
        )?;
        Ok(true)
    }
}

/// Detaches `feed` from `from`, then attaches it to `to`.
///
/// `on_detached` runs on `from`'s worker. `done` runs exactly once: on `to`'s
/// worker when it serves the feed, or with the error that ended the chain.
fn hand_off<T: Send + 'static>(
    from: &Group<T>,
    to: &Group<T>,
    feed: &Feed<T>,
    on_detached: impl FnOnce() + Send + 'static,
    done: Done,
) -> Result<(), HubError> {
    let to = to.clone();
    let moved = feed.clone();
    from.detach_with(feed, move || {
        on_detached();
        let id = moved.id();
        let done = Arc::new(Mutex::new(Some(done)));
        let joined = Arc::clone(&done);
        let submitted = to.inner.hub.add_reporting(
            moved,
            Envelope::Data,
            Box::new(move |ok| {
                let res = if ok { Ok(()) } else { Err(HubError::FeedBusy { feed: id }) };
                finish(&joined, res);
            }),
        );
        if let Err(err) = submitted {
            warn!(group = %to.name(), feed = %id, error = %err, "hand-off target rejected the feed");
            finish(&done, Err(err));
        }
    })
}

fn finish(done: &Mutex<Option<Done>>, res: Result<(), HubError>) {
    let done = done.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(done) = done {
        done(res);
    }
}

fn settled(on_applied: impl FnOnce() + Send + 'static) -> Done {
    Box::new(move |res| match res {
        Ok(()) => on_applied(),
        Err(err) => trace!(error = %err, "hand-off not completed"),
    })
}

fn reply(done: oneshot::Sender<Result<(), HubError>>) -> Done {
    Box::new(move |res| {
        let _ = done.send(res);
    })
}

/// Whether the current task is the worker of one of `groups`.
fn on_worker_of<T: Send + 'static>(groups: &[&Group<T>]) -> bool {
    current_hub().is_some_and(|id| groups.iter().any(|g| g.inner.hub.id() == id))
}
