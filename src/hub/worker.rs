//! # Dispatch worker: the single task that serves one hub.
//!
//! The worker owns the wait set (a [`StreamMap`] keyed by [`FeedId`]) and the
//! receiving end of the control channel. It waits on both, applies membership
//! changes as they arrive and pushes every value through a fresh snapshot of the
//! processor chain.
//!
//! ## Architecture
//! ```text
//! Worker::run()
//!   └─► scope CURRENT_HUB = id
//!        loop {
//!          serve()  ── biased select ──┬─► control op   → apply(), complete callback
//!            │                         ├─► (feed, value) → dispatch() through chain cursor
//!            │                         ├─► (feed, closed)→ drop member, FeedClosed
//!            │                         └─► nothing left  → Exit::Drained
//!            ▼
//!          Exit::Fault ──► misuse / fatal        → WorkerAborted, end
//!                      └─► budget.consume() ok   → WorkerRestarted, serve again
//!                                          else  → WorkerExhausted, end
//!        }
//! ```
//!
//! ## Rules
//! - Exactly one value is in the chain at a time; values of one feed keep their order.
//! - The faulting value is dropped; everything else (wait set, pending control ops) survives a restart.
//! - Misuse payloads are never budgeted.
//! - Backtraces are recorded where the panic is raised, by a panic hook chained
//!   in front of the existing one, and only for panics on a hub worker.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, error, trace, warn};

use super::handle::HubId;
use super::membership::{Arrival, BoxMember, Change, MembershipOp};
use crate::chain::{Cursor, ProcessorChain};
use crate::error::{Misuse, ProcessError};
use crate::events::{Bus, Event, EventKind};
use crate::feed::FeedId;
use crate::policies::RecoveryBudget;

/// Upper bound of a captured backtrace in logs.
const STACK_BUFFER_SIZE: usize = 2048;

static PANIC_TRACE_HOOK: Once = Once::new();

thread_local! {
    /// Backtrace of the last panic raised on this thread by a hub worker.
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Pseudo stage name used when a completion callback panics.
const CALLBACK_STAGE: &str = "on_applied";

tokio::task_local! {
    static CURRENT_HUB: HubId;
}

/// Identity of the hub whose worker is running the current task, if any.
pub(crate) fn current_hub() -> Option<HubId> {
    CURRENT_HUB.try_with(|id| *id).ok()
}

pub(crate) type ControlRx<M> = mpsc::UnboundedReceiver<MembershipOp<M>>;

pub(crate) struct Worker<M> {
    pub(crate) id: HubId,
    pub(crate) name: Arc<str>,
    pub(crate) control: Option<ControlRx<M>>,
    pub(crate) members: StreamMap<FeedId, BoxMember<M>>,
    pub(crate) chain: Arc<ProcessorChain<M>>,
    pub(crate) budget: RecoveryBudget,
    pub(crate) bus: Bus,
}

enum Ready<M> {
    Control(Option<MembershipOp<M>>),
    Member(FeedId, Arrival<M>),
}

enum Exit {
    Drained,
    Fault(Fault),
}

enum Fault {
    Failed { stage: String, error: ProcessError },
    Panicked { stage: String, info: String, trace: String },
    Misuse { stage: String, misuse: Misuse },
}

impl Fault {
    fn from_panic(stage: String, payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<Misuse>() {
            Ok(misuse) => Fault::Misuse {
                stage,
                misuse: *misuse,
            },
            Err(payload) => Fault::Panicked {
                stage,
                info: panic_message(payload.as_ref()),
                trace: take_panic_trace(),
            },
        }
    }

    fn is_budgeted(&self) -> bool {
        match self {
            Fault::Failed { error, .. } => error.is_recoverable(),
            Fault::Panicked { .. } => true,
            Fault::Misuse { .. } => false,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Fault::Failed { error, .. } => error.as_label(),
            Fault::Panicked { .. } => "processor_panicked",
            Fault::Misuse { misuse, .. } => misuse.as_label(),
        }
    }

    fn message(&self) -> String {
        match self {
            Fault::Failed { error, .. } => error.to_string(),
            Fault::Panicked { info, .. } => info.clone(),
            Fault::Misuse { misuse, .. } => misuse.to_string(),
        }
    }
}

impl<M: Send + 'static> Worker<M> {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        install_panic_trace();
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let id = self.id;
        CURRENT_HUB
            .scope(id, async move {
                loop {
                    match self.serve().await {
                        Exit::Drained => {
                            debug!(hub = %self.name, "dispatch worker drained");
                            self.bus
                                .publish(Event::new(EventKind::WorkerDrained).with_hub(self.name.clone()));
                            return;
                        }
                        Exit::Fault(fault) => {
                            if !self.recover(fault) {
                                return;
                            }
                        }
                    }
                }
            })
            .await;
    }

    async fn serve(&mut self) -> Exit {
        loop {
            let ready = tokio::select! {
                biased;
                op = next_op(&mut self.control), if self.control.is_some() => Ready::Control(op),
                Some((feed, arrival)) = self.members.next(), if !self.members.is_empty() => {
                    Ready::Member(feed, arrival)
                }
                else => return Exit::Drained,
            };

            match ready {
                Ready::Control(None) => {
                    trace!(hub = %self.name, members = self.members.len(), "control channel closed");
                    self.control = None;
                }
                Ready::Control(Some(op)) => {
                    if let Err(fault) = self.apply(op) {
                        return Exit::Fault(fault);
                    }
                }
                Ready::Member(feed, Arrival::Closed) => {
                    self.members.remove(&feed);
                    debug!(hub = %self.name, %feed, "feed closed and drained");
                    self.bus.publish(
                        Event::new(EventKind::FeedClosed)
                            .with_hub(self.name.clone())
                            .with_feed(feed),
                    );
                }
                Ready::Member(_, Arrival::Value(data)) => {
                    if let Err(fault) = dispatch(self.chain.cursor(), data).await {
                        return Exit::Fault(fault);
                    }
                }
            }
        }
    }

    fn apply(&mut self, op: MembershipOp<M>) -> Result<(), Fault> {
        let MembershipOp { change, on_applied } = op;
        let applied = match change {
            Change::Add { feed, mut member } => {
                if member.claim() {
                    self.members.insert(feed, member);
                    trace!(hub = %self.name, %feed, members = self.members.len(), "feed added");
                    self.publish_feed(EventKind::FeedAdded, feed, None);
                    true
                } else {
                    warn!(hub = %self.name, %feed, "feed already consumed by a worker");
                    self.publish_feed(EventKind::FeedBusy, feed, None);
                    false
                }
            }
            Change::Remove { feed } => {
                // dropping the member hands its receiver back to the feed
                let removed = self.members.remove(&feed).is_some();
                trace!(hub = %self.name, %feed, removed, "feed remove applied");
                let reason = if removed { "removed" } else { "not_found" };
                self.publish_feed(EventKind::FeedRemoved, feed, Some(reason));
                removed
            }
        };

        let Some(callback) = on_applied else {
            return Ok(());
        };
        std::panic::catch_unwind(AssertUnwindSafe(|| callback(applied)))
            .map_err(|payload| Fault::from_panic(CALLBACK_STAGE.to_string(), payload))
    }

    /// Reports the fault and decides whether to serve again.
    fn recover(&mut self, fault: Fault) -> bool {
        self.report(&fault);

        if !fault.is_budgeted() {
            error!(
                hub = %self.name,
                reason = fault.label(),
                error = %fault.message(),
                "dispatch worker aborted"
            );
            self.bus.publish(
                Event::new(EventKind::WorkerAborted)
                    .with_hub(self.name.clone())
                    .with_reason(fault.message()),
            );
            return false;
        }

        if self.budget.consume() {
            let remaining = self.budget.remaining();
            warn!(hub = %self.name, remaining = ?remaining, "dispatch worker restarting");
            self.bus.publish(
                Event::new(EventKind::WorkerRestarted)
                    .with_hub(self.name.clone())
                    .with_remaining(remaining),
            );
            true
        } else {
            warn!(hub = %self.name, reason = fault.label(), "recovery budget exhausted, dispatch worker stopped");
            self.bus.publish(
                Event::new(EventKind::WorkerExhausted)
                    .with_hub(self.name.clone())
                    .with_reason(fault.label())
                    .with_remaining(Some(0)),
            );
            false
        }
    }

    fn report(&self, fault: &Fault) {
        match fault {
            Fault::Failed { stage, error } => {
                warn!(hub = %self.name, processor = %stage, %error, "processor failed");
                self.bus.publish(
                    Event::new(EventKind::ProcessorFailed)
                        .with_hub(self.name.clone())
                        .with_processor(stage.as_str())
                        .with_reason(error.to_string()),
                );
            }
            Fault::Panicked { stage, info, trace } => {
                warn!(
                    hub = %self.name,
                    processor = %stage,
                    panic = %info,
                    backtrace = %trace,
                    "processor panicked"
                );
                self.bus.publish(
                    Event::new(EventKind::ProcessorPanicked)
                        .with_hub(self.name.clone())
                        .with_processor(stage.as_str())
                        .with_reason(info.as_str()),
                );
            }
            Fault::Misuse { stage, misuse } => {
                self.bus.publish(
                    Event::new(EventKind::ProcessorPanicked)
                        .with_hub(self.name.clone())
                        .with_processor(stage.as_str())
                        .with_reason(misuse.to_string()),
                );
            }
        }
    }

    fn publish_feed(&self, kind: EventKind, feed: FeedId, reason: Option<&'static str>) {
        let mut ev = Event::new(kind).with_hub(self.name.clone()).with_feed(feed);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.bus.publish(ev);
    }
}

async fn next_op<M>(control: &mut Option<ControlRx<M>>) -> Option<MembershipOp<M>> {
    match control {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

/// Pushes one value through `cursor` with panics contained.
async fn dispatch<M: Send + 'static>(cursor: Cursor<M>, data: M) -> Result<(), Fault> {
    let mut stage = String::new();
    let outcome = AssertUnwindSafe(traverse(cursor, data, &mut stage))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(Fault::Failed { stage, error }),
        Err(payload) => Err(Fault::from_panic(stage, payload)),
    }
}

/// Runs one value through a chain snapshot, recording the stage in flight.
async fn traverse<M: Send + 'static>(
    cursor: Cursor<M>,
    mut data: M,
    stage: &mut String,
) -> Result<(), ProcessError> {
    for processor in cursor {
        stage.clear();
        stage.push_str(processor.name());
        match processor.on_data(data).await? {
            Some(next) => data = next,
            None => break,
        }
    }
    Ok(())
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(any: &(dyn Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Chains a panic hook that records a bounded backtrace for panics raised
/// inside a hub worker, at the point of the panic.
pub(crate) fn install_panic_trace() {
    PANIC_TRACE_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if current_hub().is_some() {
                let trace = bounded(Backtrace::force_capture().to_string());
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

/// Takes the backtrace recorded for the panic just caught on this thread.
fn take_panic_trace() -> String {
    PANIC_TRACE.with(|slot| slot.borrow_mut().take()).unwrap_or_default()
}

fn bounded(mut text: String) -> String {
    if text.len() > STACK_BUFFER_SIZE {
        let mut end = STACK_BUFFER_SIZE;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[test]
    fn test_misuse_payload_is_not_budgeted() {
        let payload: Box<dyn Any + Send> = Box::new(Misuse::ReentrantCall {
            group: "g".into(),
        });
        let fault = Fault::from_panic("g".into(), payload);
        assert!(!fault.is_budgeted());
        assert_eq!(fault.label(), "misuse_reentrant_call");

        let plain = Fault::from_panic("p".into(), Box::new("boom"));
        assert!(plain.is_budgeted());
        assert_eq!(plain.message(), "boom");
    }

    #[test]
    fn test_fatal_error_is_not_budgeted() {
        let fatal = Fault::Failed {
            stage: "p".into(),
            error: ProcessError::fatal("x"),
        };
        assert!(!fatal.is_budgeted());
        let fail = Fault::Failed {
            stage: "p".into(),
            error: ProcessError::fail("x"),
        };
        assert!(fail.is_budgeted());
    }

    fn explode(msg: &'static str) -> u8 {
        panic!("{msg}")
    }

    #[tokio::test]
    async fn test_panic_trace_is_recorded_on_worker_only() {
        install_panic_trace();

        let outside = std::panic::catch_unwind(|| explode("plain"));
        assert!(outside.is_err());
        assert!(take_panic_trace().is_empty());

        let caught = CURRENT_HUB
            .scope(HubId::next(), async {
                let res = AssertUnwindSafe(async { explode("on worker") }).catch_unwind().await;
                (res.is_err(), take_panic_trace())
            })
            .await;
        assert!(caught.0);
        assert!(!caught.1.is_empty());
        assert!(caught.1.len() <= STACK_BUFFER_SIZE);
    }

    #[test]
    fn test_bounded_keeps_char_boundaries() {
        let text = "é".repeat(STACK_BUFFER_SIZE);
        let cut = bounded(text);
        assert!(cut.len() <= STACK_BUFFER_SIZE);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(bounded("short".into()), "short");
    }

    #[tokio::test]
    async fn test_current_hub_outside_worker_is_none() {
        assert!(current_hub().is_none());
    }
}
