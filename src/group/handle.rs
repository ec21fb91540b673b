//! # Group: a hub with calls, events and deferred work.
//!
//! A group owns a hub and a bounded process queue attached to it. Everything a
//! caller asks the group to run (event handlers, call handlers, slow-call
//! callbacks, timers) travels through that queue as a [`Directive`] and runs on
//! the group's worker, serialized with the data of its attached feeds.
//!
//! ## Architecture
//! ```text
//! emit / call / slow_call ──► process queue (bounded) ──┐
//! attach(feed) ─────────────────────────────────────────┤
//!                                                       ▼
//!                                    Hub<Envelope<T>> worker
//!                                    chain: [interceptor, lifted user processors...]
//!                                       │
//!                 Directive ◄───────────┤───────────► Data(T) → user processors
//!                  ├─ EventCall       → handler(arg)
//!                  ├─ AsyncEventCall  → slot ← handler(arg)      (caller awaits slot)
//!                  ├─ AsyncCall       → spawn work ──► AsyncReturn back into the queue
//!                  └─ AsyncReturn     → callback(ret)
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::trace;

use super::builder::GroupBuilder;
use super::call::{CallHandler, Callback, Directive, Envelope, EventHandler, Kind, Payload, Return, SlowWork};
use super::interceptor::Launcher;
use crate::chain::ProcessorChain;
use crate::error::{HubError, Misuse};
use crate::events::Event;
use crate::feed::{Feed, probe};
use crate::hub::{Hub, current_hub};

pub(crate) struct Inner<T> {
    pub(crate) hub: Hub<Envelope<T>>,
    pub(crate) queue: RwLock<Option<mpsc::Sender<Directive>>>,
    pub(crate) launcher: Launcher,
    pub(crate) events: RwLock<HashMap<String, EventHandler>>,
    pub(crate) calls: RwLock<HashMap<String, CallHandler>>,
}

/// # Serial execution context with calls, events and timers.
///
/// Cheap to clone; all clones drive the same worker.
///
/// # Example
/// ```
/// use streamhub::{Group, Payload, Return};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let g: Group<()> = Group::builder().with_name("math").build();
/// g.listen_call("double", |arg: Payload| {
///     let n = *arg.downcast::<u32>().unwrap();
///     Return::with_value(n * 2)
/// });
///
/// let (ret, registered) = g.call("double", 21u32).await;
/// assert!(registered);
/// assert_eq!(ret.downcast::<u32>(), Some(42));
/// g.stop();
/// # }
/// ```
pub struct Group<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> Clone for Group<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Group<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name())
            .field("working", &self.is_working())
            .field("processors", &self.processors().describe())
            .finish()
    }
}

impl<T: Send + 'static> Group<T> {
    /// Starts building a group.
    pub fn builder() -> GroupBuilder<T> {
        GroupBuilder::new()
    }

    /// Group name; also the name of its first chain stage.
    pub fn name(&self) -> &str {
        self.inner.hub.name()
    }

    /// Returns `true` until [`stop`](Group::stop) is called.
    pub fn is_working(&self) -> bool {
        self.inner.hub.is_working()
    }

    /// The live chain. Use [`lift`](crate::group::lift) to add a `DataProcessor<T>`.
    pub fn processors(&self) -> &ProcessorChain<Envelope<T>> {
        self.inner.hub.processors()
    }

    /// Subscribes to the runtime events of the group's hub.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.hub.subscribe()
    }

    /// Registers `handler` for `event`, replacing any previous one.
    pub fn listen_event(&self, event: impl Into<String>, handler: impl Fn(Payload) + Send + Sync + 'static) {
        let event = event.into();
        trace!(group = %self.name(), %event, "event handler registered");
        write(&self.inner.events).insert(event, Arc::new(handler));
    }

    /// Registers `handler` for calls to `event`, replacing any previous one.
    pub fn listen_call(
        &self,
        event: impl Into<String>,
        handler: impl Fn(Payload) -> Return + Send + Sync + 'static,
    ) {
        let event = event.into();
        trace!(group = %self.name(), %event, "call handler registered");
        write(&self.inner.calls).insert(event, Arc::new(handler));
    }

    /// Queues `arg` for the handler of `event` and returns without waiting for it.
    ///
    /// Returns `false` (and does nothing) if no handler is registered or the group
    /// is stopped, like [`call`](Group::call). Waits only while the process queue
    /// is full.
    pub async fn emit(&self, event: &str, arg: impl Any + Send) -> bool {
        let Some(queue) = self.queue() else {
            return false;
        };
        let Some(handler) = read(&self.inner.events).get(event).cloned() else {
            trace!(group = %self.name(), event, "event handler not registered");
            return false;
        };
        let directive = Directive(Kind::EventCall {
            handler,
            arg: Box::new(arg),
        });
        if queue.send(directive).await.is_err() {
            trace!(group = %self.name(), event, "process queue closed, event dropped");
            return false;
        }
        true
    }

    /// Runs the call handler of `event` on the group's worker and waits for its result.
    ///
    /// Returns `(Return::default(), false)` without waiting if no handler is
    /// registered or the group is stopped. If the result cannot be delivered the
    /// `Return` carries [`HubError::ChannelClosed`].
    ///
    /// # Panics
    /// Raises [`Misuse::ReentrantCall`] when awaited from this group's own worker.
    pub async fn call(&self, event: &str, arg: impl Any + Send) -> (Return, bool) {
        let Some(queue) = self.queue() else {
            return (Return::default(), false);
        };
        let Some(handler) = read(&self.inner.calls).get(event).cloned() else {
            trace!(group = %self.name(), event, "call handler not registered");
            return (Return::default(), false);
        };
        if current_hub() == Some(self.inner.hub.id()) {
            Misuse::ReentrantCall {
                group: self.name().to_string(),
            }
            .raise();
        }

        let (slot, ret) = oneshot::channel();
        let directive = Directive(Kind::AsyncEventCall {
            handler,
            arg: Box::new(arg),
            slot,
        });
        if queue.send(directive).await.is_err() {
            return (Return::failed(HubError::ChannelClosed), true);
        }
        match ret.await {
            Ok(ret) => (ret, true),
            Err(_) => (Return::failed(HubError::ChannelClosed), true),
        }
    }

    /// [`call`](Group::call) for threads outside the async runtime.
    ///
    /// Blocks the current thread; never use it on a runtime worker thread.
    pub fn blocking_call(&self, event: &str, arg: impl Any + Send) -> (Return, bool) {
        futures::executor::block_on(self.call(event, arg))
    }

    /// Runs `f(arg)` off-worker, then `callback` with its result on the worker.
    ///
    /// Dropped silently if the group is stopped. A panic in `f` is logged and
    /// `callback` receives a `Return` carrying [`HubError::ChannelClosed`].
    pub async fn slow_call<A, F, Fut>(&self, f: F, arg: A, callback: impl FnOnce(Return) + Send + 'static)
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future<Output = Return> + Send + 'static,
    {
        let work: SlowWork = Box::new(move || f(arg).boxed());
        self.defer(work, Box::new(callback)).await;
    }

    /// Runs `f` on the worker once `dur` has elapsed.
    pub async fn after_func(&self, dur: Duration, f: impl FnOnce() + Send + 'static) {
        self.defer(sleep_for(dur), Box::new(move |_| f())).await;
    }

    /// Runs `f` on the worker every `dur` until it returns `false`.
    pub async fn tick(&self, dur: Duration, f: impl FnMut() -> bool + Send + 'static) {
        let callback = tick_callback(self.inner.launcher.clone(), dur, f);
        self.defer(sleep_for(dur), callback).await;
    }

    /// Attaches `feed` and waits until its values are being served.
    pub async fn attach(&self, feed: Feed<T>) -> Result<(), HubError> {
        self.inner.hub.attach_map(feed, Envelope::Data).await
    }

    /// Detaches `feed` and waits until the receiver is back in the handle.
    ///
    /// Resolves to `false` if the feed was not attached to this group.
    pub async fn detach(&self, feed: &Feed<T>) -> Result<bool, HubError> {
        self.inner.hub.detach(feed).await
    }

    /// Requests `feed` to be attached; `on_applied` runs on the worker once it is.
    pub fn attach_with(&self, feed: Feed<T>, on_applied: impl FnOnce() + Send + 'static) -> Result<(), HubError> {
        self.inner.hub.add_map(feed, Envelope::Data, on_applied)
    }

    /// Requests `feed` to be detached; `on_applied` runs on the worker afterwards.
    pub fn detach_with(&self, feed: &Feed<T>, on_applied: impl FnOnce() + Send + 'static) -> Result<(), HubError> {
        self.inner.hub.remove(feed, on_applied)
    }

    /// Stops the hub and closes the process queue. Idempotent.
    ///
    /// Calls already in flight are neither awaited nor interrupted.
    pub fn stop(&self) {
        if !self.is_working() {
            return;
        }
        self.inner.hub.stop();
        write(&self.inner.queue).take();
    }

    /// The process queue, unless the group is stopped.
    fn queue(&self) -> Option<mpsc::Sender<Directive>> {
        read(&self.inner.queue)
            .clone()
            .filter(|queue| !probe::is_closed(queue))
    }

    async fn enqueue(&self, directive: Directive) -> bool {
        match self.queue() {
            Some(queue) => queue.send(directive).await.is_ok(),
            None => false,
        }
    }

    async fn defer(&self, work: SlowWork, callback: Callback) {
        let directive = Directive(Kind::AsyncCall {
            work,
            callback: Some(callback),
        });
        if !self.enqueue(directive).await {
            trace!(group = %self.name(), "process queue closed, slow call dropped");
        }
    }
}

fn sleep_for(dur: Duration) -> SlowWork {
    Box::new(move || {
        async move {
            tokio::time::sleep(dur).await;
            Return::default()
        }
        .boxed()
    })
}

/// Re-arms itself from the worker, so ticking never waits on the process queue.
fn tick_callback<F>(launcher: Launcher, dur: Duration, mut f: F) -> Callback
where
    F: FnMut() -> bool + Send + 'static,
{
    Box::new(move |_| {
        if !f() {
            return;
        }
        let next = tick_callback(launcher.clone(), dur, f);
        launcher.launch(sleep_for(dur), Some(next));
    })
}

fn read<V>(lock: &RwLock<V>) -> std::sync::RwLockReadGuard<'_, V> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<V>(lock: &RwLock<V>) -> std::sync::RwLockWriteGuard<'_, V> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::timeout;

    use super::*;
    use crate::chain::{ProcessorFn, ProcessorRef};
    use crate::error::ProcessError;
    use crate::events::EventKind;
    use crate::feed;
    use crate::policies::Recovery;

    const WAIT: Duration = Duration::from_secs(2);

    fn doubler(g: &Group<u32>) {
        g.listen_call("double", |arg: Payload| match arg.downcast::<u32>() {
            Ok(n) => Return::with_value(*n * 2),
            Err(_) => Return::failed("expected u32"),
        });
    }

    #[tokio::test]
    async fn test_generated_name_and_interceptor_first() {
        let log: ProcessorRef<u32> = ProcessorFn::arc("log", |v: u32| async move {
            Ok::<_, ProcessError>(Some(v))
        });
        let g = Group::builder().with_processor(log).build();
        assert!(g.name().starts_with("group-"));
        assert_eq!(g.processors().describe(), format!("{}/log", g.name()));
    }

    #[tokio::test]
    async fn test_call_returns_handler_value() {
        let g: Group<u32> = Group::builder().with_name("callee").build();
        doubler(&g);

        let (ret, registered) = g.call("double", 21u32).await;
        assert!(registered);
        assert!(ret.is_ok());
        assert_eq!(ret.downcast::<u32>(), Some(42));
    }

    #[tokio::test]
    async fn test_call_unregistered_does_not_block() {
        let g: Group<u32> = Group::builder().build();
        let (ret, registered) = timeout(WAIT, g.call("missing", ())).await.unwrap();
        assert!(!registered);
        assert!(ret.value.is_none() && ret.is_ok());
    }

    #[tokio::test]
    async fn test_call_after_stop_is_not_registered() {
        let g: Group<u32> = Group::builder().build();
        doubler(&g);
        g.stop();
        g.stop();
        assert!(!g.is_working());

        let (_, registered) = g.call("double", 1u32).await;
        assert!(!registered);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let g: Group<u32> = Group::builder().build();
        g.listen_call("v", |_| Return::with_value(1u8));
        g.listen_call("v", |_| Return::with_value(2u8));
        assert_eq!(g.call("v", ()).await.0.downcast::<u8>(), Some(2));
    }

    #[tokio::test]
    async fn test_emit_runs_handler_on_worker() {
        let g: Group<u32> = Group::builder().build();
        assert!(!g.emit("ping", 1u32).await);

        let (tx, rx) = oneshot::channel::<u32>();
        let tx = Mutex::new(Some(tx));
        g.listen_event("ping", move |arg: Payload| {
            if let (Some(tx), Ok(n)) = (tx.lock().unwrap().take(), arg.downcast::<u32>()) {
                let _ = tx.send(*n);
            }
        });

        assert!(g.emit("ping", 5u32).await);
        assert_eq!(timeout(WAIT, rx).await.unwrap().unwrap(), 5);

        g.stop();
        assert!(!g.emit("ping", 6u32).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_call_across_groups_from_a_processor() {
        let callee: Group<u32> = Group::builder().with_name("callee").build();
        doubler(&callee);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<u32>();
        let remote = callee.clone();
        let forward: ProcessorRef<u32> = ProcessorFn::arc("forward", move |v: u32| {
            let remote = remote.clone();
            let out_tx = out_tx.clone();
            async move {
                let (ret, _) = remote.call("double", v).await;
                if let Some(n) = ret.downcast::<u32>() {
                    let _ = out_tx.send(n);
                }
                Ok::<_, ProcessError>(None)
            }
        });
        let caller = Group::builder().with_name("caller").with_processor(forward).build();

        let (tx, feed) = feed::channel::<u32>(4);
        caller.attach(feed).await.unwrap();
        tx.send(4).await.unwrap();

        assert_eq!(timeout(WAIT, out_rx.recv()).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_reentrant_call_aborts_the_worker() {
        let g: Group<u32> = Group::builder().with_recovery(Recovery::Always).build();
        doubler(&g);
        let mut events = g.subscribe();

        let me = g.clone();
        g.listen_event("self_call", move |_| {
            let me = me.clone();
            // handlers are synchronous; the nested call is polled right here on the worker
            let _ = futures::executor::block_on(me.call("double", 1u32));
        });
        assert!(g.emit("self_call", ()).await);

        let aborted = timeout(WAIT, async {
            loop {
                let ev = events.recv().await.unwrap();
                if ev.kind == EventKind::WorkerAborted {
                    return ev;
                }
            }
        })
        .await
        .unwrap();
        assert!(aborted.reason.as_deref().unwrap_or_default().contains("own worker"));
    }

    #[tokio::test]
    async fn test_slow_call_callback_runs_with_result() {
        let g: Group<u32> = Group::builder().build();
        let (tx, rx) = oneshot::channel::<u32>();

        g.slow_call(
            |n: u32| async move { Return::with_value(n + 1) },
            9,
            move |ret| {
                let _ = tx.send(ret.downcast::<u32>().unwrap_or_default());
            },
        )
        .await;

        assert_eq!(timeout(WAIT, rx).await.unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_slow_call_after_stop_is_dropped() {
        let g: Group<u32> = Group::builder().build();
        g.stop();

        let called = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&called);
        g.slow_call(|_: ()| async { Return::default() }, (), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_after_func_runs_once() {
        let g: Group<u32> = Group::builder().build();
        let (tx, rx) = oneshot::channel::<()>();
        g.after_func(Duration::from_millis(10), move || {
            let _ = tx.send(());
        })
        .await;
        timeout(WAIT, rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tick_stops_when_callback_returns_false() {
        let g: Group<u32> = Group::builder().build();
        let count = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let mut done_tx = Some(done_tx);

        let c = Arc::clone(&count);
        g.tick(Duration::from_millis(5), move || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 3 {
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send(());
                }
                return false;
            }
            true
        })
        .await;

        timeout(WAIT, done_rx).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attach_with_and_detach_with() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let record: ProcessorRef<u32> = ProcessorFn::arc("record", move |v: u32| {
            let s = Arc::clone(&s);
            async move {
                s.lock().unwrap().push(v);
                Ok::<_, ProcessError>(None)
            }
        });
        let g = Group::builder().with_processor(record).build();

        let (tx, feed) = feed::channel::<u32>(4);
        let (done_tx, done_rx) = oneshot::channel();
        g.attach_with(feed.clone(), move || {
            let _ = done_tx.send(());
        })
        .unwrap();
        timeout(WAIT, done_rx).await.unwrap().unwrap();
        tx.send(1).await.unwrap();

        let (done_tx, done_rx) = oneshot::channel();
        g.detach_with(&feed, move || {
            let _ = done_tx.send(());
        })
        .unwrap();
        timeout(WAIT, done_rx).await.unwrap().unwrap();
        assert!(!feed.is_attached());
    }

    #[tokio::test]
    async fn test_recovery_one_forwards_one_and_three() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let picky: ProcessorRef<u32> = ProcessorFn::arc("picky", move |v: u32| {
            let s = Arc::clone(&s);
            async move {
                if v % 2 == 0 {
                    panic!("cannot handle {v}");
                }
                s.lock().unwrap().push(v);
                Ok::<_, ProcessError>(Some(v))
            }
        });
        let g = Group::builder()
            .with_recovery(Recovery::from(1))
            .with_processor(picky)
            .build();
        let mut events = g.subscribe();

        let (tx, feed) = feed::channel::<u32>(8);
        g.attach(feed).await.unwrap();
        for v in [1, 2, 3, 4] {
            tx.send(v).await.unwrap();
        }

        timeout(WAIT, async {
            loop {
                if events.recv().await.unwrap().kind == EventKind::WorkerExhausted {
                    return;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);

        // nothing runs the chain after exhaustion
        for v in [5, 7] {
            tx.send(v).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
        let (_tx2, other) = feed::channel::<u32>(1);
        assert!(matches!(g.attach(other).await, Err(HubError::HubStopped { .. })));

        assert!(g.is_working());
        g.stop();
        assert!(!g.is_working());
    }
}
