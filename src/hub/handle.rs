//! # Hub handle: membership requests, chain access and lifecycle.
//!
//! [`Hub`] is a cheap, cloneable handle. It never touches the wait set directly:
//! every membership change is a record sent to the worker through an unbounded
//! control channel, so a processor running on the worker can request changes to
//! its own hub without blocking.
//!
//! ## Request flavors
//! ```text
//! add / add_map / remove   fire-and-forget; the callback runs on the worker once applied
//! attach / attach_map      async; resolve after the worker applied the change
//! detach                   async; resolves with whether the feed was a member
//! ```
//!
//! Awaiting `attach`/`detach` from the hub's own worker would never complete;
//! this is detected and reported as [`Misuse::ReentrantMembership`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamMap;
use tracing::debug;

use super::membership::{self, Completion, MembershipOp};
use super::worker::{Worker, current_hub};
use crate::chain::{ProcessorChain, ProcessorRef};
use crate::config::Config;
use crate::error::{HubError, Misuse};
use crate::events::{Bus, Event, EventKind};
use crate::feed::Feed;

static NEXT_HUB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HubId(u64);

impl HubId {
    pub(crate) fn next() -> Self {
        HubId(NEXT_HUB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric identity.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hub#{}", self.0)
    }
}

struct Inner<M> {
    id: HubId,
    name: Arc<str>,
    control: Mutex<Option<mpsc::UnboundedSender<MembershipOp<M>>>>,
    chain: Arc<ProcessorChain<M>>,
    working: AtomicBool,
    bus: Bus,
}

/// # Multiplexes a dynamic set of feeds into one processor chain.
///
/// A hub owns exactly one dispatch worker. Values from all attached feeds are
/// handled strictly one at a time, in arrival order per feed.
///
/// # Example
/// ```
/// use streamhub::{feed, Config, Hub, ProcessError, ProcessorFn, ProcessorRef};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let print: ProcessorRef<u32> = ProcessorFn::arc("print", |v: u32| async move {
///     println!("got {v}");
///     Ok::<_, ProcessError>(None)
/// });
/// let hub = Hub::new(Config::default(), [print]);
///
/// let (tx, feed) = feed::channel::<u32>(8);
/// hub.attach(feed).await.unwrap();
/// tx.send(1).await.unwrap();
///
/// hub.stop();
/// # }
/// ```
pub struct Hub<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Hub<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for Hub<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("working", &self.inner.working.load(Ordering::Acquire))
            .finish()
    }
}

impl<M: Send + 'static> Hub<M> {
    /// Creates a hub with the given initial processors and starts its worker.
    ///
    /// The name defaults to `hub-<id>` when `cfg.name` is empty.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new(cfg: Config, processors: impl IntoIterator<Item = ProcessorRef<M>>) -> Self {
        let id = HubId::next();
        let name = cfg.name_or(&format!("hub-{}", id.as_u64())).to_string();
        Self::spawn(id, name, &cfg, processors)
    }

    /// Builds the handle and spawns the worker under an explicit identity.
    pub(crate) fn spawn(
        id: HubId,
        name: String,
        cfg: &Config,
        processors: impl IntoIterator<Item = ProcessorRef<M>>,
    ) -> Self {
        let name: Arc<str> = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let chain = Arc::new(ProcessorChain::new(processors));
        let bus = Bus::new(cfg.bus_capacity_clamped());

        let worker = Worker {
            id,
            name: Arc::clone(&name),
            control: Some(rx),
            members: StreamMap::new(),
            chain: Arc::clone(&chain),
            budget: cfg.recovery.budget(),
            bus: bus.clone(),
        };
        worker.spawn();
        debug!(hub = %name, recovery = ?cfg.recovery, "dispatch worker started");

        Self {
            inner: Arc::new(Inner {
                id,
                name,
                control: Mutex::new(Some(tx)),
                chain,
                working: AtomicBool::new(true),
                bus,
            }),
        }
    }

    /// Hub identity.
    pub fn id(&self) -> HubId {
        self.inner.id
    }

    /// Hub name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` until [`stop`](Hub::stop) is called.
    ///
    /// A worker that ended on its own (exhausted budget, abort) does not clear
    /// this flag; watch the event bus for that.
    pub fn is_working(&self) -> bool {
        self.inner.working.load(Ordering::Acquire)
    }

    /// The processor chain; edits take effect from the next value on.
    pub fn processors(&self) -> &ProcessorChain<M> {
        &self.inner.chain
    }

    /// Subscribes to this hub's runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Requests `feed` to join the wait set; values are converted with `M::from`.
    ///
    /// Returns once the request is queued. `on_applied` runs on the worker only
    /// if the feed actually joined.
    pub fn add<T>(&self, feed: Feed<T>, on_applied: impl FnOnce() + Send + 'static) -> Result<(), HubError>
    where
        T: Send + 'static,
        M: From<T>,
    {
        self.add_map(feed, <M as From<T>>::from, on_applied)
    }

    /// Like [`add`](Hub::add) with an explicit conversion.
    pub fn add_map<T>(
        &self,
        feed: Feed<T>,
        map: fn(T) -> M,
        on_applied: impl FnOnce() + Send + 'static,
    ) -> Result<(), HubError>
    where
        T: Send + 'static,
    {
        self.add_reporting(feed, map, when_applied(on_applied))
    }

    /// Requests `feed` to join the wait set; `on_applied` learns whether it did.
    pub(crate) fn add_reporting<T>(&self, feed: Feed<T>, map: fn(T) -> M, on_applied: Completion) -> Result<(), HubError>
    where
        T: Send + 'static,
    {
        let id = feed.id();
        self.submit(MembershipOp::add(id, membership::checkout(feed, map), Some(on_applied)))
    }

    /// Requests `feed` to leave the wait set.
    ///
    /// Returns once the request is queued. `on_applied` runs on the worker after
    /// the request was applied, whether or not the feed was a member; if it was,
    /// the receiver is back in `feed` by then.
    pub fn remove<T>(&self, feed: &Feed<T>, on_applied: impl FnOnce() + Send + 'static) -> Result<(), HubError> {
        self.submit(MembershipOp::remove(feed.id(), Some(Box::new(move |_| on_applied()))))
    }

    /// Adds `feed` and waits until the worker has applied the change.
    ///
    /// # Errors
    /// - [`HubError::FeedBusy`] if another worker consumes the feed;
    /// - [`HubError::HubStopped`] if the hub is stopped or its worker has ended.
    ///
    /// # Panics
    /// Raises [`Misuse::ReentrantMembership`] when awaited from this hub's own worker.
    pub async fn attach<T>(&self, feed: Feed<T>) -> Result<(), HubError>
    where
        T: Send + 'static,
        M: From<T>,
    {
        self.attach_map(feed, <M as From<T>>::from).await
    }

    /// Like [`attach`](Hub::attach) with an explicit conversion.
    pub async fn attach_map<T>(&self, feed: Feed<T>, map: fn(T) -> M) -> Result<(), HubError>
    where
        T: Send + 'static,
    {
        self.ensure_off_worker();
        let id = feed.id();
        let (done, applied) = oneshot::channel();
        self.add_reporting(feed, map, reply(done))?;
        match applied.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(HubError::FeedBusy { feed: id }),
            Err(_) => Err(self.stopped()),
        }
    }

    /// Removes `feed` and waits until the worker has applied the change.
    ///
    /// Resolves to `false` if the feed was not a member of this hub.
    ///
    /// # Panics
    /// Raises [`Misuse::ReentrantMembership`] when awaited from this hub's own worker.
    pub async fn detach<T>(&self, feed: &Feed<T>) -> Result<bool, HubError> {
        self.ensure_off_worker();
        let (done, applied) = oneshot::channel();
        self.submit(MembershipOp::remove(feed.id(), Some(reply(done))))?;
        applied.await.map_err(|_| self.stopped())
    }

    /// Stops accepting membership changes. Idempotent.
    ///
    /// The worker finishes once no feed is left attached; feeds stay attached
    /// until they are removed or closed by their producers.
    pub fn stop(&self) {
        let was_open = self
            .inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        self.inner.working.store(false, Ordering::Release);
        if was_open {
            debug!(hub = %self.inner.name, "hub stopped");
            self.inner
                .bus
                .publish(Event::new(EventKind::HubStopped).with_hub(Arc::clone(&self.inner.name)));
        }
    }

    fn submit(&self, op: MembershipOp<M>) -> Result<(), HubError> {
        let guard = self.inner.control.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(op).map_err(|_| self.stopped()),
            None => Err(self.stopped()),
        }
    }

    fn ensure_off_worker(&self) {
        if current_hub() == Some(self.inner.id) {
            Misuse::ReentrantMembership {
                hub: self.inner.name.to_string(),
            }
            .raise();
        }
    }

    pub(crate) fn stopped(&self) -> HubError {
        HubError::HubStopped {
            hub: self.inner.name.to_string(),
        }
    }
}

fn when_applied(f: impl FnOnce() + Send + 'static) -> Completion {
    Box::new(move |applied| {
        if applied {
            f()
        }
    })
}

fn reply(done: oneshot::Sender<bool>) -> Completion {
    Box::new(move |applied| {
        let _ = done.send(applied);
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::chain::ProcessorFn;
    use crate::error::ProcessError;
    use crate::feed;
    use crate::policies::Recovery;

    type Seen = Arc<Mutex<Vec<u32>>>;

    fn recorder(seen: &Seen) -> ProcessorRef<u32> {
        let seen = Arc::clone(seen);
        ProcessorFn::arc("record", move |v: u32| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(v);
                Ok::<_, ProcessError>(Some(v))
            }
        })
    }

    async fn wait_for(seen: &Seen, n: usize) {
        timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("values not observed in time");
    }

    async fn next_kind(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
        timeout(Duration::from_secs(2), async {
            loop {
                let ev = rx.recv().await.expect("bus closed");
                if ev.kind == kind {
                    return ev;
                }
            }
        })
        .await
        .expect("event not observed in time")
    }

    #[tokio::test]
    async fn test_default_name_and_stop_is_idempotent() {
        let hub: Hub<u32> = Hub::new(Config::default(), Vec::new());
        assert_eq!(hub.name(), format!("hub-{}", hub.id().as_u64()));
        assert!(hub.is_working());

        hub.stop();
        hub.stop();
        assert!(!hub.is_working());

        let (_tx, feed) = feed::channel::<u32>(1);
        assert!(matches!(hub.attach(feed).await, Err(HubError::HubStopped { .. })));
    }

    #[tokio::test]
    async fn test_attach_then_send_is_observed() {
        let seen: Seen = Arc::default();
        let hub = Hub::new(Config::default(), [recorder(&seen)]);

        let (tx, feed) = feed::channel::<u32>(4);
        hub.attach(feed.clone()).await.unwrap();
        assert!(feed.is_attached());

        tx.send(5).await.unwrap();
        wait_for(&seen, 1).await;
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_values_from_one_feed_keep_order_across_feeds() {
        let seen: Seen = Arc::default();
        let hub = Hub::new(Config::default(), [recorder(&seen)]);

        let (tx_a, a) = feed::channel::<u32>(16);
        let (tx_b, b) = feed::unbounded_channel::<u32>();
        hub.attach(a).await.unwrap();
        hub.attach(b).await.unwrap();

        for i in 0..10 {
            tx_a.send(i).await.unwrap();
            tx_b.send(100 + i).unwrap();
        }
        wait_for(&seen, 20).await;

        let seen = seen.lock().unwrap().clone();
        let from_a: Vec<u32> = seen.iter().copied().filter(|v| *v < 100).collect();
        let from_b: Vec<u32> = seen.iter().copied().filter(|v| *v >= 100).collect();
        assert_eq!(from_a, (0..10).collect::<Vec<_>>());
        assert_eq!(from_b, (100..110).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_second_hub_cannot_attach_a_consumed_feed() {
        let first: Hub<u32> = Hub::new(Config::default(), Vec::new());
        let second: Hub<u32> = Hub::new(Config::default(), Vec::new());

        let (_tx, feed) = feed::channel::<u32>(1);
        first.attach(feed.clone()).await.unwrap();
        assert_eq!(
            second.attach(feed.clone()).await,
            Err(HubError::FeedBusy { feed: feed.id() })
        );
    }

    #[tokio::test]
    async fn test_detach_hands_the_feed_back() {
        let seen: Seen = Arc::default();
        let hub = Hub::new(Config::default(), [recorder(&seen)]);

        let (tx, feed) = feed::channel::<u32>(4);
        hub.attach(feed.clone()).await.unwrap();
        assert!(hub.detach(&feed).await.unwrap());
        assert!(!feed.is_attached());
        assert!(!hub.detach(&feed).await.unwrap());

        // values sent while detached wait in the feed
        tx.send(9).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().unwrap().is_empty());

        hub.attach(feed).await.unwrap();
        wait_for(&seen, 1).await;
        assert_eq!(*seen.lock().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_add_and_remove_callbacks_fire_after_apply() {
        let hub: Hub<u32> = Hub::new(Config::default(), Vec::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let (_tx, feed) = feed::channel::<u32>(1);
        let (done_tx, done_rx) = oneshot::channel();
        let f = Arc::clone(&fired);
        hub.add(feed.clone(), move || {
            f.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();
        timeout(Duration::from_secs(2), done_rx).await.unwrap().unwrap();

        // a remove for a feed that is not a member still calls back
        let (_tx2, stranger) = feed::channel::<u32>(1);
        let f = Arc::clone(&fired);
        hub.remove(&stranger, move || {
            f.fetch_add(10, Ordering::SeqCst);
        })
        .unwrap();

        let (done_tx, done_rx) = oneshot::channel();
        let f = Arc::clone(&fired);
        hub.remove(&feed, move || {
            f.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();
        timeout(Duration::from_secs(2), done_rx).await.unwrap().unwrap();

        // control ops are applied in order, so the stranger's callback already ran
        assert_eq!(fired.load(Ordering::SeqCst), 12);
        assert!(!feed.is_attached());
    }

    #[tokio::test]
    async fn test_closed_feed_leaves_the_wait_set() {
        let hub: Hub<u32> = Hub::new(Config::default(), Vec::new());
        let mut events = hub.subscribe();

        let (tx, feed) = feed::channel::<u32>(1);
        hub.attach(feed.clone()).await.unwrap();
        drop(tx);

        let ev = next_kind(&mut events, EventKind::FeedClosed).await;
        assert_eq!(ev.feed, Some(feed.id()));
        assert!(!feed.is_attached());
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_recovery_budget_drops_only_faulting_values() {
        let seen: Seen = Arc::default();
        let fragile: ProcessorRef<u32> = ProcessorFn::arc("fragile", |v: u32| async move {
            if v % 2 == 0 {
                panic!("even value {v}");
            }
            Ok::<_, ProcessError>(Some(v))
        });
        let cfg = Config {
            recovery: Recovery::Limited(1),
            ..Config::default()
        };
        let hub = Hub::new(cfg, [fragile, recorder(&seen)]);
        let mut events = hub.subscribe();

        let (tx, feed) = feed::channel::<u32>(8);
        hub.attach(feed).await.unwrap();
        for v in [1, 2, 3, 4] {
            tx.send(v).await.unwrap();
        }

        let restarted = next_kind(&mut events, EventKind::WorkerRestarted).await;
        assert_eq!(restarted.remaining, Some(0));
        next_kind(&mut events, EventKind::WorkerExhausted).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
        // exhaustion ends the worker but not the handle's lifecycle flag
        assert!(hub.is_working());
        hub.stop();
        assert!(!hub.is_working());
    }

    #[tokio::test]
    async fn test_exhausted_hub_ignores_later_values() {
        let seen: Seen = Arc::default();
        let always: ProcessorRef<u32> = ProcessorFn::arc("always", |v: u32| async move {
            if v < 100 {
                panic!("cannot take {v}");
            }
            Ok::<_, ProcessError>(Some(v))
        });
        let cfg = Config {
            recovery: Recovery::Limited(2),
            ..Config::default()
        };
        let hub = Hub::new(cfg, [recorder(&seen), always]);
        let mut events = hub.subscribe();

        let (tx, feed) = feed::channel::<u32>(8);
        hub.attach(feed.clone()).await.unwrap();
        for v in [0, 1, 2] {
            tx.send(v).await.unwrap();
        }
        next_kind(&mut events, EventKind::WorkerExhausted).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

        // the feed is back at rest and nothing serves it any more
        for v in [5, 6] {
            tx.send(v).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(!feed.is_attached());

        let (_tx2, other) = feed::channel::<u32>(1);
        assert!(matches!(hub.attach(other).await, Err(HubError::HubStopped { .. })));
        assert!(hub.is_working());
    }

    #[tokio::test]
    async fn test_attach_awaited_on_own_worker_aborts_it() {
        let hub: Hub<u32> = Hub::new(
            Config {
                recovery: Recovery::Always,
                ..Config::default()
            },
            Vec::new(),
        );
        let mut events = hub.subscribe();

        let me = hub.clone();
        let reenter: ProcessorRef<u32> = ProcessorFn::arc("reenter", move |v: u32| {
            let me = me.clone();
            async move {
                let (_tx, other) = feed::channel::<u32>(1);
                let _ = me.attach(other).await;
                Ok::<_, ProcessError>(Some(v))
            }
        });
        hub.processors().append(reenter);

        let (tx, feed) = feed::channel::<u32>(1);
        hub.attach(feed).await.unwrap();
        tx.send(1).await.unwrap();

        let ev = next_kind(&mut events, EventKind::WorkerAborted).await;
        assert!(
            ev.reason
                .as_deref()
                .unwrap_or_default()
                .contains("membership change awaited from inside its own worker")
        );
    }

    #[tokio::test]
    async fn test_every_budgeted_fault_restarts_until_exhausted() {
        let failing: ProcessorRef<u32> = ProcessorFn::arc("failing", |_v: u32| async move {
            Err::<Option<u32>, _>(ProcessError::fail("nope"))
        });
        let cfg = Config {
            recovery: Recovery::Limited(3),
            ..Config::default()
        };
        let hub = Hub::new(cfg, [failing]);
        let mut events = hub.subscribe();

        let (tx, feed) = feed::channel::<u32>(8);
        hub.attach(feed).await.unwrap();
        for v in 0..4 {
            tx.send(v).await.unwrap();
        }

        let mut restarts = 0;
        timeout(Duration::from_secs(2), async {
            loop {
                let ev = events.recv().await.unwrap();
                match ev.kind {
                    EventKind::WorkerRestarted => restarts += 1,
                    EventKind::WorkerExhausted => break,
                    _ => {}
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(restarts, 3);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_even_with_unbounded_budget() {
        let fatal: ProcessorRef<u32> = ProcessorFn::arc("fatal", |_v: u32| async move {
            Err::<Option<u32>, _>(ProcessError::fatal("corrupt"))
        });
        let cfg = Config {
            recovery: Recovery::Always,
            ..Config::default()
        };
        let hub = Hub::new(cfg, [fatal]);
        let mut events = hub.subscribe();

        let (tx, feed) = feed::channel::<u32>(1);
        hub.attach(feed).await.unwrap();
        tx.send(1).await.unwrap();

        let ev = next_kind(&mut events, EventKind::WorkerAborted).await;
        assert!(ev.reason.as_deref().unwrap_or_default().contains("corrupt"));
    }

    #[tokio::test]
    async fn test_processor_may_edit_its_own_chain() {
        let seen: Seen = Arc::default();
        let hub = Hub::new(Config::default(), [recorder(&seen)]);

        let weak = Arc::downgrade(&hub.inner);
        let once: ProcessorRef<u32> = ProcessorFn::arc("once", move |v: u32| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.chain.remove("once");
                }
                Ok::<_, ProcessError>(Some(v + 1000))
            }
        });
        hub.processors().insert_before("record", once);

        let (tx, feed) = feed::channel::<u32>(4);
        hub.attach(feed).await.unwrap();
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        wait_for(&seen, 2).await;

        assert_eq!(*seen.lock().unwrap(), vec![1001, 2]);
        assert_eq!(hub.processors().describe(), "record");
    }

    #[tokio::test]
    async fn test_stopped_hub_drains_once_feeds_close() {
        let hub: Hub<u32> = Hub::new(Config::default(), Vec::new());
        let mut events = hub.subscribe();

        let (tx, feed) = feed::channel::<u32>(1);
        hub.attach(feed).await.unwrap();
        hub.stop();
        drop(tx);

        next_kind(&mut events, EventKind::WorkerDrained).await;
    }
}
