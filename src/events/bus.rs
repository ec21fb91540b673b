//! # Broadcast of hub events.
//!
//! Every hub owns one [`Bus`]. Its worker, its handle and the slow-call tasks of
//! a group all publish into it; `subscribe()` hands out independent receivers.
//!
//! ```text
//! dispatch worker ──┐
//! Hub::stop()     ──┼──► Bus (tokio broadcast) ──► Hub::subscribe() / Group::subscribe()
//! slow-call task  ──┘
//! ```
//!
//! Publishing never waits. The ring buffer is shared by all receivers; one that
//! falls behind sees `RecvError::Lagged(n)`. Events published while nobody is
//! subscribed are gone.

use tokio::sync::broadcast;

use super::event::Event;

/// Cloneable, fire-and-forget publisher of [`Event`]s.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus buffering up to `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, ev: Event) {
        // no receivers is not an error
        let _ = self.tx.send(ev);
    }

    /// A receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
