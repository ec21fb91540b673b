//! # The group's own chain stages.
//!
//! [`Interceptor`] sits first in every group chain, named after the group. It
//! runs the directives the group sends to itself and never forwards them.
//! [`Lifted`] adapts a user `DataProcessor<T>` to the group's `Envelope<T>` chain.
//!
//! Slow work never runs on the worker: [`Launcher`] spawns it on a tokio task and
//! feeds the result back through the process queue as an `AsyncReturn`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::call::{Callback, Directive, Envelope, Kind, Return, SlowWork};
use crate::chain::{DataProcessor, ProcessorRef};
use crate::error::{HubError, ProcessError};
use crate::events::{Bus, Event, EventKind};
use crate::hub::panic_message;

/// Spawns slow work and re-injects its result into a group's process queue.
#[derive(Clone)]
pub(crate) struct Launcher {
    queue: mpsc::WeakSender<Directive>,
    bus: Bus,
    group: Arc<str>,
}

impl Launcher {
    pub(crate) fn new(queue: mpsc::WeakSender<Directive>, bus: Bus, group: Arc<str>) -> Self {
        Self { queue, bus, group }
    }

    /// Runs `work` on a fresh task.
    ///
    /// Without a callback the result is discarded. If the queue is gone by the
    /// time the result is ready, it is dropped silently.
    pub(crate) fn launch(&self, work: SlowWork, callback: Option<Callback>) {
        let this = self.clone();
        tokio::spawn(async move {
            let ret = match AssertUnwindSafe(async move { work().await }).catch_unwind().await {
                Ok(ret) => ret,
                Err(panic_err) => {
                    let info = panic_message(panic_err.as_ref());
                    warn!(group = %this.group, panic = %info, "slow call panicked");
                    this.bus.publish(
                        Event::new(EventKind::SlowCallPanicked)
                            .with_hub(Arc::clone(&this.group))
                            .with_reason(info),
                    );
                    Return::failed(HubError::ChannelClosed)
                }
            };

            if callback.is_none() {
                return;
            }
            let Some(queue) = this.queue.upgrade() else {
                trace!(group = %this.group, "process queue closed, slow call result dropped");
                return;
            };
            if queue
                .send(Directive(Kind::AsyncReturn { ret, callback }))
                .await
                .is_err()
            {
                trace!(group = %this.group, "process queue closed, slow call result dropped");
            }
        });
    }
}

/// First stage of a group chain; consumes every directive.
pub(crate) struct Interceptor {
    name: Arc<str>,
    launcher: Launcher,
}

impl Interceptor {
    pub(crate) fn new(name: Arc<str>, launcher: Launcher) -> Self {
        Self { name, launcher }
    }

    fn execute(&self, directive: Directive) {
        match directive.0 {
            Kind::AsyncCall { work, callback } => self.launcher.launch(work, callback),
            Kind::AsyncReturn { ret, callback } => {
                if let Some(callback) = callback {
                    callback(ret);
                }
            }
            Kind::AsyncEventCall { handler, arg, slot } => {
                // the caller may have given up waiting
                let _ = slot.send(handler(arg));
            }
            Kind::EventCall { handler, arg } => handler(arg),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> DataProcessor<Envelope<T>> for Interceptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_data(&self, data: Envelope<T>) -> Result<Option<Envelope<T>>, ProcessError> {
        match data {
            Envelope::Data(value) => Ok(Some(Envelope::Data(value))),
            Envelope::Directive(directive) => {
                self.execute(directive);
                Ok(None)
            }
        }
    }
}

/// A `DataProcessor<T>` running inside a group's `Envelope<T>` chain.
pub struct Lifted<T> {
    inner: ProcessorRef<T>,
}

#[async_trait]
impl<T: Send + 'static> DataProcessor<Envelope<T>> for Lifted<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn on_data(&self, data: Envelope<T>) -> Result<Option<Envelope<T>>, ProcessError> {
        match data {
            Envelope::Data(value) => Ok(self.inner.on_data(value).await?.map(Envelope::Data)),
            other => Ok(Some(other)),
        }
    }
}

/// Wraps a processor of `T` so it can be added to a group's chain.
///
/// # Example
/// ```
/// use streamhub::{group, Group, ProcessError, ProcessorFn, ProcessorRef};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let g: Group<u32> = Group::builder().with_name("lifted").build();
/// let log: ProcessorRef<u32> = ProcessorFn::arc("log", |v: u32| async move {
///     Ok::<_, ProcessError>(Some(v))
/// });
/// g.processors().append(group::lift(log));
/// assert_eq!(g.processors().describe(), "lifted/log");
/// # }
/// ```
pub fn lift<T: Send + 'static>(processor: ProcessorRef<T>) -> ProcessorRef<Envelope<T>> {
    Arc::new(Lifted { inner: processor })
}
