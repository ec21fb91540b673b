use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::call::Envelope;
use super::delegate::DelegatingGroup;
use super::handle::{Group, Inner};
use super::interceptor::{Interceptor, Launcher, lift};
use crate::chain::ProcessorRef;
use crate::config::Config;
use crate::feed;
use crate::hub::{Hub, HubId};
use crate::policies::Recovery;

/// Builder for a [`Group`] or a [`DelegatingGroup`].
///
/// # Example
/// ```
/// use streamhub::{Group, Recovery};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let g: Group<String> = Group::builder()
///     .with_name("ingest")
///     .with_channel_capacity(32)
///     .with_recovery(Recovery::Always)
///     .build();
/// assert_eq!(g.name(), "ingest");
/// # }
/// ```
pub struct GroupBuilder<T> {
    cfg: Config,
    processors: Vec<ProcessorRef<T>>,
}

impl<T: Send + 'static> Default for GroupBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> GroupBuilder<T> {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::from_config(Config::default())
    }

    /// Creates a builder from an existing configuration.
    pub fn from_config(cfg: Config) -> Self {
        Self {
            cfg,
            processors: Vec::new(),
        }
    }

    /// Sets the group name (default `group-<id>`).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.cfg.name = name.into();
        self
    }

    /// Sets the capacity of the process queue (default 12, min 1).
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.cfg.channel_capacity = capacity;
        self
    }

    /// Sets the recovery budget of the worker (default [`Recovery::Never`]).
    pub fn with_recovery(mut self, recovery: impl Into<Recovery>) -> Self {
        self.cfg.recovery = recovery.into();
        self
    }

    /// Sets the event bus capacity.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.cfg.bus_capacity = capacity;
        self
    }

    /// Appends one user processor after the group's own stage.
    pub fn with_processor(mut self, processor: ProcessorRef<T>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Appends user processors after the group's own stage, in order.
    pub fn with_processors(mut self, processors: impl IntoIterator<Item = ProcessorRef<T>>) -> Self {
        self.processors.extend(processors);
        self
    }

    /// Builds the group and starts its worker.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn build(self) -> Group<T> {
        let id = HubId::next();
        let name = self.cfg.name_or(&format!("group-{}", id.as_u64())).to_string();
        let hub: Hub<Envelope<T>> = Hub::spawn(id, name, &self.cfg, Vec::new());
        let name: Arc<str> = Arc::from(hub.name());

        let (queue, process_feed) = feed::channel(self.cfg.channel_capacity_clamped());
        let launcher = Launcher::new(queue.downgrade(), hub.bus().clone(), Arc::clone(&name));

        let chain = hub.processors();
        chain.append(Arc::new(Interceptor::new(Arc::clone(&name), launcher.clone())));
        for processor in self.processors {
            let stage = processor.name().to_string();
            if !chain.append(lift(processor)) {
                warn!(group = %name, processor = %stage, "duplicate processor name, skipped");
            }
        }

        if let Err(err) = hub.add_map(process_feed, Envelope::Directive, || {}) {
            warn!(group = %name, error = %err, "process queue not attached");
        }
        debug!(group = %name, chain = %chain, "group built");

        Group {
            inner: Arc::new(Inner {
                hub,
                queue: RwLock::new(Some(queue)),
                launcher,
                events: RwLock::new(HashMap::new()),
                calls: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Builds a group that can hand its feeds to other groups.
    pub fn build_delegating(self) -> DelegatingGroup<T> {
        DelegatingGroup::new(self.build())
    }
}
