//! # Hub and group configuration.
//!
//! [`Config`] centralizes the settings of one hub (and the group built on it):
//! diagnostic name, internal queue capacity, recovery budget and event bus size.
//!
//! ## Sentinel values
//! - `name = ""` → a generated name (`group-<id>` / `hub-<id>`)
//! - `channel_capacity = 0` → clamped to 1
//! - `bus_capacity = 0` → clamped to 1
//!
//! # Example
//! ```
//! use streamhub::{Config, Recovery};
//!
//! let mut cfg = Config::default();
//! cfg.name = "ingest".into();
//! cfg.recovery = Recovery::Limited(3);
//!
//! assert_eq!(cfg.channel_capacity, 12);
//! assert_eq!(cfg.name_or("fallback"), "ingest");
//! ```

use crate::policies::Recovery;

/// Default capacity of a group's process queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 12;

/// Configuration of one hub.
///
/// ## Field semantics
/// - `name`: diagnostic label; also the name of a group's interceptor in the chain
/// - `channel_capacity`: bound on the group's process queue (min 1)
/// - `recovery`: how many worker restarts are allowed after processing faults
/// - `bus_capacity`: event bus ring buffer size (min 1)
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over sprinkling sentinel
/// checks across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Diagnostic label (`""` = generated).
    pub name: String,

    /// Capacity of the internal bounded queues.
    pub channel_capacity: usize,

    /// Recovery budget applied to the dispatch worker.
    ///
    /// Charged once per processing fault (panic or [`ProcessError::Fail`](crate::ProcessError)).
    pub recovery: Recovery,

    /// Capacity of the event bus broadcast channel.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` events
    /// observe `Lagged` and skip older items.
    pub bus_capacity: usize,
}

impl Config {
    /// Returns the configured name, or `fallback` when none was set.
    #[inline]
    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.name.is_empty() {
            fallback
        } else {
            &self.name
        }
    }

    /// Returns the channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn channel_capacity_clamped(&self) -> usize {
        self.channel_capacity.max(1)
    }

    /// Returns the bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `name = ""` (generated)
    /// - `channel_capacity = 12`
    /// - `recovery = Recovery::Never`
    /// - `bus_capacity = 256`
    fn default() -> Self {
        Self {
            name: String::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            recovery: Recovery::default(),
            bus_capacity: 256,
        }
    }
}
