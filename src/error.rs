//! Error types used by hubs, groups and processors.
//!
//! This module defines three enums:
//!
//! - [`HubError`]: failures of the coordination layer itself (membership changes,
//!   result delivery).
//! - [`ProcessError`]: failures returned by a [`DataProcessor`](crate::DataProcessor)
//!   while handling one value.
//! - [`Misuse`]: programming errors detected at runtime. These are raised as
//!   panic payloads (`std::panic::panic_any`) and abort the worker that observes
//!   them instead of being budgeted as ordinary faults.
//!
//! All of them provide `as_label` for logs and events.

use thiserror::Error;

use crate::feed::FeedId;

/// Boxed error carried by a [`Return`](crate::Return).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # Errors produced by the coordination layer.
///
/// Membership failures are returned synchronously from `attach`/`detach`.
/// Delivery failures never escalate: they surface as the error of a [`Return`](crate::Return).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The result slot was closed before a value was delivered.
    #[error("return channel closed before a value was delivered")]
    ChannelClosed,

    /// The hub no longer accepts membership changes (stopped, or its worker has ended).
    #[error("hub `{hub}` is not accepting membership changes")]
    HubStopped {
        /// Name of the hub.
        hub: String,
    },

    /// The feed is already consumed by a worker (this hub or another one).
    #[error("feed {feed} is already consumed by a worker")]
    FeedBusy {
        /// Identity of the feed.
        feed: FeedId,
    },
}

impl HubError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    ///
    /// # Example
    /// ```
    /// use streamhub::HubError;
    ///
    /// assert_eq!(HubError::ChannelClosed.as_label(), "channel_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HubError::ChannelClosed => "channel_closed",
            HubError::HubStopped { .. } => "hub_stopped",
            HubError::FeedBusy { .. } => "feed_busy",
        }
    }
}

/// # Errors returned by a processor for a single value.
///
/// Both variants drop the value being processed. `Fail` is charged against the
/// hub's recovery budget; `Fatal` stops the worker regardless of the budget.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Processing failed; the worker may restart if the budget allows.
    #[error("processing failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error; the worker stops permanently.
    #[error("fatal processing error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },
}

impl ProcessError {
    /// Shorthand for [`ProcessError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ProcessError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`ProcessError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        ProcessError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Fail { .. } => "processor_failed",
            ProcessError::Fatal { .. } => "processor_fatal",
        }
    }

    /// Indicates whether the worker may be restarted after this error.
    ///
    /// # Example
    /// ```
    /// use streamhub::ProcessError;
    ///
    /// assert!(ProcessError::fail("boom").is_recoverable());
    /// assert!(!ProcessError::fatal("nope").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProcessError::Fail { .. })
    }
}

/// # Programming errors detected at runtime.
///
/// Raised with `std::panic::panic_any`, so code that catches panics can tell
/// them apart from ordinary faults by downcasting the payload.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Misuse {
    /// `Group::call` was awaited from inside the callee's own worker; it would never complete.
    #[error("group `{group}`: call awaited from inside its own worker")]
    ReentrantCall {
        /// Name of the group.
        group: String,
    },

    /// A blocking membership change was awaited from inside the hub's own worker.
    #[error("hub `{hub}`: membership change awaited from inside its own worker")]
    ReentrantMembership {
        /// Name of the hub.
        hub: String,
    },

    /// A second delegation was requested before the first one was reclaimed or cancelled.
    #[error("group `{group}` already delegates a feed; reclaim it first")]
    AlreadyDelegated {
        /// Name of the delegating group.
        group: String,
    },
}

impl Misuse {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            Misuse::ReentrantCall { .. } => "misuse_reentrant_call",
            Misuse::ReentrantMembership { .. } => "misuse_reentrant_membership",
            Misuse::AlreadyDelegated { .. } => "misuse_already_delegated",
        }
    }

    /// Unwinds the current task with `self` as the panic payload.
    pub(crate) fn raise(self) -> ! {
        std::panic::panic_any(self)
    }
}
