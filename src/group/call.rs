//! # Call results and the directives a group sends to itself.
//!
//! [`Return`] is the result of a call handler or slow call. A group's own process
//! queue carries [`Directive`]s; together with user data they form the
//! [`Envelope`] that flows through the group's chain.
//!
//! ## Directive kinds
//! ```text
//! AsyncCall       slow work to run off-worker; its result comes back as AsyncReturn
//! AsyncReturn     a slow call's result; the callback runs in-worker
//! AsyncEventCall  a call handler to run in-worker; the result fills a oneshot slot
//! EventCall       an event handler to run in-worker; nothing comes back
//! ```

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::BoxError;

/// Type-erased argument or result value.
pub type Payload = Box<dyn Any + Send>;

/// Handler registered with [`Group::listen_event`](crate::Group::listen_event).
pub type EventHandler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Handler registered with [`Group::listen_call`](crate::Group::listen_call).
pub type CallHandler = Arc<dyn Fn(Payload) -> Return + Send + Sync>;

pub(crate) type SlowWork = Box<dyn FnOnce() -> BoxFuture<'static, Return> + Send>;
pub(crate) type Callback = Box<dyn FnOnce(Return) + Send>;

/// # Result of a call handler or a slow call.
///
/// Either part may be empty. A default `Return` (no value, no error) is what
/// `call` hands back for an unregistered event.
///
/// # Example
/// ```
/// use streamhub::{HubError, Return};
///
/// let ok = Return::with_value(42u32);
/// assert!(ok.is_ok());
/// assert_eq!(ok.value_ref::<u32>(), Some(&42));
///
/// let failed = Return::failed(HubError::ChannelClosed);
/// assert_eq!(failed.error_as::<HubError>(), Some(&HubError::ChannelClosed));
/// ```
#[derive(Debug, Default)]
pub struct Return {
    /// Produced value, if any.
    pub value: Option<Payload>,
    /// Error, if the call failed.
    pub error: Option<BoxError>,
}

impl Return {
    /// A successful result carrying `value`.
    pub fn with_value(value: impl Any + Send) -> Self {
        Self {
            value: Some(Box::new(value)),
            error: None,
        }
    }

    /// A failed result.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self {
            value: None,
            error: Some(error.into()),
        }
    }

    /// `true` if no error is set.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Borrows the value as `V`.
    pub fn value_ref<V: Any>(&self) -> Option<&V> {
        self.value.as_ref()?.downcast_ref::<V>()
    }

    /// Takes the value as `V`; `None` if absent or of another type.
    pub fn downcast<V: Any>(self) -> Option<V> {
        self.value?.downcast::<V>().ok().map(|v| *v)
    }

    /// Borrows the error as `E`.
    pub fn error_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.error.as_deref()?.downcast_ref::<E>()
    }
}

/// A message a group sends to itself through its process queue.
///
/// Opaque: only the group's interceptor can build and run one.
pub struct Directive(pub(crate) Kind);

pub(crate) enum Kind {
    AsyncCall {
        work: SlowWork,
        callback: Option<Callback>,
    },
    AsyncReturn {
        ret: Return,
        callback: Option<Callback>,
    },
    AsyncEventCall {
        handler: CallHandler,
        arg: Payload,
        slot: oneshot::Sender<Return>,
    },
    EventCall {
        handler: EventHandler,
        arg: Payload,
    },
}

impl Directive {
    pub(crate) fn label(&self) -> &'static str {
        match self.0 {
            Kind::AsyncCall { .. } => "async_call",
            Kind::AsyncReturn { .. } => "async_return",
            Kind::AsyncEventCall { .. } => "async_event_call",
            Kind::EventCall { .. } => "event_call",
        }
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Directive").field(&self.label()).finish()
    }
}

/// What flows through a group's chain: user data or a group directive.
///
/// Directives are consumed by the group's first stage; user processors added
/// through [`lift`](crate::group::lift) only ever see `Data`.
#[derive(Debug)]
pub enum Envelope<T> {
    /// A value from an attached feed.
    Data(T),
    /// An internal message from the group's process queue.
    Directive(Directive),
}
