//! Groups: hubs that can be called, notified and scheduled.
//!
//! ## Contents
//! - [`Group`] serial execution context over a [`Hub`](crate::Hub), built by [`GroupBuilder`]
//! - [`DelegatingGroup`] a group that can lend a feed to another group
//! - [`Return`], [`Payload`], [`Envelope`] and handler types
//! - [`lift`] adapts a `DataProcessor<T>` to a group chain

mod builder;
mod call;
mod delegate;
mod handle;
mod interceptor;

pub use builder::GroupBuilder;
pub use call::{CallHandler, Directive, Envelope, EventHandler, Payload, Return};
pub use delegate::DelegatingGroup;
pub use handle::Group;
pub use interceptor::{Lifted, lift};
