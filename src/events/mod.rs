//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by hubs and groups.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `hub::worker` (membership, faults, restarts), `Hub::stop`,
//!   slow-call tasks spawned by a group's interceptor (panics).
//! - **Consumers**: whoever calls `Hub::subscribe()` / `Group::subscribe()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
