//! Dispatch hub: one worker multiplexing a dynamic set of feeds into a processor chain.
//!
//! ## Contents
//! - [`Hub`], [`HubId`] the public handle
//! - `membership` control records and wait-set members
//! - `worker` the dispatch loop, fault containment and recovery budget
//!
//! ## Flow
//! ```text
//! Hub::add / attach ──► control (unbounded mpsc) ──┐
//!                                                  ▼
//! Feed A ──┐                               ┌─ Worker ─────────────────────┐
//! Feed B ──┼──► StreamMap<FeedId, member> ─┤  biased select: control, data │
//! Feed C ──┘                               │  chain.cursor() per value     │
//!                                          └──────────────┬───────────────┘
//!                                                         ▼
//!                                                   events::Bus
//! ```

mod handle;
mod membership;
mod worker;

pub use handle::{Hub, HubId};
pub(crate) use worker::{current_hub, panic_message};
