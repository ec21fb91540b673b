//! # streamhub
//!
//! **Streamhub** fans any number of input feeds into one serial worker per hub
//! and pushes every value through an ordered, runtime-editable processor chain.
//!
//! On top of that, a [`Group`] turns a hub into a small actor: other code can
//! call into it and wait for a result, emit fire-and-forget events, run slow work
//! off-worker with the callback coming back in-worker, and schedule timers. A
//! [`DelegatingGroup`] can lend one of its feeds to another group and take it back.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  producers                       Hub<M>
//!  ┌────────┐   Feed<T>   ┌───────────────────────────────────────────┐
//!  │ tx  A  ├────────────►│  control (unbounded) ── attach / detach   │
//!  └────────┘             │        │                                  │
//!  ┌────────┐   Feed<T>   │        ▼                                  │
//!  │ tx  B  ├────────────►│  worker: StreamMap<FeedId, feed>          │
//!  └────────┘             │        │  one value at a time             │
//!                         │        ▼                                  │
//!                         │  ProcessorChain (copy-on-write snapshot)  │
//!                         │   stage 1 ─► stage 2 ─► ... ─► stage N    │
//!                         └────────┬──────────────────────────────────┘
//!                                  ▼
//!                         Bus (broadcast events) ─► subscribe()
//! ```
//!
//! ### Faults
//! ```text
//! stage panics / Err(Fail)  ─► value dropped ─► Recovery budget
//!                                               ├─ left    ─► WorkerRestarted, keep serving
//!                                               └─ spent   ─► WorkerExhausted, worker ends
//! Misuse / Err(Fatal)       ─► WorkerAborted, worker ends (never budgeted)
//! ```
//!
//! ## Features
//! | Area          | Description                                              | Key types                                   |
//! |---------------|----------------------------------------------------------|---------------------------------------------|
//! | **Feeds**     | Cloneable handles over tokio mpsc receivers              | [`Feed`], [`feed::channel`], [`feed::probe`] |
//! | **Chain**     | Named async stages, copy-on-write edits                  | [`DataProcessor`], [`ProcessorFn`], [`ProcessorChain`] |
//! | **Hub**       | One serial worker over a dynamic feed set                | [`Hub`]                                     |
//! | **Groups**    | Calls, events, slow calls, timers, delegation            | [`Group`], [`GroupBuilder`], [`DelegatingGroup`] |
//! | **Policies**  | Worker restarts after processing faults                  | [`Recovery`]                                |
//! | **Events**    | Runtime events for observers                             | [`Event`], [`EventKind`]                    |
//! | **Errors**    | Typed errors and misuse payloads                         | [`HubError`], [`ProcessError`], [`Misuse`]  |
//!
//! ## Example
//! ```rust
//! use streamhub::{feed, Group, Payload, ProcessError, ProcessorFn, ProcessorRef, Return};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let print: ProcessorRef<String> = ProcessorFn::arc("print", |line: String| async move {
//!         println!("{line}");
//!         Ok::<_, ProcessError>(None)
//!     });
//!
//!     let g: Group<String> = Group::builder().with_name("console").with_processor(print).build();
//!     g.listen_call("len", |arg: Payload| match arg.downcast::<String>() {
//!         Ok(s) => Return::with_value(s.len()),
//!         Err(_) => Return::failed("expected a String"),
//!     });
//!
//!     let (tx, lines) = feed::channel::<String>(16);
//!     g.attach(lines).await.unwrap();
//!     tx.send("hello".into()).await.unwrap();
//!
//!     let (ret, registered) = g.call("len", String::from("hello")).await;
//!     assert!(registered);
//!     assert_eq!(ret.downcast::<usize>(), Some(5));
//!     g.stop();
//! }
//! ```
mod chain;
mod config;
mod error;
mod events;
pub mod feed;
pub mod group;
mod hub;
mod policies;

// ---- Public re-exports ----

pub use chain::{Cursor, DataProcessor, NAME_SEPARATOR, ProcessorChain, ProcessorFn, ProcessorRef};
pub use config::{Config, DEFAULT_CHANNEL_CAPACITY};
pub use error::{BoxError, HubError, Misuse, ProcessError};
pub use events::{Event, EventKind};
pub use feed::{Feed, FeedId};
pub use group::{DelegatingGroup, Envelope, Group, GroupBuilder, Payload, Return};
pub use hub::{Hub, HubId};
pub use policies::Recovery;
