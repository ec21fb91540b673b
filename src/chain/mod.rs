//! Processor chain: the ordered pipeline every value of a hub flows through.
//!
//! ## Contents
//! - [`DataProcessor`] one named async stage, [`ProcessorFn`] closure-backed stage
//! - [`ProcessorChain`] copy-on-write ordered collection, [`Cursor`] snapshot traversal
//!
//! ## Flow
//! ```text
//! value ──► stage 1 ──Some(v')──► stage 2 ──Some(v'')──► ... ──► stage N
//!              │                     │
//!              └─ None: consumed     └─ Err: fault (value dropped, budget charged)
//! ```

mod processor;
mod snapshot;

pub use processor::{DataProcessor, ProcessorFn, ProcessorRef};
pub use snapshot::{Cursor, NAME_SEPARATOR, ProcessorChain};
