//! Worker recovery policy.
//!
//! ## Contents
//! - [`Recovery`] how many times a dispatch worker may resume after a processing fault
//!
//! ## Quick wiring
//! ```text
//! Config { recovery: Recovery, .. }
//!      └─► hub::worker uses:
//!           - recovery.budget() once per worker
//!           - budget.consume() on every budgeted fault to decide restart/exit
//! ```

mod recovery;

pub use recovery::Recovery;
pub(crate) use recovery::RecoveryBudget;
