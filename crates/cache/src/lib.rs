//! Result caching for fleet diagnostics
//!
//! This crate keeps a collection run moving when nodes are slow or absent:
//!
//! - [`ResultCache`] bounds every remote computation with a caller-supplied
//!   deadline and falls back to the last known value instead of blocking
//! - [`CacheSweeper`] reclaims on-disk cache directories left behind by
//!   nodes that were removed from the fleet
//!
//! Neither type performs remote I/O itself; computations arrive as futures
//! and channel liveness comes from the [`fleetdiag_core::ChannelStatus`]
//! seam. This crate defines no error type: every operation here resolves
//! to a value and reports trouble through logging alone.

mod result;
mod sweeper;

pub use result::{CachedValue, ResultCache};
pub use sweeper::{CacheSweeper, SweepReport};
