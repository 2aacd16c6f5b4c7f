//! Incremental log synchronization for fleetdiag
//!
//! Transfers directories of append-only log files from fleet nodes to the
//! controller, moving only bytes not seen before:
//!
//! - [`LogSynchronizer`] drives a cycle per node: digest what is cached
//!   locally, one remote round trip to compare, then tail or full fetches
//! - [`scan::evaluate`] is the node-side comparison, exported so transport
//!   agents can run it next to the files
//! - [`LocalExecutor`] serves nodes co-located with the controller without
//!   a channel hop
//!
//! Truncated or rotated remote files are detected by content hashing and
//! refetched whole; an unreachable node degrades to the previously
//! synchronized copies.

mod error;
pub mod local;
pub mod scan;
mod sync;

pub use error::{Error, Result};
pub use local::LocalExecutor;
pub use sync::LogSynchronizer;
