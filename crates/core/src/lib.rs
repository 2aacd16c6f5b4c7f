//! Shared foundation of the fleetdiag workspace
//!
//! This crate carries everything both halves of the collection core agree
//! on: how a node is identified and keyed on disk, how file prefixes are
//! digested, the seam to whatever executes work on a node, and where cached
//! state lives on the controller.
//!
//! # Overview
//!
//! - [`NodeIdentity`] / [`CacheKey`]: a node's logical identity and the
//!   stable 8-hex key naming its cache directory
//! - [`FileDigest`]: prefix checksums that let append-only logs transfer
//!   incrementally
//! - [`RemoteExecutor`] / [`FleetDirectory`]: the externally supplied
//!   capabilities: run work on a node, enumerate the fleet
//! - [`paths`]: cache root resolution with environment overrides
//! - [`pool`]: bounded parallel fan-out over the fleet

pub mod digest;
pub mod error;
pub mod node;
pub mod paths;
pub mod pool;
pub mod remote;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use digest::FileDigest;
pub use node::{CacheKey, NodeIdentity};
pub use remote::{
    ChannelStatus, FetchDirective, FleetDirectory, NameFilter, RemoteByteStream, RemoteError,
    RemoteExecutor, RemoteResult, ScanRequest, StreamEncoding, active_keys,
};
