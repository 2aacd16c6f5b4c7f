//! Error types for the logsync crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use fleetdiag_core::RemoteError;
use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for synchronization operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Local I/O error with path context
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(fleetdiag::logsync::io),
        help("Check file permissions and ensure the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "append", "rename")
        operation: String,
    },

    /// A remote call failed
    #[error(transparent)]
    #[diagnostic(code(fleetdiag::logsync::remote))]
    Remote(#[from] RemoteError),

    /// A synchronization cycle gave up entirely
    #[error("log synchronization failed for node {node}")]
    #[diagnostic(
        code(fleetdiag::logsync::failed),
        help("The underlying cause was logged by the synchronization task")
    )]
    SyncFailed {
        /// Name of the node whose cycle failed
        node: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a whole-cycle failure error
    #[must_use]
    pub fn sync_failed(node: impl Into<String>) -> Self {
        Self::SyncFailed { node: node.into() }
    }
}

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, Error>;
