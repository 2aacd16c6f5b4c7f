//! The remote-execution and fleet-membership seams
//!
//! Nothing in this workspace speaks a wire protocol. Everything a node can
//! do for us is funneled through [`RemoteExecutor`], and the embedding
//! application supplies the transport (RPC, SSH, an in-process agent). The
//! request/response types here derive serde so any of those transports can
//! carry them verbatim.

use crate::digest::FileDigest;
use crate::node::{CacheKey, NodeIdentity};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Read;
use thiserror::Error;

/// Failure of an operation crossing the remote boundary.
///
/// Disconnection and timeouts are everyday events in a fleet and are treated
/// as low-severity by every caller in this workspace; none of them escapes a
/// public entry point as a hard error.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The node has no usable channel.
    #[error("node channel is disconnected")]
    Disconnected,

    /// The node is reachable but did not answer in time.
    #[error("remote operation timed out")]
    Timeout,

    /// The operation ran but failed on either side of the channel.
    #[error("remote {operation} failed: {message}")]
    Io {
        /// Operation that failed (e.g., "scan", "read").
        operation: String,
        /// Rendering of the underlying cause.
        message: String,
    },
}

impl RemoteError {
    /// Wrap an underlying failure with the operation that hit it.
    #[must_use]
    pub fn io(operation: impl Into<String>, source: impl fmt::Display) -> Self {
        Self::Io {
            operation: operation.into(),
            message: source.to_string(),
        }
    }
}

/// Result type for remote operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Matcher over plain file names (no directory components).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameFilter {
    /// Every file matches.
    Any,
    /// Name ends with the given suffix (e.g. `".log"`).
    Suffix(String),
    /// Name contains any of the given fragments; rolled files keep their
    /// marker mid-name (`service.out.log.old`), so a suffix test would miss
    /// them.
    Contains(Vec<String>),
    /// Name matches a glob pattern.
    Glob(String),
}

impl NameFilter {
    /// The standard filter for node log directories.
    #[must_use]
    pub fn logs() -> Self {
        Self::Suffix(".log".to_string())
    }

    /// Filter for service-wrapper logs, which roll to `*.out.log.old` /
    /// `*.err.log.old`.
    #[must_use]
    pub fn wrapper_logs() -> Self {
        Self::Contains(vec![".out.log".to_string(), ".err.log".to_string()])
    }

    /// Does `name` pass the filter?
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Suffix(suffix) => name.ends_with(suffix),
            Self::Contains(fragments) => fragments.iter().any(|f| name.contains(f.as_str())),
            Self::Glob(pattern) => glob::Pattern::new(pattern)
                .map(|p| p.matches(name))
                .unwrap_or(false),
        }
    }
}

/// Per-file instruction computed by the remote side of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchDirective {
    /// Local copy is complete; transfer nothing.
    Complete,
    /// Transfer bytes from this offset on; `0` means fetch the whole file.
    Offset(u64),
}

/// Payload of the single list-and-compare call of a synchronization cycle:
/// what the controller already holds, and where to look.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Directory on the node to enumerate.
    pub directory: String,
    /// Which file names count.
    pub filter: NameFilter,
    /// Digests of the controller's cached copies, keyed by file name.
    pub cached: BTreeMap<String, FileDigest>,
}

/// How the bytes of a [`RemoteByteStream`] are encoded in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEncoding {
    /// Raw bytes.
    Identity,
    /// Gzip-compressed; worth it for log text crossing a real channel.
    Gzip,
}

/// Byte stream handed back by [`RemoteExecutor::open_read`].
///
/// Transit compression is a performance detail: [`Self::into_reader`]
/// decompresses transparently, so consumers always see the file's actual
/// bytes.
pub struct RemoteByteStream {
    encoding: StreamEncoding,
    inner: Box<dyn Read + Send>,
}

impl RemoteByteStream {
    /// A stream of raw bytes.
    #[must_use]
    pub fn identity(inner: Box<dyn Read + Send>) -> Self {
        Self {
            encoding: StreamEncoding::Identity,
            inner,
        }
    }

    /// A stream whose transport bytes are gzip-compressed.
    #[must_use]
    pub fn gzip(inner: Box<dyn Read + Send>) -> Self {
        Self {
            encoding: StreamEncoding::Gzip,
            inner,
        }
    }

    /// The transit encoding, mostly of interest to tests and transports.
    #[must_use]
    pub fn encoding(&self) -> StreamEncoding {
        self.encoding
    }

    /// Decode into a reader over the file's actual bytes.
    #[must_use]
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        match self.encoding {
            StreamEncoding::Identity => self.inner,
            StreamEncoding::Gzip => Box::new(GzDecoder::new(self.inner)),
        }
    }
}

impl fmt::Debug for RemoteByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteByteStream")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// Channel liveness, separated out so values that only need the probe (the
/// result cache, tests) do not have to implement the full executor.
pub trait ChannelStatus: Send + Sync {
    /// Whether the node currently has a usable channel.
    fn is_connected(&self, node: &NodeIdentity) -> bool;
}

/// Everything this subsystem asks of a node, with the transport left to the
/// implementor.
#[async_trait]
pub trait RemoteExecutor: ChannelStatus {
    /// Run the list-and-compare step of a synchronization cycle against the
    /// node's filesystem and return one directive per matching file.
    async fn scan_logs(
        &self,
        node: &NodeIdentity,
        request: ScanRequest,
    ) -> RemoteResult<BTreeMap<String, FetchDirective>>;

    /// Open a remote file for reading, starting at `offset`.
    async fn open_read(
        &self,
        node: &NodeIdentity,
        path: &str,
        offset: u64,
    ) -> RemoteResult<RemoteByteStream>;

    /// Plain listing of matching file names in a remote directory.
    async fn list_files(
        &self,
        node: &NodeIdentity,
        directory: &str,
        filter: &NameFilter,
    ) -> RemoteResult<Vec<String>>;
}

/// The externally maintained, authoritative fleet listing.
pub trait FleetDirectory: Send + Sync {
    /// Identities of all currently active nodes.
    fn active_nodes(&self) -> Vec<NodeIdentity>;
}

/// Cache keys of every active node, the set the sweeper preserves.
#[must_use]
pub fn active_keys(fleet: &dyn FleetDirectory) -> HashSet<CacheKey> {
    fleet
        .active_nodes()
        .iter()
        .map(CacheKey::of)
        .collect()
}
