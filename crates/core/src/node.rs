//! Node identity and stable on-disk cache keys

use md5::{Digest, Md5};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of an execution target in the fleet.
///
/// Two identities refer to the same cache subject iff both `name` and
/// `root_path` match; `is_local` is a transport hint and does not take part
/// in equality or key derivation. A node whose root path changes (e.g. the
/// agent was reinstalled elsewhere) is a new cache subject.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Logical node name, unique within the fleet.
    pub name: String,
    /// Root path of the node's working area on its own filesystem.
    pub root_path: String,
    /// True when the node is co-located with the controller and its
    /// filesystem is directly reachable (no remote hop needed).
    pub is_local: bool,
}

impl NodeIdentity {
    /// A regular remote node.
    #[must_use]
    pub fn new(name: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.into(),
            is_local: false,
        }
    }

    /// A node co-located with the controller.
    #[must_use]
    pub fn local(name: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            is_local: true,
            ..Self::new(name, root_path)
        }
    }
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.root_path == other.root_path
    }
}

impl Eq for NodeIdentity {}

impl Hash for NodeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.root_path.hash(state);
    }
}

/// Short deterministic digest of a [`NodeIdentity`], used to name the node's
/// on-disk cache directory.
///
/// The key is the rightmost 8 hex characters of `md5("<name>:<root_path>")`.
/// It is stable across reconnects of the same logical node. Truncating to 8
/// characters makes collisions between distinct nodes possible in principle;
/// this is an accepted risk, the same one the full key length would only
/// push further out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a node. Pure, no I/O, no failure modes.
    #[must_use]
    pub fn of(node: &NodeIdentity) -> Self {
        let digest = Md5::digest(format!("{}:{}", node.name, node.root_path).as_bytes());
        let hex = hex::encode(digest);
        Self(hex[hex.len() - 8..].to_string())
    }

    /// The 8-hex-character form used as a directory name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets a `HashSet<CacheKey>` be probed with the raw directory name read
// back from disk.
impl std::borrow::Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
