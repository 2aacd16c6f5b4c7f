//! Incremental retrieval of log files from fleet nodes
//!
//! Log files grow by appending, so for each file we look at what we already
//! hold locally and ask the node whether the remote file still starts with
//! the same bytes. If it does, only the tail crosses the channel; a run
//! against an unchanged directory transfers nothing at all.
//!
//! One synchronizer covers one remote directory shape (one cache slot); its
//! on-disk state lives under `<root>/<node key>/<filename>`.

use crate::error::{Error, Result};
use fleetdiag_core::{CacheKey, FetchDirective, NameFilter, NodeIdentity, RemoteExecutor, ScanRequest};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

type SyncedFiles = BTreeMap<String, PathBuf>;
type InFlightSync = Shared<BoxFuture<'static, Option<SyncedFiles>>>;
type InFlightMap = Arc<Mutex<HashMap<CacheKey, InFlightSync>>>;

struct Inner<E> {
    executor: E,
    root: PathBuf,
    filter: NameFilter,
}

/// Incremental synchronizer for one directory of log files per node.
///
/// [`sync`](Self::sync) brings the local cache directory for a node up to
/// date with a remote directory and returns the local copies. Concurrent
/// calls for the same node share one cycle, keeping the cache directory
/// on a single writer at a time; calls for different nodes proceed in
/// parallel.
pub struct LogSynchronizer<E> {
    inner: Arc<Inner<E>>,
    inflight: InFlightMap,
}

impl<E> Clone for LogSynchronizer<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<E> LogSynchronizer<E>
where
    E: RemoteExecutor + 'static,
{
    /// Synchronizer writing under `root`, tracking files that pass `filter`.
    ///
    /// `root` is the slot directory, typically from
    /// [`fleetdiag_core::paths::slot_dir`].
    #[must_use]
    pub fn new(executor: E, root: impl Into<PathBuf>, filter: NameFilter) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                root: root.into(),
                filter,
            }),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The executor this synchronizer calls out through.
    #[must_use]
    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    /// Bring the local cache for `node` up to date with `remote_directory`
    /// and return filename → local path for every file the node reported.
    ///
    /// Ordinary node unavailability is not an error: if the node cannot be
    /// scanned, the previously synchronized copies are returned as-is. A
    /// single file's transfer failure drops that file from the result and
    /// leaves its prior local copy in place. `Err` is reserved for the local
    /// cache directory being unusable.
    pub async fn sync(
        &self,
        node: &NodeIdentity,
        remote_directory: &str,
    ) -> Result<SyncedFiles> {
        let key = CacheKey::of(node);
        let shared = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&key) {
                debug!(node = %node.name, "joining synchronization already in flight");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let map = Arc::clone(&self.inflight);
                let node = node.clone();
                let directory = remote_directory.to_string();
                let task_key = key.clone();
                let task = tokio::spawn(async move {
                    let _clear = InFlightGuard {
                        map,
                        key: task_key,
                    };
                    match sync_cycle(&inner, &node, &directory).await {
                        Ok(files) => Some(files),
                        Err(err) => {
                            warn!(node = %node.name, error = %err, "log synchronization failed");
                            None
                        }
                    }
                });
                let shared: InFlightSync = task.map(|joined| joined.ok().flatten()).boxed().shared();
                inflight.insert(key, shared.clone());
                shared
            }
        };

        shared
            .await
            .ok_or_else(|| Error::sync_failed(&node.name))
    }
}

/// Clears the in-flight marker however the cycle ends.
struct InFlightGuard {
    map: InFlightMap,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.lock().remove(&self.key);
    }
}

async fn sync_cycle<E>(
    inner: &Inner<E>,
    node: &NodeIdentity,
    directory: &str,
) -> Result<SyncedFiles>
where
    E: RemoteExecutor,
{
    let key = CacheKey::of(node);
    let local_dir = inner.root.join(key.as_str());
    tokio::fs::create_dir_all(&local_dir)
        .await
        .map_err(|e| Error::io(e, &local_dir, "create_dir_all"))?;

    // What we already hold, digested at its current length.
    let inventory = {
        let dir = local_dir.clone();
        let filter = inner.filter.clone();
        tokio::task::spawn_blocking(move || local_inventory(&dir, &filter))
            .await
            .map_err(|e| Error::io_no_path(std::io::Error::other(e), "spawn_blocking"))?
            .map_err(|e| Error::io(e, &local_dir, "read_dir"))?
    };

    // One remote round trip decides the whole plan; fetches only start once
    // it is back, so no offset is ever computed against a stale length.
    let request = ScanRequest {
        directory: directory.to_string(),
        filter: inner.filter.clone(),
        cached: inventory.clone(),
    };
    let plan = match inner.executor.scan_logs(node, request).await {
        Ok(plan) => plan,
        Err(err) => {
            warn!(
                node = %node.name,
                error = %err,
                "remote scan failed; serving previously synchronized files"
            );
            return Ok(inventory
                .keys()
                .map(|name| (name.clone(), local_dir.join(name)))
                .collect());
        }
    };

    evict_dead(&local_dir, &inventory, &plan);

    let mut files = SyncedFiles::new();
    for (name, directive) in plan {
        let local = local_dir.join(&name);
        match directive {
            FetchDirective::Complete => {
                files.insert(name, local);
            }
            FetchDirective::Offset(offset) => {
                match fetch_file(inner, node, directory, &name, &local, offset).await {
                    Ok(bytes) => {
                        debug!(node = %node.name, file = %name, bytes, "fetched log file");
                        files.insert(name, local);
                    }
                    Err(err) => {
                        warn!(
                            node = %node.name,
                            file = %name,
                            error = %err,
                            "failed to fetch log file; skipping it"
                        );
                    }
                }
            }
        }
    }
    Ok(files)
}

/// Digest every tracked file in the node's cache directory.
fn local_inventory(
    dir: &Path,
    filter: &NameFilter,
) -> std::io::Result<BTreeMap<String, fleetdiag_core::FileDigest>> {
    let mut inventory = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !filter.matches(&name) {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match fleetdiag_core::FileDigest::of_file(&path) {
            Ok(digest) => {
                inventory.insert(name, digest);
            }
            Err(err) => {
                // No digest means the scan will order a full refetch.
                debug!(file = %path.display(), error = %err, "unreadable cache file");
            }
        }
    }
    Ok(inventory)
}

/// Delete local copies of files the node no longer has.
fn evict_dead(
    local_dir: &Path,
    inventory: &BTreeMap<String, fleetdiag_core::FileDigest>,
    plan: &BTreeMap<String, FetchDirective>,
) {
    for name in inventory.keys() {
        if plan.contains_key(name) {
            continue;
        }
        let dead = local_dir.join(name);
        match fs::remove_file(&dead) {
            Ok(()) => debug!(file = %dead.display(), "removed cache file for rotated-away log"),
            Err(err) => {
                warn!(file = %dead.display(), error = %err, "unable to delete stale cache file");
            }
        }
    }
}

/// Transfer one file per its directive; returns the bytes written locally.
async fn fetch_file<E>(
    inner: &Inner<E>,
    node: &NodeIdentity,
    directory: &str,
    name: &str,
    local: &Path,
    offset: u64,
) -> Result<u64>
where
    E: RemoteExecutor,
{
    let remote_path = remote_child(directory, name);

    // Append only when the directive says tail and a local file is actually
    // there; re-stat rather than trusting the scan, the file may have
    // changed since.
    let append_from = if offset > 0 {
        fs::metadata(local)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    } else {
        None
    };

    if let Some(from) = append_from {
        let stream = inner.executor.open_read(node, &remote_path, from).await?;
        let mut reader = stream.into_reader();
        let dest = local.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
            let mut file = fs::OpenOptions::new().append(true).open(&dest)?;
            std::io::copy(&mut reader, &mut file)
        })
        .await
        .map_err(|e| Error::io_no_path(std::io::Error::other(e), "spawn_blocking"))?
        .map_err(|e| Error::io(e, local, "append"))
    } else {
        let stream = inner.executor.open_read(node, &remote_path, 0).await?;
        let mut reader = stream.into_reader();
        let dest = local.to_path_buf();
        let staging = local.with_file_name(format!(".{name}.part"));
        tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
            let outcome = (|| {
                let mut file = fs::File::create(&staging)?;
                let copied = std::io::copy(&mut reader, &mut file)?;
                drop(file);
                fs::rename(&staging, &dest)?;
                Ok(copied)
            })();
            if outcome.is_err() {
                let _ = fs::remove_file(&staging);
            }
            outcome
        })
        .await
        .map_err(|e| Error::io_no_path(std::io::Error::other(e), "spawn_blocking"))?
        .map_err(|e| Error::io(e, local, "write"))
    }
}

fn remote_child(directory: &str, name: &str) -> String {
    if directory.ends_with('/') {
        format!("{directory}{name}")
    } else {
        format!("{directory}/{name}")
    }
}
