//! Reclaiming on-disk cache state for departed nodes
//!
//! Every node that ever synchronized logs owns a directory named by its
//! [`CacheKey`] under a slot root. Nodes leave the fleet; their directories
//! do not. The sweeper reconciles the slot root against the active key set
//! and deletes the rest, off the request path so an in-progress collection
//! never waits on filesystem deletion latency.
//!
//! A sweep may race with a synchronization cycle for a key that was removed
//! from the active set moments ago. The worst case is a straggling write
//! that is lost with the directory; this is accepted rather than locked
//! around.

use fleetdiag_core::{CacheKey, FleetDirectory, active_keys};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Stale directories deleted.
    pub removed: usize,
    /// Directories belonging to active nodes, left alone.
    pub kept: usize,
    /// Directories that could not be deleted; retried on the next sweep.
    pub failed: usize,
    /// Bytes reclaimed.
    pub bytes_freed: u64,
}

/// Sweeper for one slot root.
#[derive(Debug, Clone)]
pub struct CacheSweeper {
    root: PathBuf,
}

impl CacheSweeper {
    /// Sweeper over the given slot root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The slot root this sweeper reconciles.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete every cache-key directory not in `active`, on a background
    /// blocking worker. The handle can be awaited for the report or dropped;
    /// the sweep finishes either way.
    pub fn sweep(&self, active: HashSet<CacheKey>) -> JoinHandle<SweepReport> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || sweep_dir(&root, &active))
    }

    /// Periodically recompute the active key set from the fleet directory
    /// and sweep. The first pass runs immediately; the loop runs until
    /// stopped through [`JoinHandle::abort`].
    pub fn spawn_periodic<D>(&self, fleet: Arc<D>, every: Duration) -> JoinHandle<()>
    where
        D: FleetDirectory + 'static,
    {
        let root = self.root.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let active = active_keys(fleet.as_ref());
                let root = root.clone();
                match tokio::task::spawn_blocking(move || sweep_dir(&root, &active)).await {
                    Ok(report) if report.removed > 0 || report.failed > 0 => {
                        info!(
                            removed = report.removed,
                            failed = report.failed,
                            bytes_freed = report.bytes_freed,
                            "cache sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "cache sweep did not complete"),
                }
            }
        })
    }
}

fn sweep_dir(root: &Path, active: &HashSet<CacheKey>) -> SweepReport {
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(root = %root.display(), "cache root does not exist; nothing to sweep");
            return report;
        }
        Err(err) => {
            warn!(root = %root.display(), error = %err, "unable to list cache root");
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if active.contains(name.as_ref()) {
            debug!(key = %name, "node is active; keeping cache directory");
            report.kept += 1;
            continue;
        }

        let size = dir_size(&path);
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(key = %name, bytes = size, "node left the fleet; cache directory deleted");
                report.removed += 1;
                report.bytes_freed += size;
            }
            Err(err) => {
                warn!(key = %name, error = %err, "unable to delete stale cache directory");
                report.failed += 1;
            }
        }
    }

    report
}

/// Best-effort recursive size; unreadable entries count as zero.
fn dir_size(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if meta.is_file() {
        return meta.len();
    }
    if !meta.is_dir() {
        return 0;
    }
    fs::read_dir(path)
        .map(|entries| entries.flatten().map(|e| dir_size(&e.path())).sum())
        .unwrap_or(0)
}
