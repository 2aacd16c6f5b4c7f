//! Cache directory resolution and tunables
//!
//! Synchronized log copies live under `<cache_root>/<slot>/<node key>/`.
//! The root resolves from `FLEETDIAG_CACHE_DIR` when set, otherwise the
//! platform cache directory plus `/fleetdiag`.

use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock bound for a single remote computation, overridable via
/// `FLEETDIAG_REMOTE_DEADLINE_MS`.
pub const DEFAULT_REMOTE_DEADLINE_MS: u64 = 500;

/// Get the cache root for fleetdiag.
///
/// Resolution order:
/// 1. `FLEETDIAG_CACHE_DIR` environment variable
/// 2. Platform cache directory + `/fleetdiag`
///
/// # Errors
///
/// Returns an error if the cache directory cannot be determined.
pub fn cache_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("FLEETDIAG_CACHE_DIR")
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    let base = dirs::cache_dir()
        .ok_or_else(|| Error::configuration("Could not determine cache directory"))?;

    Ok(base.join("fleetdiag"))
}

/// Directory for one cache slot (one remote directory full of log files
/// retrieved in one go; different directories need different slots).
pub fn slot_dir(slot: &str) -> Result<PathBuf> {
    Ok(cache_root()?.join(slot))
}

/// The deadline applied to remote computations when the caller does not pick
/// its own: `FLEETDIAG_REMOTE_DEADLINE_MS` if set and parsable, otherwise
/// [`DEFAULT_REMOTE_DEADLINE_MS`].
#[must_use]
pub fn default_remote_deadline() -> Duration {
    let ms = std::env::var("FLEETDIAG_REMOTE_DEADLINE_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_REMOTE_DEADLINE_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_root_default() {
        temp_env::with_var_unset("FLEETDIAG_CACHE_DIR", || {
            let dir = cache_root().expect("cache_root should succeed");
            assert!(
                dir.ends_with("fleetdiag"),
                "Should end with fleetdiag: {:?}",
                dir
            );
        });
    }

    #[test]
    fn cache_root_override() {
        let test_dir = "/tmp/fleetdiag-test-cache";
        temp_env::with_var("FLEETDIAG_CACHE_DIR", Some(test_dir), || {
            let dir = cache_root().expect("cache_root should succeed");
            assert_eq!(dir, PathBuf::from(test_dir));
        });
    }

    #[test]
    fn slot_dir_is_under_root() {
        let test_dir = "/tmp/fleetdiag-test-cache";
        temp_env::with_var("FLEETDIAG_CACHE_DIR", Some(test_dir), || {
            let dir = slot_dir("node-logs").expect("slot_dir should succeed");
            assert_eq!(dir, PathBuf::from(test_dir).join("node-logs"));
        });
    }

    #[test]
    fn deadline_default_and_override() {
        temp_env::with_var_unset("FLEETDIAG_REMOTE_DEADLINE_MS", || {
            assert_eq!(default_remote_deadline(), Duration::from_millis(500));
        });
        temp_env::with_var("FLEETDIAG_REMOTE_DEADLINE_MS", Some("2000"), || {
            assert_eq!(default_remote_deadline(), Duration::from_millis(2000));
        });
        temp_env::with_var("FLEETDIAG_REMOTE_DEADLINE_MS", Some("junk"), || {
            assert_eq!(default_remote_deadline(), Duration::from_millis(500));
        });
    }
}
