//! The node-side half of a synchronization cycle
//!
//! [`evaluate`] compares a directory of log files against the digests the
//! controller already holds and decides, per file, what needs to move. It
//! runs wherever the files actually live: the co-located executor calls it
//! directly, and a transport agent on a worker links against this crate and
//! calls it there.

use fleetdiag_core::{FetchDirective, ScanRequest};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Decide a [`FetchDirective`] for every file in `dir` matching the request
/// filter.
///
/// - prefix match and equal length: `Complete`, nothing to transfer
/// - prefix match and the file here is longer: `Offset(digest length)`,
///   transfer the tail
/// - anything else (no digest, mismatched prefix, or a file now *shorter*
///   than the digest, meaning rotation to a fresh file reusing the name):
///   `Offset(0)`, transfer everything
///
/// A file that cannot be hashed is reported as `Offset(0)` rather than
/// failing the scan.
pub fn evaluate(
    dir: &Path,
    request: &ScanRequest,
) -> std::io::Result<BTreeMap<String, FetchDirective>> {
    let mut plan = BTreeMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(plan),
        Err(err) => return Err(err),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !request.filter.matches(&name) {
            continue;
        }
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }

        let directive = match request.cached.get(&name) {
            Some(digest) => match digest.is_partial_match(&path) {
                Ok(true) if meta.len() == digest.length => FetchDirective::Complete,
                Ok(true) => FetchDirective::Offset(digest.length),
                Ok(false) => FetchDirective::Offset(0),
                Err(err) => {
                    warn!(file = %name, error = %err, "unable to hash log file; sending it whole");
                    FetchDirective::Offset(0)
                }
            },
            None => FetchDirective::Offset(0),
        };
        plan.insert(name, directive);
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetdiag_core::{FileDigest, NameFilter};
    use std::fs;
    use tempfile::TempDir;

    fn request(dir: &Path, cached: BTreeMap<String, FileDigest>) -> ScanRequest {
        ScanRequest {
            directory: dir.to_string_lossy().into_owned(),
            filter: NameFilter::logs(),
            cached,
        }
    }

    #[test]
    fn unknown_files_are_sent_whole() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("agent.log"), b"hello").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let plan = evaluate(dir.path(), &request(dir.path(), BTreeMap::new())).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.get("agent.log"), Some(&FetchDirective::Offset(0)));
    }

    #[test]
    fn unchanged_file_is_complete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        fs::write(&path, b"hello world").unwrap();

        let mut cached = BTreeMap::new();
        cached.insert("agent.log".to_string(), FileDigest::of_file(&path).unwrap());

        let plan = evaluate(dir.path(), &request(dir.path(), cached)).unwrap();
        assert_eq!(plan.get("agent.log"), Some(&FetchDirective::Complete));
    }

    #[test]
    fn appended_file_yields_a_tail_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        fs::write(&path, b"hello").unwrap();
        let digest = FileDigest::of_file(&path).unwrap();
        fs::write(&path, b"hello world").unwrap();

        let mut cached = BTreeMap::new();
        cached.insert("agent.log".to_string(), digest);

        let plan = evaluate(dir.path(), &request(dir.path(), cached)).unwrap();
        assert_eq!(plan.get("agent.log"), Some(&FetchDirective::Offset(5)));
    }

    #[test]
    fn mismatched_prefix_is_sent_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        fs::write(&path, b"hello").unwrap();
        let digest = FileDigest::of_file(&path).unwrap();
        fs::write(&path, b"jello world").unwrap();

        let mut cached = BTreeMap::new();
        cached.insert("agent.log".to_string(), digest);

        let plan = evaluate(dir.path(), &request(dir.path(), cached)).unwrap();
        assert_eq!(plan.get("agent.log"), Some(&FetchDirective::Offset(0)));
    }

    #[test]
    fn rotated_shorter_file_is_sent_whole() {
        // The file shrank but still matches as a prefix of the old copy;
        // that is a rotation, not an up-to-date cache.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        fs::write(&path, b"hello world").unwrap();
        let digest = FileDigest::of_file(&path).unwrap();
        fs::write(&path, b"hello").unwrap();

        let mut cached = BTreeMap::new();
        cached.insert("agent.log".to_string(), digest);

        let plan = evaluate(dir.path(), &request(dir.path(), cached)).unwrap();
        assert_eq!(plan.get("agent.log"), Some(&FetchDirective::Offset(0)));
    }

    #[test]
    fn missing_directory_is_an_empty_plan() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        let plan = evaluate(&gone, &request(&gone, BTreeMap::new())).unwrap();
        assert!(plan.is_empty());
    }
}
