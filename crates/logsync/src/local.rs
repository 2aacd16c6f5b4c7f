//! Executor for nodes co-located with the controller
//!
//! The controller itself (and anything else flagged [`NodeIdentity::is_local`])
//! needs no channel: its log directories sit on the local filesystem. This
//! executor serves exactly those nodes with direct reads and reports every
//! other node as having no channel.

use async_trait::async_trait;
use fleetdiag_core::{
    ChannelStatus, FetchDirective, NameFilter, NodeIdentity, RemoteByteStream, RemoteError,
    RemoteExecutor, RemoteResult, ScanRequest,
};
use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};
use std::path::Path;

/// Serves local roots directly; no transport, no transit compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    fn ensure_local(node: &NodeIdentity) -> RemoteResult<()> {
        if node.is_local {
            Ok(())
        } else {
            Err(RemoteError::Disconnected)
        }
    }
}

impl ChannelStatus for LocalExecutor {
    fn is_connected(&self, node: &NodeIdentity) -> bool {
        node.is_local
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn scan_logs(
        &self,
        node: &NodeIdentity,
        request: ScanRequest,
    ) -> RemoteResult<BTreeMap<String, FetchDirective>> {
        Self::ensure_local(node)?;
        tokio::task::spawn_blocking(move || {
            crate::scan::evaluate(Path::new(&request.directory), &request)
        })
        .await
        .map_err(|e| RemoteError::io("scan", e))?
        .map_err(|e| RemoteError::io("scan", e))
    }

    async fn open_read(
        &self,
        node: &NodeIdentity,
        path: &str,
        offset: u64,
    ) -> RemoteResult<RemoteByteStream> {
        Self::ensure_local(node)?;
        let path = path.to_string();
        tokio::task::spawn_blocking(move || -> std::io::Result<RemoteByteStream> {
            let mut file = std::fs::File::open(&path)?;
            file.seek(SeekFrom::Start(offset))?;
            Ok(RemoteByteStream::identity(Box::new(file)))
        })
        .await
        .map_err(|e| RemoteError::io("read", e))?
        .map_err(|e| RemoteError::io("read", e))
    }

    async fn list_files(
        &self,
        node: &NodeIdentity,
        directory: &str,
        filter: &NameFilter,
    ) -> RemoteResult<Vec<String>> {
        Self::ensure_local(node)?;
        let directory = directory.to_string();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&directory)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if filter.matches(&name) && entry.path().is_file() {
                    names.push(name);
                }
            }
            names.sort();
            Ok(names)
        })
        .await
        .map_err(|e| RemoteError::io("list", e))?
        .map_err(|e| RemoteError::io("list", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn only_local_nodes_have_a_channel() {
        let executor = LocalExecutor;
        assert!(executor.is_connected(&NodeIdentity::local("controller", "/var/lib/c")));
        assert!(!executor.is_connected(&NodeIdentity::new("worker", "/var/lib/w")));

        let err = executor
            .list_files(&NodeIdentity::new("worker", "/var/lib/w"), "/tmp", &NameFilter::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Disconnected));
    }

    #[tokio::test]
    async fn reads_start_at_the_requested_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        std::fs::write(&path, b"hello world").unwrap();

        let executor = LocalExecutor;
        let node = NodeIdentity::local("controller", dir.path().to_string_lossy());
        let stream = executor
            .open_read(&node, &path.to_string_lossy(), 6)
            .await
            .unwrap();

        let mut tail = String::new();
        stream.into_reader().read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "world");
    }

    #[tokio::test]
    async fn listing_applies_the_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.log"), b"a").unwrap();
        std::fs::write(dir.path().join("b.log"), b"b").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"c").unwrap();

        let executor = LocalExecutor;
        let node = NodeIdentity::local("controller", dir.path().to_string_lossy());
        let names = executor
            .list_files(&node, &dir.path().to_string_lossy(), &NameFilter::logs())
            .await
            .unwrap();
        assert_eq!(names, vec!["a.log".to_string(), "b.log".to_string()]);
    }
}
