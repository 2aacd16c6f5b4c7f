//! Bounded fan-out of per-node operations
//!
//! Collections touch every node in the fleet, and any one of them may be
//! slow. Operations on distinct nodes are independent, so they run in
//! parallel under a concurrency bound; there is no ordering guarantee across
//! nodes and none is needed.

use crate::node::NodeIdentity;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Run `op` once per node, at most `limit` at a time.
///
/// Results are returned in completion order, paired with the node that
/// produced them. A task that panics is dropped from the results with a
/// warning; the remaining nodes are unaffected.
pub async fn for_each_node<T, F, Fut>(
    nodes: Vec<NodeIdentity>,
    limit: usize,
    op: F,
) -> Vec<(NodeIdentity, T)>
where
    F: Fn(NodeIdentity) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut join_set = JoinSet::new();

    for node in nodes {
        // The semaphore is never closed while we hold it.
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let fut = op(node.clone());
        join_set.spawn(async move {
            let out = fut.await;
            drop(permit);
            (node, out)
        });
    }

    let mut results = Vec::with_capacity(join_set.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(pair) => results.push(pair),
            Err(err) => warn!(error = %err, "per-node task did not complete"),
        }
    }
    results
}
