//! Client seam for the hierarchical coordination service

use crate::error::Result;
use tokio::sync::broadcast;

/// Watch notifications delivered on the coordination client's event
/// thread, separate from request-processing threads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A node's payload changed.
    DataChanged(String),
    /// A node's child list changed.
    ChildrenChanged(String),
    /// A node disappeared.
    NodeDeleted(String),
    /// Connectivity to the cluster was lost.
    Disconnected,
    /// Connectivity came back; cached state may be stale.
    Reconnected,
}

/// A connection to one coordination cluster (the role ZooKeeper plays):
/// a watch-capable key/value tree with ephemeral and persistent nodes.
///
/// Implementations apply their own client-side timeouts; no cancellation
/// is layered on top here.
#[async_trait::async_trait]
pub trait CoordinationClient: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Tear down the session. Ephemeral nodes owned by it disappear.
    /// Safe to call repeatedly, and before `connect`.
    async fn close(&self);

    /// Create an ephemeral node tied to this session's liveness.
    async fn create_ephemeral(&self, path: &str, payload: &[u8]) -> Result<()>;

    /// Create an ephemeral node with a monotonically increasing sequence
    /// suffix; returns the full path actually created.
    async fn create_ephemeral_sequential(&self, prefix: &str, payload: &[u8]) -> Result<String>;

    /// Create a persistent node, ignoring an already-existing one.
    async fn create_persistent_if_absent(&self, path: &str) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Replace a node's payload, creating the node (persistent) when it
    /// does not exist yet.
    async fn set_data(&self, path: &str, payload: &[u8]) -> Result<()>;

    /// Node payload, or `None` when the node does not exist.
    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Child node names (not full paths) under a node, or `None` when the
    /// node itself does not exist.
    async fn children(&self, path: &str) -> Result<Option<Vec<String>>>;

    /// Subscribe to watch events for the whole tree.
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}
