//! In-process coordination tree
//!
//! Backs tests and single-process runs with the same contract a real
//! coordination cluster provides: ephemeral nodes die with their session,
//! sequential nodes get monotonically increasing suffixes, and every
//! mutation fires watch events.

use crate::coordination::{CoordinationClient, WatchEvent};
use crate::error::{RegistryError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
struct Node {
    payload: Vec<u8>,
    /// Owning session for ephemeral nodes; `None` marks persistent.
    owner: Option<u64>,
}

struct Cluster {
    nodes: HashMap<String, Node>,
    next_sequence: u64,
    next_session: u64,
}

/// One session handle onto a shared in-memory tree. [`MemoryCoordination::session`]
/// opens further handles onto the same tree, each owning its own
/// ephemerals.
pub struct MemoryCoordination {
    cluster: Arc<RwLock<Cluster>>,
    events: broadcast::Sender<WatchEvent>,
    session: u64,
    connected: AtomicBool,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cluster: Arc::new(RwLock::new(Cluster {
                nodes: HashMap::new(),
                next_sequence: 0,
                next_session: 1,
            })),
            events,
            session: 0,
            connected: AtomicBool::new(false),
        }
    }

    /// Open another session onto the same tree.
    pub async fn session(&self) -> Self {
        let mut cluster = self.cluster.write().await;
        let session = cluster.next_session;
        cluster.next_session += 1;
        Self {
            cluster: Arc::clone(&self.cluster),
            events: self.events.clone(),
            session,
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::NotConnected)
        }
    }

    fn emit(&self, event: WatchEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn emit_parent_changed(&self, path: &str) {
        if let Some(parent) = parent_of(path) {
            self.emit(WatchEvent::ChildrenChanged(parent.to_string()));
        }
    }

    async fn insert(&self, path: &str, payload: &[u8], owner: Option<u64>) -> Result<()> {
        {
            let mut cluster = self.cluster.write().await;
            if cluster.nodes.contains_key(path) {
                return Err(RegistryError::NodeExists(path.to_string()));
            }
            cluster.nodes.insert(
                path.to_string(),
                Node {
                    payload: payload.to_vec(),
                    owner,
                },
            );
        }
        self.emit_parent_changed(path);
        Ok(())
    }
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').filter(|idx| *idx > 0).map(|idx| &path[..idx])
}

#[async_trait::async_trait]
impl CoordinationClient for MemoryCoordination {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("Memory coordination session {} connected", self.session);
        Ok(())
    }

    async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let dropped: Vec<String> = {
            let mut cluster = self.cluster.write().await;
            let dead: Vec<String> = cluster
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(self.session))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &dead {
                cluster.nodes.remove(path);
            }
            dead
        };

        for path in dropped {
            debug!("Session {} closed, dropping ephemeral {}", self.session, path);
            self.emit(WatchEvent::NodeDeleted(path.clone()));
            self.emit_parent_changed(&path);
        }
    }

    async fn create_ephemeral(&self, path: &str, payload: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        self.insert(path, payload, Some(self.session)).await
    }

    async fn create_ephemeral_sequential(&self, prefix: &str, payload: &[u8]) -> Result<String> {
        self.ensure_connected()?;
        let path = {
            let mut cluster = self.cluster.write().await;
            let sequence = cluster.next_sequence;
            cluster.next_sequence += 1;
            format!("{}{:010}", prefix, sequence)
        };
        self.insert(&path, payload, Some(self.session)).await?;
        Ok(path)
    }

    async fn create_persistent_if_absent(&self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        match self.insert(path, &[], None).await {
            Ok(()) => Ok(()),
            Err(RegistryError::NodeExists(_)) => Ok(()),
            Err(other) => Err(other),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        {
            let mut cluster = self.cluster.write().await;
            if cluster.nodes.remove(path).is_none() {
                return Err(RegistryError::NodeNotFound(path.to_string()));
            }
        }
        self.emit(WatchEvent::NodeDeleted(path.to_string()));
        self.emit_parent_changed(path);
        Ok(())
    }

    async fn set_data(&self, path: &str, payload: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let created = {
            let mut cluster = self.cluster.write().await;
            match cluster.nodes.get_mut(path) {
                Some(node) => {
                    node.payload = payload.to_vec();
                    false
                }
                None => {
                    cluster.nodes.insert(
                        path.to_string(),
                        Node {
                            payload: payload.to_vec(),
                            owner: None,
                        },
                    );
                    true
                }
            }
        };
        if created {
            self.emit_parent_changed(path);
        }
        self.emit(WatchEvent::DataChanged(path.to_string()));
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_connected()?;
        let cluster = self.cluster.read().await;
        Ok(cluster.nodes.get(path).map(|node| node.payload.clone()))
    }

    async fn children(&self, path: &str) -> Result<Option<Vec<String>>> {
        self.ensure_connected()?;
        let cluster = self.cluster.read().await;

        // parent presence is implied by having children; a bare path with
        // neither node nor children reports absent
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut names: Vec<String> = cluster
            .nodes
            .keys()
            .filter_map(|candidate| {
                let leaf = candidate.strip_prefix(&prefix)?;
                if leaf.is_empty() || leaf.contains('/') {
                    None
                } else {
                    Some(leaf.to_string())
                }
            })
            .collect();

        if names.is_empty() && !cluster.nodes.contains_key(path) {
            return Ok(None);
        }
        names.sort();
        Ok(Some(names))
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_connect() {
        let tree = MemoryCoordination::new();
        assert!(matches!(
            tree.create_ephemeral("/a", b"x").await,
            Err(RegistryError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_ephemerals_die_with_their_session() {
        let tree = MemoryCoordination::new();
        tree.connect().await.unwrap();
        tree.create_persistent_if_absent("/runtime").await.unwrap();

        let session = tree.session().await;
        session.connect().await.unwrap();
        session
            .create_ephemeral("/runtime/a", b"payload")
            .await
            .unwrap();
        assert_eq!(
            tree.children("/runtime").await.unwrap(),
            Some(vec!["a".to_string()])
        );

        let mut events = tree.subscribe();
        session.close().await;

        assert_eq!(tree.children("/runtime").await.unwrap(), Some(vec![]));
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::NodeDeleted("/runtime/a".to_string())
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_safe_without_connect() {
        let tree = MemoryCoordination::new();
        tree.close().await;
        tree.connect().await.unwrap();
        tree.close().await;
        tree.close().await;
    }

    #[tokio::test]
    async fn test_sequential_nodes_increase() {
        let tree = MemoryCoordination::new();
        tree.connect().await.unwrap();
        let first = tree
            .create_ephemeral_sequential("/election/member-", b"")
            .await
            .unwrap();
        let second = tree
            .create_ephemeral_sequential("/election/member-", b"")
            .await
            .unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_persistent_create_ignores_existing() {
        let tree = MemoryCoordination::new();
        tree.connect().await.unwrap();
        tree.create_persistent_if_absent("/config/svc").await.unwrap();
        tree.create_persistent_if_absent("/config/svc").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_data_fires_watch() {
        let tree = MemoryCoordination::new();
        tree.connect().await.unwrap();
        let mut events = tree.subscribe();

        tree.set_data("/routes/svc", b"{}").await.unwrap();
        // creation fires ChildrenChanged on the parent first
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::ChildrenChanged("/routes".to_string())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::DataChanged("/routes/svc".to_string())
        );
        assert_eq!(
            tree.get_data("/routes/svc").await.unwrap(),
            Some(b"{}".to_vec())
        );
    }

    #[tokio::test]
    async fn test_missing_nodes_read_as_absent() {
        let tree = MemoryCoordination::new();
        tree.connect().await.unwrap();
        assert_eq!(tree.get_data("/nope").await.unwrap(), None);
        assert_eq!(tree.children("/nope").await.unwrap(), None);
        assert!(matches!(
            tree.delete("/nope").await,
            Err(RegistryError::NodeNotFound(_))
        ));
    }
}
