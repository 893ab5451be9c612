//! Leader election over ephemeral-sequential node ordering
//!
//! A distinct capability layered on the coordination client, used with
//! the transaction-coordinator registration: every contender enlists an
//! ephemeral-sequential member node, and whoever holds the smallest
//! sequence is the leader. A leader's crash drops its ephemeral node and
//! promotes the next contender automatically.

use crate::coordination::CoordinationClient;
use crate::error::{RegistryError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const MEMBER_PREFIX: &str = "member-";

pub struct LeaderElection {
    client: Arc<dyn CoordinationClient>,
    /// Election root, e.g. `/election/GlobalTransactionService`.
    path: String,
    member: RwLock<Option<String>>,
}

impl LeaderElection {
    pub fn new(client: Arc<dyn CoordinationClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            member: RwLock::new(None),
        }
    }

    /// Join the election. Idempotent: a handle that already enlisted
    /// keeps its member node.
    pub async fn enlist(&self, payload: &[u8]) -> Result<()> {
        let mut member = self.member.write().await;
        if member.is_some() {
            return Ok(());
        }

        let prefix = format!("{}/{}", self.path, MEMBER_PREFIX);
        let created = self
            .client
            .create_ephemeral_sequential(&prefix, payload)
            .await?;
        info!("Enlisted in election {} as {}", self.path, created);
        *member = Some(created);
        Ok(())
    }

    /// Whether this handle currently holds the leadership: its member
    /// node carries the smallest sequence among live contenders.
    pub async fn is_leader(&self) -> Result<bool> {
        let member = self.member.read().await;
        let mine = match member.as_deref() {
            Some(path) => match path.rsplit('/').next() {
                Some(name) => name.to_string(),
                None => return Ok(false),
            },
            None => return Ok(false),
        };

        let mut contenders = self
            .client
            .children(&self.path)
            .await?
            .ok_or_else(|| RegistryError::NodeNotFound(self.path.clone()))?;
        contenders.retain(|name| name.starts_with(MEMBER_PREFIX));
        contenders.sort();

        let leader = match contenders.first() {
            Some(name) => name,
            None => return Ok(false),
        };
        debug!("Election {}: leader is {}", self.path, leader);
        Ok(*leader == mine)
    }

    /// Leave the election, handing leadership to the next contender.
    pub async fn withdraw(&self) {
        let mut member = self.member.write().await;
        if let Some(path) = member.take() {
            // session teardown would reap it anyway
            let _ = self.client.delete(&path).await;
            info!("Withdrew {} from election {}", path, self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCoordination;

    const PATH: &str = "/election/GlobalTransactionService";

    async fn contender(tree: &MemoryCoordination) -> (Arc<MemoryCoordination>, LeaderElection) {
        let session = Arc::new(tree.session().await);
        session.connect().await.unwrap();
        let election = LeaderElection::new(
            Arc::clone(&session) as Arc<dyn CoordinationClient>,
            PATH,
        );
        (session, election)
    }

    #[tokio::test]
    async fn test_first_enlisted_leads() {
        let tree = MemoryCoordination::new();
        let (_s1, first) = contender(&tree).await;
        let (_s2, second) = contender(&tree).await;

        first.enlist(b"a").await.unwrap();
        second.enlist(b"b").await.unwrap();

        assert!(first.is_leader().await.unwrap());
        assert!(!second.is_leader().await.unwrap());
    }

    #[tokio::test]
    async fn test_leadership_moves_when_leader_session_dies() {
        let tree = MemoryCoordination::new();
        let (leader_session, first) = contender(&tree).await;
        let (_s2, second) = contender(&tree).await;

        first.enlist(b"a").await.unwrap();
        second.enlist(b"b").await.unwrap();

        // ephemeral member dies with its session
        leader_session.close().await;
        assert!(second.is_leader().await.unwrap());
    }

    #[tokio::test]
    async fn test_withdraw_promotes_next_contender() {
        let tree = MemoryCoordination::new();
        let (_s1, first) = contender(&tree).await;
        let (_s2, second) = contender(&tree).await;

        first.enlist(b"a").await.unwrap();
        second.enlist(b"b").await.unwrap();
        first.withdraw().await;

        assert!(!first.is_leader().await.unwrap());
        assert!(second.is_leader().await.unwrap());
    }

    #[tokio::test]
    async fn test_enlist_is_idempotent() {
        let tree = MemoryCoordination::new();
        let (session, election) = contender(&tree).await;

        election.enlist(b"a").await.unwrap();
        election.enlist(b"a").await.unwrap();

        let members = session.children(PATH).await.unwrap().unwrap();
        assert_eq!(members.len(), 1);
    }
}
