//! The replicated map's public contract.
//!
//! `ConsensusStore` is deliberately a dumb map: get, set, delete, leader
//! identity, membership. All overwrite/expiration policy lives above it in
//! the storage layer.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::StoreError;

use super::raft::{RaftConfig, RaftNode};
use super::types::{Command, Peer};

/// Linearizable key -> bytes map replicated across the cluster.
pub struct ConsensusStore {
    node: Arc<RaftNode>,
}

impl ConsensusStore {
    /// Recovers durable state and starts the consensus protocol loops.
    pub fn open(
        id: Peer,
        config: &Config,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let node = RaftNode::new(
            id,
            Path::new(&config.raft_dir),
            config.reset_peers_on_load,
            RaftConfig::from_config(config),
            shutdown,
        )?;
        node.start();
        Ok(Arc::new(Self { node }))
    }

    /// Reads the locally applied value; stale on followers by design.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.node.get(key)
    }

    /// Replicates an overwrite of `key`. Commits durably before returning.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.node
            .propose(Command::Set {
                key: key.to_string(),
                value,
            })
            .await
    }

    /// Replicates a delete of `key`. Idempotent.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.node
            .propose(Command::Delete {
                key: key.to_string(),
            })
            .await
    }

    pub fn is_leader(&self) -> bool {
        self.node.is_leader()
    }

    /// The consensus address of the current leader, when known.
    pub fn leader_address(&self) -> Option<String> {
        self.node.leader().map(|p| p.raft_addr)
    }

    /// The full identity of the current leader, when known.
    pub fn leader(&self) -> Option<Peer> {
        self.node.leader()
    }

    /// Adds a peer to the cluster. Leader-only; idempotent.
    pub async fn join(&self, peer: Peer) -> Result<(), StoreError> {
        self.node.join(peer).await
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.node.peers()
    }

    pub fn identity(&self) -> &Peer {
        self.node.identity()
    }

    pub(crate) fn raft_node(&self) -> Arc<RaftNode> {
        self.node.clone()
    }
}
