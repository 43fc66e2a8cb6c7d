//! Core consensus types: peers, commands, log entries.

use serde::{Deserialize, Serialize};

pub type Term = u64;
pub type LogIndex = u64;

/// A cluster member. Peers are identified by their consensus address; the
/// HTTP address is carried alongside so followers can forward client writes
/// to the leader's facade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Peer {
    /// Consensus RPC address (`host:port`).
    pub raft_addr: String,
    /// Public facade address (`host:port`).
    pub http_addr: String,
}

impl Peer {
    pub fn new(raft_addr: &str, http_addr: &str) -> Self {
        Self {
            raft_addr: raft_addr.to_string(),
            http_addr: http_addr.to_string(),
        }
    }
}

/// A replicated command. Application is deterministic: `Set` overwrites,
/// `Delete` is idempotent, `SetPeers` replaces the membership view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
    SetPeers { peers: Vec<Peer> },
}

/// One entry in the replicated log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Command,
}

/// Consensus role of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}
