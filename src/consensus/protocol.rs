//! Consensus RPC protocol.
//!
//! Endpoint constants and DTOs for the inter-node consensus transport.
//! Requests and responses travel as bincode bodies over HTTP POST; the
//! public facade never exposes these routes.

use serde::{Deserialize, Serialize};

use super::types::{LogEntry, LogIndex, Peer, Term};

/// Endpoint for leader election vote requests.
pub const ENDPOINT_VOTE: &str = "/raft/vote";
/// Endpoint for log replication and heartbeats.
pub const ENDPOINT_APPEND: &str = "/raft/append";
/// Endpoint for bringing a lagging follower up from a snapshot.
pub const ENDPOINT_SNAPSHOT: &str = "/raft/snapshot";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    /// Consensus address of the candidate.
    pub candidate: String,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    /// Consensus address of the responding node.
    pub voter: String,
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    /// The leader's identity, so followers can report and forward to it.
    pub leader: Peer,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// Highest log index on the follower after this call. Lets the leader
    /// jump `next_index` back in one round trip on conflict.
    pub last_log_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub leader: Peer,
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
    pub peers: Vec<Peer>,
    /// Full key -> encoded record state.
    pub data: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
}
