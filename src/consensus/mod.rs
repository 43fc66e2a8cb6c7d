//! Consensus Module
//!
//! A Raft-style replicated map: leader election, log replication, snapshot
//! compaction, and membership growth through the log itself.
//!
//! ## Core Mechanisms
//! - **Election**: followers campaign after a randomized quiet period; the
//!   candidate with a complete log and a quorum of votes leads the term.
//! - **Replication**: the leader streams AppendEntries over the consensus
//!   HTTP transport; an entry commits once a quorum holds it, then every
//!   member applies it to the same deterministic map.
//! - **Durability**: the log, term/vote state, snapshots and the peer list
//!   persist under the node's raft directory and are recovered on restart.
//! - **Membership**: `Join` replicates a new peer list as an ordinary log
//!   entry, so every member converges on the same view.
//!
//! ## Submodules
//! - **`store`**: the public get/set/delete/leader/join contract.
//! - **`raft`**: the protocol core and its background loops.
//! - **`log`**: file-backed log, hard state, snapshots and peer list.
//! - **`handlers`**: axum handlers for the RPC transport.
//! - **`protocol`**: RPC DTOs and endpoint constants.
//! - **`types`**: peers, commands, log entries.

pub mod handlers;
pub mod log;
pub mod protocol;
pub mod raft;
pub mod store;
pub mod types;
