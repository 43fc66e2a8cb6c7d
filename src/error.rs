//! Error kinds surfaced by the store.
//!
//! Every public storage and consensus operation returns one of these. The
//! HTTP facade maps them onto status codes; nothing below the facade retries
//! on its own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Key absent, or present but expired under the default read policy.
    #[error("key not found")]
    NotFound,

    /// Create attempted against a live (non-expired) key.
    #[error("key already exists")]
    KeyExists,

    /// Write attempted on a follower. Carries the leader's consensus
    /// address when one is known.
    #[error("not the leader (leader is {leader:?})")]
    NotLeader { leader: Option<String> },

    /// Empty or reserved key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A stored record failed to decode. Distinct from `NotFound` so
    /// corruption is distinguishable from absence.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The consensus operation could not complete (no quorum, I/O failure).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True when a write failed only because this node is not the leader.
    pub fn is_not_leader(&self) -> bool {
        matches!(self, StoreError::NotLeader { .. })
    }
}
