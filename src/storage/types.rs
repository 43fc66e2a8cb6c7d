//! Stored record types and their storage codec.
//!
//! A `NodeValue` is the unit of replicated data. Records are encoded with a
//! compact MessagePack map (field names included) so the on-disk consensus
//! snapshots stay readable across releases.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Reserved key holding the TTL snapshot. The spelling is part of the wire
/// format; renaming it would orphan snapshots written by older nodes.
pub const TTL_SNAPSHOT_KEY: &str = "TCF_TTL_SNAPHOT";

/// What a storage operation did, as reported in the response envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
    Get,
    Deleted,
}

/// A stored record: opaque value plus its TTL bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeValue {
    pub key: String,
    pub value: String,
    /// TTL in seconds. `0` means the record never expires.
    pub ttl: u64,
    /// Unix seconds, assigned when the record is written.
    pub created: i64,
    /// Unix seconds, `created + ttl` when `ttl > 0`; unused otherwise.
    pub expiration: i64,
}

impl NodeValue {
    pub fn new(key: &str, value: &str, ttl: u64) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
            created: 0,
            expiration: 0,
        }
    }

    /// Stamps `created` with the current time and recomputes `expiration`.
    pub fn calculate_expiry(&mut self) {
        self.created = now_secs();
        self.expiration = if self.ttl > 0 {
            self.created + self.ttl as i64
        } else {
            0
        };
    }

    /// True when the record carries a TTL whose deadline has passed.
    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl > 0 && now > self.expiration
    }

    pub fn encode_for_storage(&self) -> Result<Vec<u8>, StoreError> {
        rmp_serde::to_vec_named(self).map_err(|e| StoreError::Encoding(e.to_string()))
    }

    pub fn decode_from_storage(raw: &[u8]) -> Result<Self, StoreError> {
        rmp_serde::from_slice(raw).map_err(|e| StoreError::Encoding(e.to_string()))
    }
}

/// Envelope returned by every storage operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueAPIObject {
    pub action: Action,
    pub node: NodeValue,
}

impl KeyValueAPIObject {
    pub fn new(action: Action, node: NodeValue) -> Self {
        Self { action, node }
    }
}

/// A pending expiration, queued on the leader and mirrored into the TTL
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlIndexElement {
    pub key: String,
    /// Unix seconds, copied from `NodeValue.expiration` at enqueue time.
    pub expires_at: i64,
    /// Monotonic position at insertion. Informational.
    pub index: u64,
}

/// Current unix time in whole seconds.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
