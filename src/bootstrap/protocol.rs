//! Bootstrap wire format.
//!
//! Announcements are double-encoded: the inner message is bincode, wrapped
//! in a signed payload, wrapped in a channel envelope. The transport treats
//! everything below the envelope as opaque bytes.

use serde::{Deserialize, Serialize};

/// Channel on which starting nodes announce themselves.
pub const JOIN_CHANNEL: &str = "qkv.cluster.join";

/// Transport frame: routes opaque bytes to a named channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub body: Vec<u8>,
}

/// A message plus its shared-secret signature. The signature is empty when
/// the cluster runs without a secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub body: Vec<u8>,
    pub signature: String,
}

/// A starting node introducing itself to whoever currently leads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announce {
    /// Instance id, so a node can ignore its own announcements.
    pub node_id: String,
    pub raft_addr: String,
    pub http_addr: String,
}
