//! Facade Network Protocol
//!
//! Endpoints and DTOs for the public HTTP surface. Bodies are JSON; read
//! responses embed the storage envelope directly.

use serde::{Deserialize, Serialize};

/// Public key routes mount under this prefix.
pub const ENDPOINT_KEY: &str = "/key";
/// Leader identity endpoint.
pub const ENDPOINT_LEADER: &str = "/leader";
/// Membership endpoint; only meaningful on the leader.
pub const ENDPOINT_JOIN: &str = "/join";

/// Body for create (POST) and update (PUT) requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Opaque value; interpretation is the caller's.
    pub value: String,
    /// TTL in seconds; `0` means the record never expires.
    #[serde(default)]
    pub ttl: u64,
}

/// Leader identity, as this node sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderResponse {
    pub is_leader: bool,
    /// Consensus address of the current leader, or empty when unknown.
    pub leader_is: String,
}

/// Body for `/join`. `addr` is the joining node's consensus address; the
/// facade address rides along so followers can forward writes to it if it
/// ever leads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub addr: String,
    #[serde(default)]
    pub http_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub success: bool,
}

/// Error body returned by every failing facade call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The `/`-prefixed key (or endpoint) the error relates to.
    pub cause: String,
    pub error: String,
}
