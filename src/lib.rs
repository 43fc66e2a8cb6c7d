//! Replicated, strongly-consistent key-value store with TTL eviction.
//!
//! All writes flow through an elected leader and are applied by every
//! member through a replicated command log; reads come from local applied
//! state. Keys written with a TTL are hidden the moment they expire and
//! physically removed by a leader-only eviction loop whose pending set
//! survives leader changes via a snapshot stored in the map itself.
//!
//! ## Architecture Modules
//! - **`consensus`**: the Raft-style replicated map. Elections, log
//!   replication, snapshot compaction, and membership growth.
//! - **`storage`**: the policy layer. Record codec, overwrite and
//!   expiration rules, the TTL index and its eviction engine.
//! - **`http`**: the public facade. CRUD on `/key/{k}`, `/leader` and
//!   `/join`, with follower writes proxied to the leader.
//! - **`bootstrap`**: pub/sub membership discovery so new nodes find the
//!   current leader at startup.
//! - **`node`**: assembly of the above into a runnable `StoreNode`.

pub mod bootstrap;
pub mod config;
pub mod consensus;
pub mod error;
pub mod http;
pub mod node;
pub mod storage;
pub mod verifier;

pub use config::Config;
pub use error::StoreError;
pub use node::StoreNode;
