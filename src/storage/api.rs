//! Storage API
//!
//! The policy layer over the replicated map: overwrite rules, expiration
//! visibility, TTL tracking, and the leader-only eviction loop. The
//! consensus store below it is a dumb map; everything with an opinion
//! lives here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::consensus::store::ConsensusStore;
use crate::error::StoreError;

use super::ttl::{SnapshotStatus, TtlIndex};
use super::types::{now_secs, Action, KeyValueAPIObject, NodeValue, TtlIndexElement, TTL_SNAPSHOT_KEY};

pub struct StorageAPI {
    store: Arc<ConsensusStore>,
    ttl_index: TtlIndex,
    ttl_chunk_size: usize,
}

impl StorageAPI {
    pub fn new(store: Arc<ConsensusStore>, ttl_chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            ttl_index: TtlIndex::new(),
            ttl_chunk_size,
        })
    }

    pub fn store(&self) -> &Arc<ConsensusStore> {
        &self.store
    }

    /// Sets a new record only if no live record occupies `key`. An expired
    /// record in the slot is silently overwritten.
    pub async fn create_key(
        &self,
        key: &str,
        value: &str,
        ttl: u64,
    ) -> Result<KeyValueAPIObject, StoreError> {
        let node = self.set_key(key, NodeValue::new(key, value, ttl), false).await?;
        Ok(KeyValueAPIObject::new(Action::Created, node))
    }

    /// Sets a record, overwriting unconditionally.
    pub async fn update_key(
        &self,
        key: &str,
        value: &str,
        ttl: u64,
    ) -> Result<KeyValueAPIObject, StoreError> {
        let node = self.set_key(key, NodeValue::new(key, value, ttl), true).await?;
        Ok(KeyValueAPIObject::new(Action::Updated, node))
    }

    /// Fetches and decodes the record for `key`. With the default read
    /// policy an expired record reports as not found even before the
    /// eviction loop removes it.
    pub fn get_key(
        &self,
        key: &str,
        even_if_expired: bool,
    ) -> Result<KeyValueAPIObject, StoreError> {
        let raw = self.get_raw(key)?;
        let node = NodeValue::decode_from_storage(&raw)?;

        if node.is_expired(now_secs()) && !even_if_expired {
            tracing::debug!("key {} exists but has expired", key);
            return Err(StoreError::NotFound);
        }

        Ok(KeyValueAPIObject::new(Action::Get, node))
    }

    /// Unconditional delete. Succeeds even when the key does not exist;
    /// the underlying replicated delete is idempotent.
    pub async fn delete_key(&self, key: &str) -> Result<KeyValueAPIObject, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
        }
        self.store.delete(key).await?;
        Ok(KeyValueAPIObject::new(
            Action::Deleted,
            NodeValue::new(key, "", 0),
        ))
    }

    /// The write primitive behind create and update, also used by the
    /// snapshot writer. Stamps `created`, computes the expiry, encodes and
    /// replicates, then tracks the TTL on the leader.
    pub async fn set_key(
        &self,
        key: &str,
        mut node: NodeValue,
        overwrite: bool,
    ) -> Result<NodeValue, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
        }

        // An expired occupant does not block a create.
        let existing = self.get_raw(key).ok();
        let mut allow_overwrite = overwrite;
        if let Some(raw) = &existing {
            if let Ok(current) = NodeValue::decode_from_storage(raw) {
                if current.is_expired(now_secs()) {
                    allow_overwrite = true;
                }
            }
        }
        if existing.is_some() && !allow_overwrite {
            return Err(StoreError::KeyExists);
        }

        node.key = key.to_string();
        node.calculate_expiry();
        let encoded = node.encode_for_storage()?;

        self.store.set(key, encoded).await?;

        if node.ttl > 0 && key != TTL_SNAPSHOT_KEY && self.store.is_leader() {
            self.ttl_index.track(key, node.expiration);
        }

        Ok(node)
    }

    fn get_raw(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
        }
        self.store.get(key).ok_or(StoreError::NotFound)
    }

    // ---- eviction engine ----

    /// Spawns the eviction loop: every `tick`, the leader drains a chunk
    /// of the TTL index and deletes truly expired keys through consensus.
    pub fn spawn_ttl_processor(
        self: &Arc<Self>,
        tick: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tracing::info!("starting TTL processor");
        let api = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                api.process_ttl_tick().await;
            }
            tracing::info!("TTL processor stopped");
        })
    }

    /// One pass of the eviction loop. Public so tests can drive ticks
    /// without waiting out the timer.
    pub async fn process_ttl_tick(&self) {
        if !self.store.is_leader() {
            // Not the leader: the queue is someone else's problem now.
            self.ttl_index.clear();
            return;
        }

        if self.ttl_index.mirror_is_absent() {
            match self.rebuild_from_snapshot() {
                SnapshotStatus::Found => {
                    tracing::info!(
                        "rebuilt TTL queue from snapshot ({} pending)",
                        self.ttl_index.len()
                    );
                }
                SnapshotStatus::NotFound => {
                    tracing::info!("no TTL snapshot, starting fresh");
                    self.store_ttl_snapshot().await;
                }
                SnapshotStatus::NotLeader => return,
            }
        }

        self.process_chunk().await;
        self.store_ttl_snapshot().await;
    }

    /// Rebuilds the index from the reserved snapshot key. Reads with
    /// `even_if_expired` so the snapshot record itself can never report as
    /// expired. A corrupt snapshot falls back to a fresh index; only
    /// pending-TTL bookkeeping is lost, never user data.
    fn rebuild_from_snapshot(&self) -> SnapshotStatus {
        if !self.store.is_leader() {
            return SnapshotStatus::NotLeader;
        }

        let envelope = match self.get_key(TTL_SNAPSHOT_KEY, true) {
            Ok(envelope) => envelope,
            Err(StoreError::NotFound) => {
                self.ttl_index.rebuild_from(Vec::new());
                return SnapshotStatus::NotFound;
            }
            Err(e) => {
                tracing::error!("failed to read TTL snapshot: {}", e);
                self.ttl_index.rebuild_from(Vec::new());
                return SnapshotStatus::NotFound;
            }
        };

        match serde_json::from_str::<HashMap<String, TtlIndexElement>>(&envelope.node.value) {
            Ok(map) => {
                self.ttl_index.rebuild_from(map.into_values().collect());
                SnapshotStatus::Found
            }
            Err(e) => {
                tracing::error!("failed to decode TTL snapshot: {}", e);
                self.ttl_index.rebuild_from(Vec::new());
                SnapshotStatus::NotFound
            }
        }
    }

    /// Examines up to `ttl_chunk_size` elements from the head of the
    /// queue. Elements that leave the queue for good are removed from the
    /// mirror by identity; deferred elements keep their mirror entry.
    async fn process_chunk(&self) {
        let max = self.ttl_chunk_size.min(self.ttl_index.len());
        let mut processed: Vec<TtlIndexElement> = Vec::new();

        for _ in 0..max {
            let Some(element) = self.ttl_index.pop() else {
                tracing::debug!("end of TTL queue");
                break;
            };

            match self.get_key(&element.key, true) {
                Err(_) => {
                    // Deleted out-of-band (or undecodable): nothing to evict.
                    processed.push(element);
                }
                Ok(envelope) => {
                    if envelope.node.expiration != element.expires_at {
                        // Overwritten with a new TTL; the newer enqueue
                        // will cover it.
                        tracing::info!("skipping eviction for {}, TTL has changed", element.key);
                        processed.push(element);
                    } else if now_secs() > element.expires_at {
                        tracing::info!("removing {} because expired", element.key);
                        match self.delete_key(&element.key).await {
                            Ok(_) => processed.push(element),
                            Err(e) => {
                                tracing::warn!(
                                    "eviction delete for {} failed, retrying next cycle: {}",
                                    element.key,
                                    e
                                );
                                self.ttl_index.add(element);
                            }
                        }
                    } else {
                        // Not due yet; defer by one full cycle.
                        self.ttl_index.add(element);
                    }
                }
            }
        }

        self.ttl_index.remove_from_mirror(&processed);
    }

    /// Writes the mirror to the reserved key through the normal consensus
    /// path, so a new leader can resume eviction where this one left off.
    async fn store_ttl_snapshot(&self) {
        if !self.store.is_leader() {
            return;
        }
        let Some(mirror) = self.ttl_index.snapshot_copy() else {
            return;
        };

        let encoded = match serde_json::to_string(&mirror) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("failed to encode TTL snapshot: {}", e);
                return;
            }
        };

        let node = NodeValue::new(TTL_SNAPSHOT_KEY, &encoded, 0);
        if let Err(e) = self.set_key(TTL_SNAPSHOT_KEY, node, true).await {
            tracing::warn!("TTL snapshot write failed, retrying next tick: {}", e);
        }
    }

    /// Test hook into the index state.
    pub fn ttl_index(&self) -> &TtlIndex {
        &self.ttl_index
    }
}
