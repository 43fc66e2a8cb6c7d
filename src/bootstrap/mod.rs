//! Bootstrap Module
//!
//! Membership discovery over a pub/sub channel. A starting node announces
//! itself until it sees a leader; every node listens, and whichever one
//! currently leads invites the announcer with a consensus `Join`. Payloads
//! are HMAC-signed when the cluster is configured with a shared secret.
//!
//! The transport is deliberately opaque: anything with at-least-once
//! delivery works. See [`transport::PubSub`].

pub mod protocol;
pub mod transport;


use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::consensus::store::ConsensusStore;
use crate::consensus::types::Peer;
use crate::verifier::HmacVerifier;

use protocol::{Announce, SignedPayload, JOIN_CHANNEL};
use transport::PubSub;

/// How often an unjoined node re-announces itself.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Glue between the pub/sub channel and the consensus membership.
pub struct Bootstrap {
    bus: Arc<dyn PubSub>,
    verifier: Option<HmacVerifier>,
    node_id: String,
}

impl Bootstrap {
    pub fn new(bus: Arc<dyn PubSub>, shared_secret: Option<&str>) -> Self {
        Self {
            bus,
            verifier: shared_secret.map(HmacVerifier::new),
            node_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Listens for announcements and, while this node leads, invites each
    /// announcer into the cluster.
    pub async fn spawn_listener(
        &self,
        store: Arc<ConsensusStore>,
        shutdown: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let mut rx = self
            .bus
            .subscribe(JOIN_CHANNEL)
            .await
            .context("subscribing to the join channel")?;
        let verifier = self.verifier.clone();
        let node_id = self.node_id.clone();

        Ok(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    payload = rx.recv() => payload,
                };
                let Some(payload) = payload else { break };
                let Some(announce) = decode_announce(&payload, verifier.as_ref()) else {
                    continue;
                };
                if announce.node_id == node_id {
                    continue;
                }
                if !store.is_leader() {
                    continue;
                }
                tracing::info!(
                    "inviting announced node {} ({})",
                    announce.raft_addr,
                    announce.node_id
                );
                let peer = Peer::new(&announce.raft_addr, &announce.http_addr);
                if let Err(e) = store.join(peer).await {
                    tracing::warn!("join invitation for {} failed: {}", announce.raft_addr, e);
                }
            }
        }))
    }

    /// Announces this node on the channel until a leader is known.
    pub fn spawn_announcer(
        &self,
        store: Arc<ConsensusStore>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let bus = self.bus.clone();
        let verifier = self.verifier.clone();
        let announce = Announce {
            node_id: self.node_id.clone(),
            raft_addr: store.identity().raft_addr.clone(),
            http_addr: store.identity().http_addr.clone(),
        };

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ANNOUNCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if store.is_leader() || store.leader_address().is_some() {
                    tracing::info!("cluster joined, stopping announcements");
                    break;
                }
                match encode_announce(&announce, verifier.as_ref()) {
                    Ok(payload) => {
                        if let Err(e) = bus.publish(JOIN_CHANNEL, payload).await {
                            tracing::warn!("announce publish failed: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to encode announcement: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

fn encode_announce(announce: &Announce, verifier: Option<&HmacVerifier>) -> Result<Vec<u8>> {
    let body = bincode::serialize(announce).context("encoding announce")?;
    let signature = verifier.map(|v| v.sign(&body)).unwrap_or_default();
    bincode::serialize(&SignedPayload { body, signature }).context("encoding signed payload")
}

fn decode_announce(payload: &[u8], verifier: Option<&HmacVerifier>) -> Option<Announce> {
    let signed: SignedPayload = match bincode::deserialize(payload) {
        Ok(signed) => signed,
        Err(e) => {
            tracing::debug!("dropping malformed announcement: {}", e);
            return None;
        }
    };
    if let Some(verifier) = verifier {
        if verifier.verify(&signed.body, &signed.signature).is_err() {
            tracing::warn!("dropping announcement with bad signature");
            return None;
        }
    }
    match bincode::deserialize(&signed.body) {
        Ok(announce) => Some(announce),
        Err(e) => {
            tracing::debug!("dropping undecodable announcement: {}", e);
            None
        }
    }
}
