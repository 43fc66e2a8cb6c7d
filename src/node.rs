//! Store node assembly.
//!
//! `StoreNode` wires the pieces together: the consensus store and its RPC
//! server, the Storage API and its eviction loop, the public facade, and
//! the bootstrap glue. Listeners bind before anything else so port-0
//! configs resolve to real addresses that become the node's identity.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::transport::{PubSub, UdpBus};
use crate::bootstrap::Bootstrap;
use crate::config::Config;
use crate::consensus;
use crate::consensus::store::ConsensusStore;
use crate::consensus::types::Peer;
use crate::http;
use crate::http::protocol::{JoinRequest, ENDPOINT_JOIN};
use crate::storage::api::StorageAPI;

/// One running member of the cluster.
pub struct StoreNode {
    config: Config,
    storage: Arc<StorageAPI>,
    store: Arc<ConsensusStore>,
    http_addr: SocketAddr,
    raft_addr: SocketAddr,
    shutdown: CancellationToken,
    eviction_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StoreNode {
    /// Starts a node with the transport implied by its config (a UDP
    /// bootstrap bus when `bootstrap_bind` is set).
    pub async fn start(config: Config) -> Result<Self> {
        Self::start_with_bus(config, None).await
    }

    /// Starts a node with an explicit bootstrap transport. Used by tests
    /// and embedded clusters to share an in-process bus.
    pub async fn start_with_bus(
        config: Config,
        bus: Option<Arc<dyn PubSub>>,
    ) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let raft_listener = TcpListener::bind(&config.raft_server_addr)
            .await
            .with_context(|| format!("binding raft address {}", config.raft_server_addr))?;
        let raft_addr = raft_listener.local_addr()?;
        let http_listener = TcpListener::bind(&config.http_server_addr)
            .await
            .with_context(|| format!("binding http address {}", config.http_server_addr))?;
        let http_addr = http_listener.local_addr()?;

        let id = Peer::new(&raft_addr.to_string(), &http_addr.to_string());
        let store = ConsensusStore::open(id, &config, shutdown.clone())?;
        let storage = StorageAPI::new(store.clone(), config.ttl_chunk_size);

        let mut tasks = Vec::new();

        let raft_router = consensus::handlers::router(store.raft_node());
        tasks.push(tokio::spawn(serve(
            raft_listener,
            raft_router,
            shutdown.clone(),
        )));

        let facade = http::handlers::router(storage.clone());
        tasks.push(tokio::spawn(serve(http_listener, facade, shutdown.clone())));

        let eviction_task = storage.spawn_ttl_processor(config.ttl_tick(), shutdown.clone());

        let bus: Option<Arc<dyn PubSub>> = match (bus, config.bootstrap_bind) {
            (Some(bus), _) => Some(bus),
            (None, Some(bind)) => {
                let udp: Arc<dyn PubSub> =
                    UdpBus::new(bind, config.bootstrap_peers.clone(), shutdown.clone()).await?;
                Some(udp)
            }
            (None, None) => None,
        };

        if let Some(bus) = bus {
            let bootstrap = Bootstrap::new(bus, config.shared_secret.as_deref());
            tasks.push(
                bootstrap
                    .spawn_listener(store.clone(), shutdown.clone())
                    .await?,
            );
            if !config.run_in_single_server_mode {
                tasks.push(bootstrap.spawn_announcer(store.clone(), shutdown.clone()));
            }
        }

        if let Some(join_address) = &config.join_address {
            request_join(join_address, store.identity()).await;
        }

        tracing::info!(
            "store node up: facade on {}, consensus on {}",
            http_addr,
            raft_addr
        );

        Ok(Self {
            config,
            storage,
            store,
            http_addr,
            raft_addr,
            shutdown,
            eviction_task: Some(eviction_task),
            tasks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The in-process programmatic surface.
    pub fn storage(&self) -> &Arc<StorageAPI> {
        &self.storage
    }

    pub fn store(&self) -> &Arc<ConsensusStore> {
        &self.store
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn raft_addr(&self) -> SocketAddr {
        self.raft_addr
    }

    pub fn is_leader(&self) -> bool {
        self.store.is_leader()
    }

    /// Stops the node: the eviction loop drains first, then the consensus
    /// loops and both servers.
    pub async fn shutdown(mut self) {
        tracing::info!("shutting down store node on {}", self.http_addr);
        self.shutdown.cancel();

        if let Some(eviction) = self.eviction_task.take() {
            if tokio::time::timeout(Duration::from_secs(10), eviction)
                .await
                .is_err()
            {
                tracing::warn!("eviction loop did not stop in time");
            }
        }
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .is_err()
            {
                tracing::warn!("background task did not stop in time");
            }
        }
    }
}

async fn serve(listener: TcpListener, router: axum::Router, shutdown: CancellationToken) {
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
    if let Err(e) = result {
        tracing::error!("server exited with error: {}", e);
    }
}

/// Asks an existing member to invite this node. Best-effort: if every
/// attempt fails the node keeps waiting for a pub/sub invitation instead.
async fn request_join(join_address: &str, id: &Peer) {
    let client = reqwest::Client::new();
    let url = format!("http://{}{}", join_address, ENDPOINT_JOIN);
    let body = JoinRequest {
        addr: id.raft_addr.clone(),
        http_addr: id.http_addr.clone(),
    };

    let mut delay_ms = 150u64;
    for attempt in 0..5u32 {
        match client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!("joined cluster via {}", join_address);
                return;
            }
            Ok(response) => {
                tracing::warn!(
                    "join via {} rejected (attempt {}): {}",
                    join_address,
                    attempt + 1,
                    response.status()
                );
            }
            Err(e) => {
                tracing::warn!("join via {} failed (attempt {}): {}", join_address, attempt + 1, e);
            }
        }
        let jitter = rand::random::<u64>() % 50;
        tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
        delay_ms = (delay_ms * 2).min(1200);
    }
    tracing::warn!("could not join via {}, awaiting invitation", join_address);
}
