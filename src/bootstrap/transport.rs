//! Pub/sub transports.
//!
//! The bootstrap only needs at-least-once delivery of opaque payloads on
//! named channels, so the trait is two operations. `UdpBus` fans datagrams
//! out to a configured seed list; `LocalBus` wires nodes together inside
//! one process for tests and embedded clusters.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::protocol::Envelope;

/// Channel capacity for subscriber queues. Bootstrap traffic is sparse;
/// a slow consumer just drops announcements, which are re-published anyway.
const SUBSCRIBER_BUFFER: usize = 64;

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Delivers `payload` on `channel` to every reachable subscriber.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribes to `channel`; the receiver yields raw payloads.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>>;
}

/// Datagram transport: envelopes are bincode frames sent to every seed
/// address, received on the local bind and dispatched by channel name.
pub struct UdpBus {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    subscribers: Arc<DashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

impl UdpBus {
    pub async fn new(
        bind: SocketAddr,
        peers: Vec<SocketAddr>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        tracing::info!("bootstrap bus listening on {}", socket.local_addr()?);

        let bus = Arc::new(Self {
            socket,
            peers,
            subscribers: Arc::new(DashMap::new()),
        });

        let receiver = bus.clone();
        tokio::spawn(async move {
            receiver.receive_loop(shutdown).await;
        });

        Ok(bus)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn receive_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };
            let (len, from) = match received {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("bootstrap bus receive error: {}", e);
                    continue;
                }
            };
            let envelope: Envelope = match bincode::deserialize(&buf[..len]) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!("dropping malformed frame from {}: {}", from, e);
                    continue;
                }
            };
            self.dispatch(&envelope.channel, envelope.body);
        }
    }

    fn dispatch(&self, channel: &str, body: Vec<u8>) {
        if let Some(mut senders) = self.subscribers.get_mut(channel) {
            senders.retain(|tx| tx.try_send(body.clone()).is_ok() || !tx.is_closed());
        }
    }
}

#[async_trait]
impl PubSub for UdpBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let frame = bincode::serialize(&Envelope {
            channel: channel.to_string(),
            body: payload,
        })?;
        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(&frame, peer).await {
                tracing::warn!("publish to {} failed: {}", peer, e);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// In-process transport backed by broadcast channels. Every node sharing
/// the same `LocalBus` instance sees every publish.
#[derive(Default)]
pub struct LocalBus {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BUFFER).0)
            .clone()
    }
}

#[async_trait]
impl PubSub for LocalBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        // A send error only means nobody is subscribed yet.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let mut source = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("local bus subscriber lagged by {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}
