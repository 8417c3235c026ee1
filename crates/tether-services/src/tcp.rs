//! TCP transport: a symmetric framed link between Tether nodes.
//!
//! One side listens, the other dials; after that both ends are equal.
//! A publish is framed once and broadcast to every connected peer. Each
//! inbound frame is matched against the local subscription table.
//!
//! Delivery stays at-most-once: with no peer connected a publish is
//! dropped, and a peer whose link fails is simply forgotten.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use tether_core::wire::{decode_address, encode_frame, FrameHeader, FRAME_HEADER_SIZE};

use crate::transport::{MessageHandler, Subscriptions, Transport, TransportError};

struct Inner {
    subscriptions: Subscriptions,
    /// peer id -> outbound frame queue for that link.
    peers: DashMap<u64, mpsc::UnboundedSender<Bytes>>,
    next_peer: AtomicU64,
    closed: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
    local_addr: SocketAddr,
}

impl TcpTransport {
    fn new_inner() -> Arc<Inner> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Inner {
            subscriptions: Subscriptions::default(),
            peers: DashMap::new(),
            next_peer: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Bind `addr` and accept peers in the background until closed.
    pub async fn listen(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let inner = Self::new_inner();
        tracing::info!(%local_addr, "tcp transport listening");

        let accept_inner = inner.clone();
        let mut shutdown = inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("accept loop shutting down");
                        return;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => attach(&accept_inner, stream, peer_addr),
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    },
                }
            }
        });

        Ok(Self { inner, local_addr })
    }

    /// Dial a listening peer.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let inner = Self::new_inner();
        attach(&inner, stream, peer_addr);
        tracing::info!(%local_addr, %peer_addr, "tcp transport connected");
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }
}

/// Register a new link and spawn its reader and writer tasks.
fn attach(inner: &Arc<Inner>, stream: TcpStream, peer_addr: SocketAddr) {
    if inner.closed.load(Ordering::Acquire) {
        return;
    }
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer_addr, error = %e, "set_nodelay failed");
    }

    let (read_half, write_half) = stream.into_split();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Bytes>();
    let peer_id = inner.next_peer.fetch_add(1, Ordering::Relaxed);
    inner.peers.insert(peer_id, frame_tx);
    tracing::info!(%peer_addr, peer_id, "peer attached");

    let mut shutdown = inner.shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.recv() => {}
            r = write_frames(write_half, frame_rx) => {
                if let Err(e) = r {
                    tracing::warn!(%peer_addr, error = %e, "peer write failed");
                }
            }
        }
    });

    let reader_inner = inner.clone();
    let mut shutdown = inner.shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.recv() => {}
            r = read_frames(read_half, &reader_inner.subscriptions) => match r {
                Ok(()) => tracing::info!(%peer_addr, "peer closed link"),
                Err(e) => tracing::warn!(%peer_addr, error = %e, "peer link failed"),
            }
        }
        reader_inner.peers.remove(&peer_id);
    });
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
) -> Result<(), TransportError> {
    while let Some(frame) = frames.recv().await {
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await?;
    Ok(())
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    subscriptions: &Subscriptions,
) -> Result<(), TransportError> {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    loop {
        match reader.read_exact(&mut header_buf).await {
            Ok(_) => {}
            // Clean close between frames.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let header = FrameHeader::decode(&header_buf)?;

        let mut address = vec![0u8; header.address_len()];
        reader.read_exact(&mut address).await?;
        let address = decode_address(address)?;

        let mut payload = vec![0u8; header.payload_len()];
        reader.read_exact(&mut payload).await?;

        tracing::trace!(%address, bytes = payload.len(), "frame received");
        if subscriptions.deliver(&address, Bytes::from(payload)) == 0 {
            tracing::debug!(%address, "no subscriber, frame dropped");
        }
    }
}

impl Transport for TcpTransport {
    fn publish(&self, address: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let frame = Bytes::from(encode_frame(address, &payload)?);

        let mut sent = 0usize;
        self.inner.peers.retain(|_, tx| {
            let alive = tx.send(frame.clone()).is_ok();
            sent += alive as usize;
            alive
        });
        if sent == 0 {
            tracing::debug!(address, "no connected peer, message dropped");
        }
        Ok(())
    }

    fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.inner.subscriptions.add(pattern, handler);
        tracing::debug!(pattern, "subscribed");
        Ok(())
    }

    fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            let _ = self.inner.shutdown.send(());
            self.inner.peers.clear();
            self.inner.subscriptions.clear();
            tracing::info!(local_addr = %self.local_addr, "tcp transport closed");
        }
    }
}
