//! Acknowledgment correlation: bridges the transport's ack listener to
//! the sender's blocking wait.
//!
//! Two modes:
//!
//! * `Correlated` (default): every wait registers a one-shot slot keyed by
//!   the address *before* publishing; the listener resolves exactly that
//!   slot. Acks may arrive in any order and none are lost.
//! * `Fifo`: one shared queue of every ack observed. A wait dequeues until
//!   it sees its own address and throws away everything else, so an ack
//!   delivered out of order is gone for good and its wait can only time out.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;

use tether_core::address::ack_target;
use tether_core::config::AckMode;

use crate::transport::MessageHandler;

/// A registered wait for one address.
pub enum PendingAck {
    Correlated {
        address: String,
        rx: oneshot::Receiver<()>,
    },
    Fifo {
        address: String,
    },
}

impl PendingAck {
    pub fn address(&self) -> &str {
        match self {
            PendingAck::Correlated { address, .. } | PendingAck::Fifo { address } => address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AckError {
    #[error("timed out waiting for ack of {0}")]
    TimedOut(String),

    /// The slot was replaced or the waiter went away.
    #[error("ack wait for {0} was abandoned")]
    Abandoned(String),
}

pub struct AckWaiter {
    mode: AckMode,
    pending: DashMap<String, oneshot::Sender<()>>,
    fifo_tx: mpsc::UnboundedSender<String>,
    fifo_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl AckWaiter {
    pub fn new(mode: AckMode) -> Self {
        let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
        Self {
            mode,
            pending: DashMap::new(),
            fifo_tx,
            fifo_rx: Mutex::new(fifo_rx),
        }
    }

    pub fn mode(&self) -> AckMode {
        self.mode
    }

    /// Register interest in `address`. Call before publishing.
    pub fn register(&self, address: &str) -> PendingAck {
        match self.mode {
            AckMode::Correlated => {
                let (tx, rx) = oneshot::channel();
                if self.pending.insert(address.to_string(), tx).is_some() {
                    tracing::debug!(address, "replaced stale ack registration");
                }
                PendingAck::Correlated {
                    address: address.to_string(),
                    rx,
                }
            }
            AckMode::Fifo => PendingAck::Fifo {
                address: address.to_string(),
            },
        }
    }

    /// Record an acknowledgment for `address`. Called from the listener.
    pub fn observe(&self, address: &str) {
        match self.mode {
            AckMode::Correlated => match self.pending.remove(address) {
                Some((_, tx)) => {
                    let _ = tx.send(());
                }
                None => tracing::debug!(address, "ack with no waiter, ignoring"),
            },
            AckMode::Fifo => {
                let _ = self.fifo_tx.send(address.to_string());
            }
        }
    }

    /// Block until `pending` is acknowledged. `None` waits forever.
    ///
    /// A timed-out correlated wait keeps its slot, so calling `wait` again
    /// after republishing still catches a late ack for the first attempt.
    pub async fn wait(
        &self,
        pending: &mut PendingAck,
        timeout: Option<Duration>,
    ) -> Result<(), AckError> {
        match pending {
            PendingAck::Correlated { address, rx } => {
                let outcome = match timeout {
                    Some(d) => tokio::time::timeout(d, &mut *rx)
                        .await
                        .map_err(|_| AckError::TimedOut(address.clone()))?,
                    None => (&mut *rx).await,
                };
                outcome.map_err(|_| AckError::Abandoned(address.clone()))
            }
            PendingAck::Fifo { address } => {
                let deadline = timeout.map(|d| Instant::now() + d);
                let mut queue = self.fifo_rx.lock().await;
                loop {
                    let next = match deadline {
                        Some(deadline) => tokio::time::timeout_at(deadline, queue.recv())
                            .await
                            .map_err(|_| AckError::TimedOut(address.clone()))?,
                        None => queue.recv().await,
                    };
                    match next {
                        Some(acked) if acked == *address => return Ok(()),
                        Some(acked) => {
                            tracing::warn!(
                                expected = %address,
                                discarded = %acked,
                                "discarding non-matching ack"
                            );
                        }
                        None => return Err(AckError::Abandoned(address.clone())),
                    }
                }
            }
        }
    }

    /// Drop a registration that will never be waited on again.
    pub fn cancel(&self, pending: PendingAck) {
        if let PendingAck::Correlated { address, .. } = pending {
            self.pending.remove(&address);
        }
    }

    /// Correlated registrations still waiting for their ack.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Handler subscribed to `ack/**`; feeds every ack into the waiter.
pub struct AckListener {
    waiter: Arc<AckWaiter>,
}

impl AckListener {
    pub fn new(waiter: Arc<AckWaiter>) -> Self {
        Self { waiter }
    }
}

impl MessageHandler for AckListener {
    fn on_message(&self, address: &str, _payload: Bytes) {
        match ack_target(address) {
            Some(target) => {
                tracing::info!(ack = address, "received ack");
                self.waiter.observe(target);
            }
            None => tracing::debug!(address, "not an ack address, ignoring"),
        }
    }
}
