//! In-process transport. Sender and receiver share one bus; publishing
//! with no matching subscriber drops the message, same as a real
//! at-most-once broker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::transport::{MessageHandler, Subscriptions, Transport, TransportError};

#[derive(Clone, Default)]
pub struct MemoryBus {
    subscriptions: Subscriptions,
    closed: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages accepted by `publish`.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Messages that matched no subscriber.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for MemoryBus {
    fn publish(&self, address: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.subscriptions.deliver(address, payload) == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(address, "no subscriber, message dropped");
        }
        Ok(())
    }

    fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.subscriptions.add(pattern, handler);
        tracing::debug!(pattern, "subscribed");
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.subscriptions.clear();
            tracing::info!("memory bus closed");
        }
    }
}
