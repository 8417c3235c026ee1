//! Transport trait: the pub/sub collaborator Tether runs on.
//!
//! The contract is deliberately weak: at-most-once delivery, no ordering
//! across addresses, no acknowledgment, no retry. Everything reliable is
//! built above this line.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tether_core::address;
use tether_core::wire::WireError;

/// Callback for delivered messages. Invoked on the transport's own
/// dispatch context, possibly concurrently with other deliveries.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, address: &str, payload: Bytes);
}

/// A topic-addressed publish/subscribe session.
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish. Succeeding says nothing about delivery.
    fn publish(&self, address: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Register `handler` for every address matching `pattern`
    /// (`*` = one segment, `**` = any number of segments).
    fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>)
        -> Result<(), TransportError>;

    /// Release the session. Further publish/subscribe calls fail.
    fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport session is closed")]
    Closed,

    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Wire(#[from] WireError),
}

/// Local subscription table shared by the concrete transports.
#[derive(Clone, Default)]
pub(crate) struct Subscriptions {
    entries: Arc<RwLock<Vec<(String, Arc<dyn MessageHandler>)>>>,
}

impl Subscriptions {
    pub(crate) fn add(&self, pattern: &str, handler: Arc<dyn MessageHandler>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((pattern.to_string(), handler));
    }

    /// Hand the message to every matching handler, each on its own blocking
    /// task. Returns how many handlers matched. Must run inside a Tokio runtime.
    pub(crate) fn deliver(&self, address: &str, payload: Bytes) -> usize {
        let matched: Vec<Arc<dyn MessageHandler>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(pattern, _)| address::matches(pattern, address))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &matched {
            let handler = handler.clone();
            let address = address.to_string();
            let payload = payload.clone();
            tokio::task::spawn_blocking(move || handler.on_message(&address, payload));
        }
        matched.len()
    }

    pub(crate) fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
