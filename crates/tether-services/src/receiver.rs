//! Receiver: the long-running listener that rebuilds the tree.
//!
//! Subscribes once to `<prefix>/**`, classifies each message, persists or
//! buffers it, then acknowledges at `ack/<address>`. The completion signal
//! fires the hook (at most once) and is never acknowledged.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use tether_core::address::{ack_address, Inbound, Namespace, ACK_PAYLOAD};
use tether_core::codec;

use crate::hook::CompletionHook;
use crate::paths::{write_file, PathError};
use crate::reassembly::{first_gap, ReassemblyStore};
use crate::transport::{MessageHandler, Transport, TransportError};

pub struct Receiver {
    namespace: Namespace,
    destination_root: PathBuf,
    store: ReassemblyStore,
    transport: Arc<dyn Transport>,
    hook: Arc<dyn CompletionHook>,
    completed: AtomicBool,
}

impl Receiver {
    pub fn new(
        namespace: Namespace,
        destination_root: PathBuf,
        transport: Arc<dyn Transport>,
        hook: Arc<dyn CompletionHook>,
    ) -> Self {
        Self {
            namespace,
            destination_root,
            store: ReassemblyStore::new(),
            transport,
            hook,
            completed: AtomicBool::new(false),
        }
    }

    /// Subscribe to the whole namespace. Call once.
    pub fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let pattern = self.namespace.subscribe_pattern();
        self.transport
            .subscribe(&pattern, self.clone() as Arc<dyn MessageHandler>)?;
        tracing::info!(
            %pattern,
            destination = %self.destination_root.display(),
            "receiver ready"
        );
        Ok(())
    }

    pub fn store(&self) -> &ReassemblyStore {
        &self.store
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Whether the completion hook has fired.
    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Process one message. Returns true if it should be acknowledged.
    fn handle(&self, address: &str, payload: Bytes) -> bool {
        match self.namespace.classify(address) {
            Inbound::Completion => {
                if self.completed.swap(true, Ordering::AcqRel) {
                    tracing::warn!(address, "repeated completion signal, hook already fired");
                } else {
                    tracing::info!("completion signal received, starting downstream pipeline");
                    self.hook.on_complete();
                }
                false
            }
            Inbound::Raw(rel) | Inbound::Fallback(rel) => self.save(&rel, &payload),
            Inbound::EndMarker(base) => {
                tracing::info!(file = %base, "received end signal");
                match self.store.take(&base) {
                    Some(chunks) => {
                        if let Some(missing) = first_gap(&chunks) {
                            // Joined as-is; the file will be short.
                            tracing::warn!(file = %base, missing, "chunk sequence has a gap");
                        }
                        let count = chunks.len();
                        let data = codec::join(chunks.values());
                        let saved = self.save(&base, &data);
                        if saved {
                            tracing::info!(
                                file = %base,
                                chunks = count,
                                bytes = data.len(),
                                blake3 = %blake3::hash(&data).to_hex(),
                                "file reassembled"
                            );
                        } else {
                            // Keep the chunks so a republished end marker retries the write.
                            self.store.restore(&base, chunks);
                        }
                        saved
                    }
                    None => {
                        tracing::warn!(file = %base, "no chunks found on end signal, nothing written");
                        true
                    }
                }
            }
            Inbound::Chunk { base, index } => {
                let buffered = self.store.insert(&base, index, payload);
                tracing::info!(file = %base, index, buffered, "stored chunk");
                true
            }
            Inbound::Malformed { address, reason } => {
                tracing::warn!(%address, reason, "malformed address, not acknowledged");
                false
            }
            Inbound::Foreign => {
                tracing::debug!(address, "address outside namespace, ignoring");
                false
            }
        }
    }

    fn save(&self, rel: &str, data: &[u8]) -> bool {
        match write_file(&self.destination_root, rel, data) {
            Ok(path) => {
                tracing::info!(path = %path.display(), bytes = data.len(), "saved file");
                true
            }
            Err(e @ PathError::Io { .. }) => {
                tracing::error!(file = rel, error = %e, "failed to save file, not acknowledged");
                false
            }
            Err(e) => {
                tracing::warn!(file = rel, error = %e, "rejected destination path, not acknowledged");
                false
            }
        }
    }
}

impl MessageHandler for Receiver {
    fn on_message(&self, address: &str, payload: Bytes) {
        if !self.handle(address, payload) {
            return;
        }
        let ack = ack_address(address);
        match self
            .transport
            .publish(&ack, Bytes::from_static(ACK_PAYLOAD))
        {
            Ok(()) => tracing::info!(%ack, "sent ack"),
            Err(e) => tracing::warn!(%ack, error = %e, "failed to send ack"),
        }
    }
}
