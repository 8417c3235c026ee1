//! Sender: walks the allowed source folders and replicates them one
//! message at a time.
//!
//! Every message (raw file, chunk, end marker) is published and then
//! waited on until its ack arrives. Nothing is pipelined. When everything
//! is acknowledged the completion signal goes out, fire-and-forget.

use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use walkdir::WalkDir;

use tether_core::address::{ack_pattern, Namespace, DONE_PAYLOAD, END_PAYLOAD};
use tether_core::codec::{self, DEFAULT_CHUNK_SIZE};
use tether_core::config::AckMode;
use tether_core::policy::{Policy, TransferPolicy, TransferUnit};
use tether_core::wire::MAX_PAYLOAD;

use crate::ack::{AckError, AckListener, AckWaiter};
use crate::transport::{MessageHandler, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct SenderSettings {
    pub chunk_size: NonZeroUsize,
    /// Per-attempt ack wait. None = wait forever.
    pub ack_timeout: Option<Duration>,
    /// Total publish attempts per message, including the first.
    pub max_attempts: u32,
    pub ack_mode: AckMode,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            ack_timeout: Some(Duration::from_secs(30)),
            max_attempts: 3,
            ack_mode: AckMode::Correlated,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{path} is {size} bytes, over the {limit}-byte limit for a raw file; add it to chunked_paths")]
    RawTooLarge { path: String, size: u64, limit: u64 },

    #[error("no ack for {address} after {attempts} attempt(s)")]
    AckTimeout { address: String, attempts: u32 },

    #[error(transparent)]
    Ack(#[from] AckError),
}

/// Files selected for a run.
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub units: Vec<TransferUnit>,
    /// Files under the walked folders that no policy selected.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub raw_files: usize,
    pub chunked_files: usize,
    pub chunks: u64,
    pub bytes: u64,
    pub skipped: usize,
    /// Publishes repeated after an ack timeout.
    pub republished: u32,
    pub elapsed: Duration,
}

pub struct Sender {
    transport: Arc<dyn Transport>,
    acks: Arc<AckWaiter>,
    namespace: Namespace,
    policy: TransferPolicy,
    settings: SenderSettings,
}

impl Sender {
    /// Build a sender and subscribe its ack listener to `ack/**`.
    pub fn new(
        transport: Arc<dyn Transport>,
        namespace: Namespace,
        policy: TransferPolicy,
        settings: SenderSettings,
    ) -> Result<Self, SendError> {
        let acks = Arc::new(AckWaiter::new(settings.ack_mode));
        transport.subscribe(
            &ack_pattern(),
            Arc::new(AckListener::new(acks.clone())) as Arc<dyn MessageHandler>,
        )?;
        Ok(Self {
            transport,
            acks,
            namespace,
            policy,
            settings,
        })
    }

    /// Walk `folders` under `source_root` and pick the files to send.
    /// Missing folders are skipped with a warning. A raw file too large to
    /// fit in one frame fails the plan, so nothing is sent.
    pub fn plan(&self, source_root: &Path, folders: &[String]) -> Result<TransferPlan, SendError> {
        let mut plan = TransferPlan::default();

        for folder in folders {
            let folder_path = source_root.join(folder);
            if !folder_path.exists() {
                tracing::warn!(folder = %folder_path.display(), "folder not found, skipping");
                continue;
            }

            for entry in WalkDir::new(&folder_path).sort_by_file_name() {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = match relative_posix(source_root, entry.path()) {
                    Some(rel) => rel,
                    None => {
                        tracing::warn!(path = %entry.path().display(), "path is not valid UTF-8, skipping");
                        plan.skipped += 1;
                        continue;
                    }
                };
                match self.policy.classify(&rel) {
                    Some(policy) => {
                        let size_bytes = entry.metadata()?.len();
                        if policy == Policy::Raw && size_bytes > MAX_PAYLOAD as u64 {
                            return Err(SendError::RawTooLarge {
                                path: rel,
                                size: size_bytes,
                                limit: MAX_PAYLOAD as u64,
                            });
                        }
                        plan.units.push(TransferUnit {
                            relative_path: rel,
                            policy,
                            size_bytes,
                        });
                    }
                    None => {
                        tracing::debug!(file = %rel, "no transfer policy, skipping");
                        plan.skipped += 1;
                    }
                }
            }
        }
        Ok(plan)
    }

    /// Send every selected file, then the completion signal.
    pub async fn send_tree(
        &self,
        source_root: &Path,
        folders: &[String],
    ) -> Result<TransferReport, SendError> {
        let started = Instant::now();
        let plan = self.plan(source_root, folders)?;
        tracing::info!(
            files = plan.units.len(),
            skipped = plan.skipped,
            "transfer planned"
        );

        let mut report = TransferReport {
            skipped: plan.skipped,
            ..Default::default()
        };
        for unit in &plan.units {
            self.send_unit(source_root, unit, &mut report).await?;
        }
        tracing::info!("selected folders sent and acknowledged");

        self.signal_completion()?;
        report.elapsed = started.elapsed();
        tracing::info!(
            raw_files = report.raw_files,
            chunked_files = report.chunked_files,
            chunks = report.chunks,
            bytes = report.bytes,
            republished = report.republished,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "transfer finished"
        );
        Ok(report)
    }

    pub async fn send_unit(
        &self,
        source_root: &Path,
        unit: &TransferUnit,
        report: &mut TransferReport,
    ) -> Result<(), SendError> {
        let path = source_root.join(&unit.relative_path);
        match unit.policy {
            Policy::Raw => {
                let content = std::fs::read(&path).map_err(|source| SendError::Io {
                    path: path.clone(),
                    source,
                })?;
                let address = self.namespace.raw_address(&unit.relative_path);
                tracing::info!(
                    file = %path.display(),
                    %address,
                    bytes = content.len(),
                    "sending raw file"
                );
                report.bytes += content.len() as u64;
                report.republished += self.deliver(&address, Bytes::from(content)).await?;
                report.raw_files += 1;
            }
            Policy::Chunked => {
                tracing::info!(file = %unit.relative_path, "sending chunked file");
                let file = File::open(&path).map_err(|source| SendError::Io {
                    path: path.clone(),
                    source,
                })?;
                for chunk in codec::split(file, self.settings.chunk_size) {
                    let chunk = chunk.map_err(|source| SendError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    let address = self
                        .namespace
                        .chunk_address(&unit.relative_path, chunk.index);
                    tracing::info!(
                        index = chunk.index,
                        %address,
                        bytes = chunk.bytes.len(),
                        "sending chunk"
                    );
                    tracing::trace!(
                        hash = hex::encode(&blake3::hash(&chunk.bytes).as_bytes()[..8]),
                        "chunk hash"
                    );
                    report.bytes += chunk.bytes.len() as u64;
                    report.republished += self.deliver(&address, chunk.bytes).await?;
                    report.chunks += 1;
                }

                let end = self.namespace.end_address(&unit.relative_path);
                tracing::info!(file = %unit.relative_path, "sending end signal");
                report.republished += self.deliver(&end, Bytes::from_static(END_PAYLOAD)).await?;
                report.chunked_files += 1;
            }
        }
        Ok(())
    }

    /// Publish one message and block until it is acknowledged, republishing
    /// on timeout. Returns how many republishes it took.
    async fn deliver(&self, address: &str, payload: Bytes) -> Result<u32, SendError> {
        let mut pending = self.acks.register(address);
        let attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=attempts {
            self.transport.publish(address, payload.clone())?;
            tracing::info!(address, attempt, "waiting for ack");
            match self.acks.wait(&mut pending, self.settings.ack_timeout).await {
                Ok(()) => {
                    tracing::info!(address, "ack confirmed");
                    return Ok(attempt - 1);
                }
                Err(AckError::TimedOut(_)) => {
                    tracing::warn!(address, attempt, max_attempts = attempts, "ack timed out");
                }
                Err(e) => {
                    self.acks.cancel(pending);
                    return Err(e.into());
                }
            }
        }

        self.acks.cancel(pending);
        Err(SendError::AckTimeout {
            address: address.to_string(),
            attempts,
        })
    }

    /// Publish `<prefix>/done`. Not waited on.
    pub fn signal_completion(&self) -> Result<(), SendError> {
        let address = self.namespace.completion_address();
        self.transport
            .publish(&address, Bytes::from_static(DONE_PAYLOAD))?;
        tracing::info!(%address, "completion signal sent");
        Ok(())
    }
}

/// `path` relative to `root`, `/`-separated. None if not under root or not UTF-8.
fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}
