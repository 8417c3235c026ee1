//! Tether integration test harness.
//!
//! Every test builds a source tree in a temp dir, wires a Sender and a
//! Receiver over a real transport (in-process bus or TCP loopback), runs
//! a transfer and inspects the destination tree.
//!
//!   cargo test --test integration

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tempfile::TempDir;

use tether_core::address::Namespace;
use tether_core::config::AckMode;
use tether_core::policy::TransferPolicy;
use tether_services::{
    CompletionHook, MemoryBus, MessageHandler, Receiver, Sender, SenderSettings, Transport,
    TransportError,
};

mod acks;
mod files;
mod tcp;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PREFIX: &str = "workdir";
pub const VERBATIM: &str = "splitted";
pub const CHUNKED: [&str; 2] = ["quadrilaterals/quadrilaterals.pkl", "tracking/tracks.csv"];
pub const KIB: usize = 1024;

pub fn namespace() -> Namespace {
    Namespace::new(PREFIX, VERBATIM)
}

pub fn policy() -> TransferPolicy {
    TransferPolicy::new(VERBATIM, CHUNKED)
}

pub fn folders() -> Vec<String> {
    vec!["splitted".into(), "quadrilaterals".into(), "tracking".into()]
}

pub fn settings(chunk_size: usize) -> SenderSettings {
    SenderSettings {
        chunk_size: NonZeroUsize::new(chunk_size).expect("non-zero chunk size"),
        ack_timeout: Some(Duration::from_secs(5)),
        max_attempts: 3,
        ack_mode: AckMode::Correlated,
    }
}

/// Deterministic, non-repeating-ish content so misplaced chunks show up.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}

/// Write `files` (relative path, content) under a fresh temp dir.
pub fn source_tree(files: &[(&str, &[u8])]) -> Result<TempDir> {
    let tmp = TempDir::new().context("failed to create source dir")?;
    for (rel, content) in files {
        let path = tmp.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content).with_context(|| format!("failed to write {rel}"))?;
    }
    Ok(tmp)
}

pub fn read(root: &Path, rel: &str) -> Result<Vec<u8>> {
    std::fs::read(root.join(rel)).with_context(|| format!("missing {rel} under {}", root.display()))
}

/// Completion hook that counts how often it fired.
#[derive(Default)]
pub struct CountingHook {
    fired: AtomicUsize,
}

impl CountingHook {
    pub fn count(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

impl CompletionHook for CountingHook {
    fn on_complete(&self) {
        self.fired.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every address seen on a pattern.
#[derive(Default)]
pub struct Tap {
    seen: Mutex<Vec<String>>,
}

impl Tap {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl MessageHandler for Tap {
    fn on_message(&self, address: &str, _payload: Bytes) {
        self.seen.lock().unwrap().push(address.to_string());
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// A sender and a receiver sharing one in-process bus.
pub struct Node {
    pub bus: MemoryBus,
    pub receiver: Arc<Receiver>,
    pub hook: Arc<CountingHook>,
    pub dest: TempDir,
}

impl Node {
    pub fn start() -> Result<Self> {
        let bus = MemoryBus::new();
        let hook = Arc::new(CountingHook::default());
        let dest = TempDir::new()?;
        let receiver = Arc::new(Receiver::new(
            namespace(),
            dest.path().to_path_buf(),
            Arc::new(bus.clone()),
            hook.clone(),
        ));
        receiver.start()?;
        Ok(Self {
            bus,
            receiver,
            hook,
            dest,
        })
    }

    pub fn sender(&self, settings: SenderSettings) -> Result<Sender> {
        self.sender_over(Arc::new(self.bus.clone()), settings)
    }

    pub fn sender_over(&self, transport: Arc<dyn Transport>, settings: SenderSettings) -> Result<Sender> {
        Ok(Sender::new(transport, namespace(), policy(), settings)?)
    }

    /// Wait for the completion hook to fire.
    pub async fn wait_complete(&self) -> Result<()> {
        let hook = self.hook.clone();
        wait_until(Duration::from_secs(5), move || hook.count() > 0).await
    }
}

/// Transport wrapper that silently swallows the first publish to each
/// address accepted by `filter`, like a lossy broker would.
pub struct DropFirst<F> {
    inner: Arc<dyn Transport>,
    filter: F,
    dropped: Mutex<Vec<String>>,
}

impl<F: Fn(&str) -> bool + Send + Sync> DropFirst<F> {
    pub fn new(inner: Arc<dyn Transport>, filter: F) -> Self {
        Self {
            inner,
            filter,
            dropped: Mutex::new(Vec::new()),
        }
    }

    pub fn dropped(&self) -> Vec<String> {
        self.dropped.lock().unwrap().clone()
    }
}

impl<F: Fn(&str) -> bool + Send + Sync> Transport for DropFirst<F> {
    fn publish(&self, address: &str, payload: Bytes) -> Result<(), TransportError> {
        if (self.filter)(address) {
            let mut dropped = self.dropped.lock().unwrap();
            if !dropped.iter().any(|a| a == address) {
                dropped.push(address.to_string());
                return Ok(());
            }
        }
        self.inner.publish(address, payload)
    }

    fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        self.inner.subscribe(pattern, handler)
    }

    fn close(&self) {
        self.inner.close()
    }
}
