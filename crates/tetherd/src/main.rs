//! tetherd: send or receive a directory tree over a pub/sub link.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use tether_core::config::{TetherConfig, TransportKind};
use tether_services::{
    hook_from_argv, MemoryBus, Receiver, Sender, SenderSettings, TcpTransport, TransferReport,
    Transport,
};

#[derive(Parser, Debug)]
#[command(name = "tetherd", version, about = "Reliable directory sync over topic pub/sub")]
struct Cli {
    /// Config file (defaults to $TETHER_CONFIG or ~/.config/tether/config.toml)
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send the configured folders once, then signal completion.
    ///
    /// Raw files must fit in a single 16 MiB frame; larger files belong in
    /// `chunked_paths`.
    Send {
        /// Source root holding the folders to send
        #[arg(long)]
        source: Option<PathBuf>,
        /// Receiver address to dial
        #[arg(long)]
        connect: Option<String>,
    },
    /// Listen and rebuild the tree until interrupted
    Receive {
        /// Destination root
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Address to listen on
        #[arg(long)]
        listen: Option<String>,
    },
    /// Write the default config file and print its path
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(TetherConfig::file_path);

    match cli.command {
        Command::InitConfig => {
            let path = TetherConfig::write_default_if_missing(&config_path)
                .context("failed to write default config")?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Send { source, connect } => {
            let mut config = load_config(&config_path)?;
            if let Some(source) = source {
                config.sender.source_root = source;
            }
            if let Some(connect) = connect {
                config.transport.connect = connect;
            }
            let report = run_send(&config).await?;
            println!(
                "sent {} raw and {} chunked file(s) in {:.2}s",
                report.raw_files,
                report.chunked_files,
                report.elapsed.as_secs_f64()
            );
            Ok(())
        }
        Command::Receive { dest, listen } => {
            let mut config = load_config(&config_path)?;
            if let Some(dest) = dest {
                config.receiver.destination_root = dest;
            }
            if let Some(listen) = listen {
                config.transport.listen = listen;
            }
            run_receive(&config).await
        }
    }
}

fn load_config(path: &Path) -> Result<TetherConfig> {
    let config = TetherConfig::load_from(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config)
}

fn sender_settings(config: &TetherConfig) -> Result<SenderSettings> {
    Ok(SenderSettings {
        chunk_size: config.protocol.chunk_size()?,
        ack_timeout: config.sender.ack_timeout(),
        max_attempts: config.sender.max_attempts,
        ack_mode: config.sender.ack_mode,
    })
}

fn start_receiver(config: &TetherConfig, transport: Arc<dyn Transport>) -> Result<Arc<Receiver>> {
    let dest = &config.receiver.destination_root;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create destination {}", dest.display()))?;
    let receiver = Arc::new(Receiver::new(
        config.protocol.namespace(),
        dest.clone(),
        transport,
        hook_from_argv(&config.receiver.on_complete),
    ));
    receiver.start().context("failed to subscribe receiver")?;
    Ok(receiver)
}

async fn run_send(config: &TetherConfig) -> Result<TransferReport> {
    let transport: Arc<dyn Transport> = match config.transport.kind {
        TransportKind::Tcp => {
            let tcp = TcpTransport::connect(&config.transport.connect)
                .await
                .with_context(|| format!("failed to connect to {}", config.transport.connect))?;
            Arc::new(tcp)
        }
        TransportKind::Memory => {
            let bus: Arc<dyn Transport> = Arc::new(MemoryBus::new());
            tracing::info!("memory transport: receiving in-process");
            start_receiver(config, bus.clone())?;
            bus
        }
    };

    tracing::info!(
        source = %config.sender.source_root.display(),
        folders = ?config.sender.folders,
        "tetherd send starting"
    );

    let sender = Sender::new(
        transport.clone(),
        config.protocol.namespace(),
        config.sender.policy(&config.protocol),
        sender_settings(config)?,
    )
    .context("failed to set up sender")?;

    // Let the link settle so the first publish has a subscriber to land on.
    tokio::time::sleep(Duration::from_millis(config.sender.connect_grace_ms)).await;

    let result = sender
        .send_tree(&config.sender.source_root, &config.sender.folders)
        .await;

    // Give the fire-and-forget completion signal time to flush.
    tokio::time::sleep(Duration::from_millis(config.sender.connect_grace_ms)).await;
    transport.close();

    let report = result.context("transfer failed")?;
    tracing::info!(
        raw_files = report.raw_files,
        chunked_files = report.chunked_files,
        skipped = report.skipped,
        "tetherd send finished"
    );
    Ok(report)
}

async fn run_receive(config: &TetherConfig) -> Result<()> {
    if config.transport.kind == TransportKind::Memory {
        bail!("the memory transport cannot receive from another process; use `send` with kind = \"memory\" instead");
    }

    let tcp = TcpTransport::listen(&config.transport.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.transport.listen))?;
    let transport: Arc<dyn Transport> = Arc::new(tcp);
    let receiver = start_receiver(config, transport.clone())?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let _ = shutdown_rx.recv().await;

    let in_progress = receiver.store().in_progress();
    if !in_progress.is_empty() {
        tracing::warn!(files = ?in_progress, "shutting down with incomplete chunked files");
    }
    transport.close();
    tracing::info!(completed = receiver.completed(), "tetherd receive stopped");
    Ok(())
}
