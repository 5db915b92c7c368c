use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use peerbeam::{
    AppConfig, ConnectionManager, EventBus, IdentityProvider, PeerIdentifier, ReceiveAssembler,
    SendOrchestrator, SendState, ShareAddress, TcpProvider, TransferEvent,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for peers and save every file they send
    Receive {
        /// Directory to save received files into
        #[arg(short, long)]
        download_dir: Option<PathBuf>,

        /// Address to listen on, e.g. 0.0.0.0:7400
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Send files to a peer
    Send {
        /// Peer identifier to send to
        #[arg(short, long)]
        peer: String,

        /// Files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

// Returns a WorkerGuard that must be kept alive for logs to be written
fn init_logging(log_file_prefix: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", log_file_prefix);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false);

    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // This guard needs to stay in scope, otherwise logs stop writing.
    let _guard = init_logging("peerbeam")?;

    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(cli.config.as_deref());
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Receive {
            download_dir,
            listen,
        } => {
            if let Some(dir) = download_dir {
                config.download_directory = dir.to_string_lossy().to_string();
            }
            if let Some(addr) = listen {
                config.listen_address = addr;
            }
            run_receive(config).await
        }
        Commands::Send { peer, files } => run_send(config, peer, files).await,
    }
}

async fn run_receive(config: AppConfig) -> anyhow::Result<()> {
    config
        .ensure_directories()
        .context("could not create download directory")?;

    let provider = Arc::new(TcpProvider::new(config.listen_address.clone()));
    let identity = IdentityProvider::new(provider.clone());
    let identifier = identity
        .initialize()
        .await
        .context("could not obtain a peer identifier")?
        .clone();

    let address = ShareAddress::new(config.link_base_url.clone());
    println!("Your peer identifier: {}", identifier);
    println!("Senders use:   {}", address.send_link(&identifier));
    println!("Your session:  {}", address.receive_link(&identifier));
    println!("Saving files to: {}", config.download_directory);

    let (bus, mut events) = EventBus::new();
    bus.emit(TransferEvent::IdentityReady {
        identifier: identifier.clone(),
    });
    let manager = Arc::new(ConnectionManager::new(provider));
    let assembler = Arc::new(ReceiveAssembler::new(
        manager,
        bus,
        config.max_payload_bytes(),
    ));

    // Persist each artifact as its FileReceived event comes through.
    let saver = assembler.clone();
    let download_dir = config.download_dir_path();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let TransferEvent::FileReceived { token, filename, .. } = event {
                match saver.artifact(&token).await {
                    Some(artifact) => match artifact.write_to(&download_dir).await {
                        Ok(path) => println!("Received {} -> {}", filename, path.display()),
                        Err(e) => error!(%filename, error = %e, "could not save file"),
                    },
                    None => error!(%token, "received event for unknown artifact"),
                }
            }
        }
    });

    info!("waiting for senders");
    assembler.run().await?;
    Ok(())
}

async fn run_send(config: AppConfig, peer: String, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let provider = Arc::new(TcpProvider::new(config.listen_address.clone()));
    let manager = Arc::new(ConnectionManager::new(provider));
    let (bus, mut events) = EventBus::new();
    let orchestrator = SendOrchestrator::new(manager, bus, config.ack_timeout());

    for file in &files {
        orchestrator
            .queue_path(file)
            .await
            .with_context(|| format!("could not queue {}", file.display()))?;
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta})")
            .unwrap(),
    );

    let progress = pb.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event, TransferEvent::FileAcknowledged { .. }) {
                progress.inc(1);
            }
        }
    });

    let remote = PeerIdentifier::new(peer);
    orchestrator.send_to(&remote).await?;
    pb.finish_and_clear();

    let mut failures = 0;
    for entry in orchestrator.outstanding() {
        match &entry.state {
            SendState::Acknowledged => println!("sent     {}", entry.file.name),
            SendState::Failed(reason) => {
                failures += 1;
                println!("FAILED   {} ({})", entry.file.name, reason);
            }
            state => println!("{:<8} {}", state.to_string(), entry.file.name),
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} files were not delivered", failures, files.len());
    }
    println!("All {} files delivered.", files.len());
    Ok(())
}
