#![forbid(unsafe_code)]

mod constants;
mod control;
mod document;
mod error;
mod pipeline;
mod resource;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{Level as TraceLevel, info};
use tracing_subscriber::FmtSubscriber;

use control::ControlServer;
use pipeline::{PipelineController, SimBackend};
use resource::{Defaults, Repository};

#[derive(Parser, Debug)]
#[command(name = "camctl", about = "Live camera media-pipeline control daemon")]
struct Args {
    /// Control socket path (defaults to XDG_RUNTIME_DIR)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Directory holding the per-resource default documents
    #[arg(long, default_value = constants::paths::DEFAULTS_DIR)]
    defaults_dir: PathBuf,

    /// Log level (overrides the LOG_LEVEL environment variable)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let defaults = Defaults::load(&args.defaults_dir)
        .context(format!("Failed to load defaults from {}", args.defaults_dir.display()))?;
    let repository = Arc::new(Repository::build(&defaults)?);
    info!("Resource repository constructed");

    let backend = SimBackend::new();
    let controller = PipelineController::attach(repository.clone(), backend);
    controller.start()?;
    info!("Pipeline started");

    let socket_path = match args.socket {
        Some(path) => path,
        None => control::default_socket_path()?,
    };
    let server = ControlServer::bind_to(socket_path)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let _listener = control::spawn_listener(server, repository, shutdown_tx);

    let terminated = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, terminated.clone())?;
    }

    loop {
        if terminated.load(Ordering::Relaxed) {
            info!("Received termination signal");
            break;
        }
        match shutdown_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(()) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    controller.stop()?;
    info!("Pipeline stopped, exiting");
    Ok(())
}
