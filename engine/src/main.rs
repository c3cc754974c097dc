//! Main entry point for the engine binary
//!
//! Wires the real backend transport into the engine with explicit
//! dependency injection and runs the event loop until interrupted.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use engine::services::{RealBackend, RealEventSource};
use engine::{Engine, EngineError, EngineResult};
use shared::logging;

/// Undervolt control engine for a handheld gaming device
#[derive(Parser)]
#[command(name = "uvolt-engine")]
#[command(about = "Applies per-core undervolt presets and orchestrates backend calibration")]
pub struct Args {
    /// Address of the privileged voltage backend
    #[arg(long, default_value = "127.0.0.1:7260")]
    pub backend_addr: String,

    /// Local bind address for pushed event frames
    #[arg(long, default_value = "127.0.0.1:7261")]
    pub listen_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    let args = Args::parse();

    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup("uvolt engine");

    let backend_addr: SocketAddr = args
        .backend_addr
        .parse()
        .map_err(|e| EngineError::config(format!("invalid backend address: {e}")))?;
    let listen_addr: SocketAddr = args
        .listen_addr
        .parse()
        .map_err(|e| EngineError::config(format!("invalid listen address: {e}")))?;

    let backend = Arc::new(RealBackend::new(backend_addr));
    let events = RealEventSource::new(listen_addr);

    let mut engine = Engine::new(backend, events);
    engine.init().await?;

    // Graceful shutdown on Ctrl+C
    let shutdown_sender = engine.get_shutdown_sender();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown("received Ctrl+C signal");
                let _ = shutdown_sender.send(()).await;
            }
            Err(err) => {
                logging::log_error("Signal handling", &err);
            }
        }
    });

    engine.run().await?;

    logging::log_success("Engine stopped gracefully");
    Ok(())
}
