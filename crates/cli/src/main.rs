//! Miracast source daemon.
//!
//! Binds the RTSP control port and waits for a sink; SIGINT/SIGTERM
//! shut it down cleanly. The Wi-Fi P2P group formation and the WFD
//! protocol engine live outside this binary, so the engine attached
//! here only logs the RTSP traffic it is handed.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use tracing_subscriber::EnvFilter;

use aethercast::Result;
use aethercast::session::client::{ProtocolEngine, RTSP_PORT};
use aethercast::session::source::{EngineFactory, Source};

#[derive(Parser)]
#[command(name = "aethercastd", about = "Miracast source daemon", disable_version_flag = true)]
struct Args {
    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Print the version and exit.
    #[arg(long)]
    version: bool,
}

/// Placeholder for the external WFD protocol engine: dumps whatever
/// the sink sends so the control channel is observable.
struct LoggingEngine;

impl ProtocolEngine for LoggingEngine {
    fn start(&mut self) -> Result<()> {
        tracing::info!("no WFD protocol engine attached, logging RTSP traffic only");
        Ok(())
    }

    fn rtsp_data_received(&mut self, data: &str) {
        for line in data.lines() {
            tracing::info!(line, "RTSP from sink");
        }
    }

    fn on_timer_event(&mut self, timer_id: u32) {
        tracing::debug!(timer_id, "protocol timer fired");
    }
}

/// Block SIGINT/SIGTERM for the process. Must run before any thread is
/// spawned so workers inherit the mask and the signals only ever reach
/// the main thread's wait.
fn block_shutdown_signals() -> std::io::Result<SigSet> {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block()?;
    Ok(signals)
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage or bad flags; keep clap's message, not its code.
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    if args.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let signals = match block_shutdown_signals() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to set up signal handling");
            return ExitCode::FAILURE;
        }
    };

    let factory: EngineFactory =
        Arc::new(|_client| Box::new(LoggingEngine) as Box<dyn ProtocolEngine>);

    let source = match Source::start(&format!("0.0.0.0:{RTSP_PORT}"), factory) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind RTSP control port");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(addr = %source.local_addr(), "aethercast source up, waiting for a sink");

    match signals.wait() {
        Ok(signal) => tracing::info!(signal = %signal, "shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "signal wait failed");
            return ExitCode::FAILURE;
        }
    }

    source.stop();
    ExitCode::SUCCESS
}
