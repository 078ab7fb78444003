//! # OCC Tool Binary
//!
//! Status, packet dump, module discovery and register access for OCC link
//! adapters and their simulators.
//!
//! # Usage
//!
//! ```bash
//! # Board status
//! occ status
//!
//! # First 100 packets, as JSON lines
//! occ dump -n 100 --json
//!
//! # Discover modules through the pipe simulator
//! occ --kind pipe --device /tmp/occ_rx,/tmp/occ_tx discover
//!
//! # Peek at a link another application owns
//! occ --debug dump
//!
//! # Registers
//! occ read 0 0x40 -n 4
//! occ write 0 0x40 0x1
//! ```

#![deny(warnings)]

use clap::Parser;
use occ::config::LogLevel;
use occ_tool::{Args, Context, ToolResult, execute, resolve_config};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        error!("occ failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> ToolResult<()> {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => {
            setup_tracing(&args, config.shared.log_level);
            config
        }
        Err(e) => {
            setup_tracing(&args, LogLevel::Info);
            return Err(e);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    })?;

    let context = Context {
        config: &config,
        debug: args.debug,
        json: args.json,
        stop,
    };
    let stdout = std::io::stdout();
    execute(&context, &args.command, &mut stdout.lock())
}

fn setup_tracing(args: &Args, log_level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        log_level.as_str().parse().unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
