// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The `buildat_server` binary: wires the Module Host up with the
//! builtin modules and drives its event-drain loop. Grounded on
//! `examples/original_source/src/server/main.cpp`'s option parsing and
//! `rapid_headless/src/main.rs`'s `clap` + `tracing-subscriber` +
//! `tokio::main` shape.

use clap::Parser;
use module_core::{Host, HostError, Registry, EVENT_START};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// The original binds "any4:20000" unconditionally; the network module
/// has no CLI flag of its own (spec §6.4 lists only these options), so
/// the default listen address is a constant here instead.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:20000";

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

/// Buildat server: a modular, live-reloadable application host.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the directory of user-provided modules.
    #[arg(short = 'm', long = "modules-path", default_value = "modules")]
    modules_path: String,

    /// Path to share/, whose `builtin/` subdirectory holds the builtin
    /// modules' `meta.txt` and `client_data/`.
    #[arg(short = 'S', long = "share-path", default_value = "share")]
    share_path: String,

    /// Accepted for compatibility with the original tool. Builtin modules
    /// are linked statically in this implementation, so there is no
    /// compiler left to invoke; the flag is parsed and ignored.
    #[arg(short = 'c', long = "compiler-command")]
    compiler_command: Option<String>,

    /// One of the `tracing` level names (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,

    /// Append log output to this file instead of stderr.
    #[arg(short = 'L', long = "log-file")]
    log_file: Option<String>,

    /// Accepted for compatibility; inert for the same reason as
    /// `--compiler-command`.
    #[arg(short = 'C', long = "skip-compile")]
    skip_compile: Vec<String>,
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("could not open log file '{path}': {e}"));
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(Mutex::new(file)).init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// The shared table of builtin module constructors, handed both to the
/// direct startup calls below and to the `loader` module (which needs
/// its own copy to satisfy modules discovered on disk by name).
fn build_registry() -> Registry {
    let mut registry = Registry::new();
    let listen_addr: SocketAddr = DEFAULT_LISTEN_ADDR.parse().expect("valid default listen address");
    registry.register("network", move |host, path| network::constructor(listen_addr)(host, path));
    registry.register("client_file", |host, path| client_file::constructor()(host, path));
    registry
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.compiler_command.is_some() || !cli.skip_compile.is_empty() {
        info!("--compiler-command/--skip-compile are accepted but unused: modules are statically linked");
    }

    info!("Buildat server starting");
    let builtin_modules_path = format!("{}/builtin", cli.share_path);
    let host = Host::new(cli.modules_path, builtin_modules_path);

    let registry = build_registry();
    host.load_module("network", "builtin/network", registry.get("network").unwrap());
    host.load_module("client_file", "builtin/client_file", registry.get("client_file").unwrap());
    host.load_module("loader", "builtin/loader", loader::constructor(build_registry()));

    let shutdown_host = host.clone();
    let ctrlc_result = ctrlc::set_handler(move || {
        info!("received SIGINT, shutting down");
        shutdown_host.shutdown(0, "interrupted");
    });
    if let Err(e) = ctrlc_result {
        error!(error = %e, "failed to install SIGINT handler");
    }

    host.emit_named(EVENT_START, Arc::new(()));

    let mut interval = tokio::time::interval(TICK_INTERVAL);
    let exit_status = loop {
        interval.tick().await;
        match host.handle_events() {
            Ok(()) => continue,
            Err(HostError::Shutdown { exit_status, reason }) => {
                info!(exit_status, reason = %reason, "shutting down");
                break exit_status;
            }
            Err(e) => {
                error!(error = %e, "unrecoverable host error");
                break 1;
            }
        }
    };

    ExitCode::from(exit_status.clamp(0, 255) as u8)
}
