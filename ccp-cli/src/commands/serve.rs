//! `ccp serve`: run the control endpoint until interrupted.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ccp::server::{Server, ServerConfig, ShutdownMode};
use console::style;
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::{CliRunner, GlobalArgs};
use crate::ui::{choose_shutdown, ShutdownChoice};

/// Arguments for `ccp serve`.
pub struct ServeArgs {
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub root: Option<PathBuf>,
    pub max_streams: Option<usize>,
    pub force: bool,
}

pub fn run(args: ServeArgs, global: &GlobalArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    runner.log_startup("serve");
    let settings = &runner.config().server;

    let bind = match args.bind {
        Some(ip) => ip,
        None => settings.bind.parse().map_err(|_| {
            CliError::Config(format!("server.bind is not an IP address: {}", settings.bind))
        })?,
    };
    let root = match args.root.or_else(|| settings.root.clone()) {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    if !root.is_dir() {
        return Err(CliError::InvalidArgument(format!(
            "root is not a directory: {}",
            root.display()
        )));
    }

    let config = ServerConfig::default()
        .with_bind(bind)
        .with_port(args.port.unwrap_or(settings.port))
        .with_root(root.clone())
        .with_max_streams(args.max_streams.unwrap_or(settings.max_streams))
        .with_accept_timeout(settings.accept_timeout())
        .with_compression_level(settings.compression_level)
        .with_block_size(settings.block_size)
        .with_spool_limit(settings.spool_limit);
    let max_streams = config.max_streams;

    let server = Server::bind(config)?.spawn()?;

    println!("ccp server v{}", ccp::VERSION);
    println!("==============");
    println!();
    println!("Listening:   {}", server.local_addr());
    println!("Root:        {}", root.display());
    println!("Max streams: {}", max_streams);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let mode = loop {
        while !interrupted.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }

        let active = server.handle().active_connections();
        if active.is_empty() {
            break ShutdownMode::Wait;
        }
        if args.force {
            break ShutdownMode::Force;
        }

        match choose_shutdown(&active)? {
            ShutdownChoice::WaitForTransfers => {
                println!("Waiting for {} connection(s) to finish...", active.len());
                break ShutdownMode::Wait;
            }
            ShutdownChoice::AbortTransfers => break ShutdownMode::Force,
            ShutdownChoice::KeepServing => {
                info!("Shutdown cancelled, still serving");
                interrupted.store(false, Ordering::SeqCst);
            }
        }
    };

    if mode == ShutdownMode::Force {
        warn!("Aborting active transfers");
    }
    server.shutdown(mode)?;

    println!("{}", style("Server stopped.").bold());
    Ok(())
}
