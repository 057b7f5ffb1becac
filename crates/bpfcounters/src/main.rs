//! bpfcounters entry point.
//!
//! Thin front end over [`bpf_counters::CountersMgr`]: parses flags, opens
//! the pinned maps and prints tables to stdout. Logs go to stderr.

mod cli;

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bpf_counters::{CounterStore, CountersConfig, CountersMgr, InterfaceSource};
use cli::{Cli, Command, CountersCommand};

/// Initialize tracing/logging.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

#[cfg(target_os = "linux")]
fn open_backend(config: &CountersConfig) -> Result<(Arc<dyn CounterStore>, Box<dyn InterfaceSource>)> {
    let store = bpf_counters::PinnedMapStore::new(config);
    Ok((Arc::new(store), Box::new(bpf_counters::SystemInterfaces)))
}

#[cfg(not(target_os = "linux"))]
fn open_backend(_config: &CountersConfig) -> Result<(Arc<dyn CounterStore>, Box<dyn InterfaceSource>)> {
    anyhow::bail!("pinned BPF maps are only available on Linux")
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.load_config().context("Failed to load configuration")?;
    let replicas = config
        .resolve_replicas()
        .context("Failed to determine replica count")?;
    let (store, interfaces) = open_backend(&config)?;
    let mgr = CountersMgr::new(store, replicas, interfaces)
        .context("Failed to create counters manager")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let Command::Counters(command) = &cli.command;
    match command {
        CountersCommand::Dump(args) => {
            let summary = mgr
                .dump_all(args.iface.as_deref(), args.format(), &mut out)
                .context("Failed to dump counter map.")?;
            if !summary.failed.is_empty() {
                info!(
                    "Dumped {} interfaces, skipped {}",
                    summary.dumped.len(),
                    summary.failed.len()
                );
            }
        }
        CountersCommand::Flush(args) => {
            mgr.flush_interface(&args.iface)
                .context("Failed to flush counter map.")?;
        }
        CountersCommand::Rules(args) => {
            mgr.dump_rules(args.iface.as_deref(), args.format(), &mut out)
                .context("Failed to dump rule counter map.")?;
        }
    }

    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
