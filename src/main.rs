//! Print agent daemon: fetches print jobs from the dispatch API and feeds
//! them to the local CUPS spooler.
//!
//! Usage:
//!   print-agent -c /etc/print-agent/print_agent.conf
//!   print-agent --dry-run          # full pipeline, nothing reaches the printer

mod agent;
mod api;
mod config;
mod error;
mod executor;
mod identity;
mod job;
mod printer;
mod util;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::signal::unix::{signal, SignalKind};

use crate::agent::Agent;
use crate::config::AgentConfig;
use crate::printer::CupsCli;

const DEFAULT_CONFIG: &str = "/etc/print-agent/print_agent.conf";

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "print-agent", about = "Print station agent for the job dispatch API")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Log to stderr even if syslog is configured.
    #[arg(long)]
    stderr: bool,

    /// Download and report jobs but never submit them to the spooler.
    #[arg(long)]
    dry_run: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Only populates the environment; reported once logging is up.
    let dotenv_err = config::load_dotenv();
    let cfg = match load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("print-agent: config error: {e}");
            process::exit(1);
        }
    };

    let use_syslog = cfg.log_syslog && !cli.stderr;
    if let Err(e) = setup_logging(use_syslog) {
        eprintln!("print-agent: logging setup: {e}");
        process::exit(1);
    }
    if let Some(e) = dotenv_err {
        warn!("ignoring .env file: {e}");
    }

    if let Some(pid_file) = &cfg.pid_file {
        if let Err(e) = util::write_pid_file(pid_file) {
            error!("cannot write PID file {}: {e}", pid_file.display());
        }
    }

    let cfg = Arc::new(cfg);
    info!(
        "Print Service STARTED: api={} dry_run={} workers={}",
        cfg.api_url, cfg.dry_run, cfg.max_print_workers
    );

    let agent = match Agent::new(Arc::clone(&cfg), Arc::new(CupsCli::new())) {
        Ok(a) => a,
        Err(e) => {
            error!("cannot start agent: {e}");
            process::exit(1);
        }
    };

    tokio::select! {
        _ = agent.run() => {}
        sig = shutdown_signal() => info!("received {sig}"),
    }

    if let Some(pid_file) = &cfg.pid_file {
        util::remove_pid_file(pid_file);
    }
    info!("SERVICE TERMINATED");
}

/// Defaults → config file → `.env` → environment → CLI flags.
fn load(cli: &Cli) -> error::Result<AgentConfig> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path, true)?,
        None => config::load_config(&PathBuf::from(DEFAULT_CONFIG), false)?,
    };
    config::apply_env(&mut cfg, std::env::vars());
    if cli.dry_run {
        cfg.dry_run = true;
    }
    config::validate_config(&cfg)?;
    Ok(cfg)
}

/// Resolve on SIGINT or SIGTERM; returns the signal name.
async fn shutdown_signal() -> &'static str {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process:  "print-agent".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .try_init()?;
    }
    Ok(())
}
