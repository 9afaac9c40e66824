//! CAPWAP WTP daemon
//!
//! Finds an Access Controller, joins it and keeps the control session alive
//! until interrupted.

mod config;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use config::{Config, DEFAULT_CONFIG_PATH};
use wtp_core::Wtp;
use wtp_transport::{AsyncUdpTransport, Transport};

/// Exit status for a runtime failure
const EXIT_SYSTEM: u8 = 1;
/// Exit status for an unusable configuration
const EXIT_CONFIG: u8 = 2;
/// Exit status when the control socket cannot be bound
const EXIT_BIND: u8 = 3;

/// CAPWAP Wireless Termination Point
#[derive(Parser)]
#[command(name = "wtp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wtp: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if cli.check {
        println!("{}: ok", cli.config.display());
        return ExitCode::SUCCESS;
    }

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Bind(e)) => {
            tracing::error!("Cannot bind control socket: {:#}", e);
            ExitCode::from(EXIT_BIND)
        }
        Err(Failure::Config(e)) => {
            tracing::error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
        Err(Failure::System(e)) => {
            tracing::error!("{:#}", e);
            ExitCode::from(EXIT_SYSTEM)
        }
    }
}

enum Failure {
    Config(anyhow::Error),
    Bind(anyhow::Error),
    System(anyhow::Error),
}

async fn run(config: &Config) -> Result<(), Failure> {
    let service = config.security_service().map_err(Failure::Config)?;
    let core = config.to_wtp_config().map_err(Failure::Config)?;
    let mut wtp = Wtp::new(core, service)
        .map_err(|e| Failure::Config(e.into()))?;

    let bind = config.bind_addr().map_err(Failure::Config)?;
    let socket = AsyncUdpTransport::bind(bind, &config.transport_config())
        .await
        .map_err(|e| Failure::Bind(e.into()))?;
    match socket.local_addr() {
        Ok(addr) => tracing::info!("WTP {} listening on {}", config.wtp.name, addr),
        Err(e) => tracing::warn!("Cannot read local address: {}", e),
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = wtp_core::runner::run(&mut wtp, &socket, shutdown).await;

    let stats = wtp.stats();
    tracing::info!(
        "Stopped: {} discovery rounds, {} sulks, {} joins, {} resets, {} ACs excluded",
        stats.discovery_rounds,
        stats.sulks,
        stats.joins,
        stats.resets,
        stats.excluded_acs
    );
    let io = socket.stats();
    tracing::debug!(
        "Socket: {} datagrams sent, {} received, {} send errors",
        io.datagrams_sent,
        io.datagrams_received,
        io.send_errors
    );

    result.map_err(|e| Failure::System(e.into()))
}
