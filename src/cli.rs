use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use smcsniff::config::Config;
use smcsniff::engine::{self, open_source, HandshakeReport, RunSummary};

#[derive(Parser)]
#[command(name = "smcsniff")]
#[command(author, version, about = "Passive SMC handshake sniffer")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture live from a network interface
    Listen {
        /// Interface to capture on (overrides the config)
        #[arg(short, long)]
        interface: Option<String>,

        /// Do not put the interface in promiscuous mode
        #[arg(long)]
        no_promisc: bool,

        /// Snapshot length in bytes
        #[arg(long)]
        snaplen: Option<i32>,
    },

    /// Replay a pcap file
    Read {
        /// Capture file
        file: PathBuf,
    },

    /// Generate default configuration
    GenConfig {
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Listen {
            interface,
            no_promisc,
            snaplen,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(interface) = interface {
                config.capture.interface = interface;
            }
            if no_promisc {
                config.capture.promiscuous = false;
            }
            if let Some(snaplen) = snaplen {
                config.capture.snaplen = snaplen;
            }
            cmd_capture(config, None).await
        }
        Commands::Read { file } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_capture(config, Some(file)).await
        }
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

async fn cmd_capture(config: Config, file: Option<PathBuf>) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let source = open_source(&config.capture, file.as_deref())?;
    let summary = engine::run(config, source, print_report).await?;

    if file.is_some() {
        print_summary(&summary);
    }

    Ok(())
}

fn print_report(report: &HandshakeReport) {
    println!("{}", report);
}

fn print_summary(summary: &RunSummary) {
    eprintln!(
        "{} packets read, {} SMC connections, {} streams",
        summary.capture.packets_received,
        summary.tracker.tracked_flows,
        summary.capture.streams_opened
    );
    eprintln!(
        "  decoded: {}  abandoned: {}  closed early: {}",
        summary.decoders.decoded, summary.decoders.abandoned, summary.decoders.closed
    );
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}
