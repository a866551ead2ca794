//! `skylinkd` – runs one Skylink control plane.
//!
//! 1. Parses the command line and loads the TOML configuration
//!    (`skylink.toml` by default, `SKYLINK_*` environment overrides applied).
//! 2. Installs tracing (see `skylink_runtime::telemetry`).
//! 3. Starts the control plane and prints its status snapshot.
//! 4. Reads operator commands from stdin until `quit`, EOF or Ctrl-C, then
//!    shuts the control plane down.

mod console;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use skylink_runtime::{ControlPlane, ControlPlaneConfig, DEFAULT_CONFIG_FILE, init_tracing};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::console::{ConsoleAction, parse_line};

/// Drone control plane: command routing, telemetry and safety supervision.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Connection specification, overriding the configuration file
    #[arg(long)]
    connection: Option<String>,

    /// Run without the interactive console; stop on Ctrl-C only
    #[arg(long)]
    headless: bool,

    /// Write the effective configuration to `--config` and exit
    #[arg(long)]
    write_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ControlPlaneConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(connection) = args.connection {
        config.connection = connection;
    }

    if args.write_config {
        config.validate()?;
        config.save(&args.config)?;
        println!("  {} wrote {}", "✓".green().bold(), args.config.display());
        return Ok(());
    }

    // The OTLP exporter is built before the runtime exists.
    let _guard = init_tracing("skylinkd");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?;
    runtime.block_on(run(config, args.headless))
}

async fn run(config: ControlPlaneConfig, headless: bool) -> anyhow::Result<()> {
    print_banner(&config);
    let plane = ControlPlane::start(config)
        .await
        .context("starting the control plane")?;
    print_status(&plane)?;

    if headless {
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
        println!();
    } else {
        println!("  Type {} for a list of commands.\n", "help".bold().cyan());
        operator_loop(&plane).await?;
    }

    println!("{}", "  Shutting down …".yellow().bold());
    plane.shutdown().await;
    println!("{}", "  ✓ Links closed.".green());
    Ok(())
}

async fn operator_loop(plane: &ControlPlane) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                println!();
                info!("Ctrl-C received");
                return Ok(());
            }
        };
        // EOF
        let Some(line) = line else {
            return Ok(());
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleAction::Send(command))) => {
                let label = command.command_type().to_string();
                if plane.send_command(command).await {
                    println!("  {} {}", "✓".green().bold(), label);
                } else {
                    println!("  {} {} not delivered", "✗".red().bold(), label);
                }
            }
            Ok(Some(ConsoleAction::Switch(protocol))) => {
                match plane.manager().switch_primary_protocol(protocol) {
                    Ok(()) => println!("  {} primary link is now {}", "✓".green().bold(), protocol),
                    Err(e) => {
                        warn!(error = %e, "primary switch rejected");
                        println!("  {} {}", "✗".red().bold(), e);
                    }
                }
            }
            Ok(Some(ConsoleAction::Status)) => print_status(plane)?,
            Ok(Some(ConsoleAction::Help)) => println!("{}", console::HELP),
            Ok(Some(ConsoleAction::Quit)) => return Ok(()),
            Err(e) => println!("  {}: {}", "Error".red(), e),
        }
    }
}

fn print_status(plane: &ControlPlane) -> anyhow::Result<()> {
    let status = serde_json::to_string_pretty(&plane.status())?;
    println!("{status}");
    Ok(())
}

fn print_banner(config: &ControlPlaneConfig) {
    println!();
    println!(
        "  {} {}",
        "Skylink".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    let mode = if config.simulated { "simulated" } else { "hardware" };
    println!("  {} {}", mode.yellow(), config.connection.dimmed());
    println!();
}
