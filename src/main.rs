use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use flashforge::mode::PrinterMode;
use flashforge_emulator::{logging, Config, Emulator};

/// Emulate a FlashForge printer on the local network.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "flashforge-emulator")]
struct Cli {
    /// Config file to use
    #[arg(long, short, default_value = "emulator_config.json", env = "FLASHFORGE_EMULATOR_CONFIG")]
    config: PathBuf,

    /// Print debug info
    #[arg(short, long)]
    debug: bool,

    /// Print logs as json
    #[arg(short, long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start discovery, the command port and the HTTP API and run the
    /// simulation until interrupted.
    Serve {
        /// Milliseconds between simulation ticks.
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,

        /// Override the configured printer model (5M, 5M_Pro, AD5X).
        #[arg(long)]
        mode: Option<PrinterMode>,

        /// Do not write the state back to the config file on exit.
        #[arg(long)]
        no_save: bool,
    },
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

async fn handle_signals() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up SIGINT handler");
            e
        })?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up SIGTERM handler");
            e
        })?;

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await.map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up Ctrl+C handler");
            anyhow::Error::new(e)
        })?;

        tracing::info!("received Ctrl+C (SIGINT)");
    }

    tracing::info!("triggering cleanup...");
    Ok(())
}

async fn serve(cli: &Cli, tick_ms: u64, mode: Option<PrinterMode>, save: bool) -> Result<()> {
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };
    if let Some(mode) = mode {
        config.mode = mode;
    }

    let mut emulator = Emulator::new(config)?;
    emulator.start_all().await?;
    let addrs = emulator.addresses();
    tracing::info!(
        discovery = ?addrs.discovery,
        command = ?addrs.command,
        http = ?addrs.http,
        "emulator running"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    let shutdown = handle_signals();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => emulator.tick().await,
            result = &mut shutdown => {
                result?;
                break;
            }
        }
    }

    let snapshot = emulator.config_snapshot().await;
    emulator.shutdown().await;
    if save {
        snapshot.save(&cli.config)?;
        tracing::info!(path = %cli.config.display(), "saved config");
    }

    tracing::info!("all clean, exiting!");
    Ok(())
}

fn init_config(cli: &Cli, force: bool) -> Result<()> {
    if cli.config.exists() && !force {
        bail!("{} already exists, pass --force to overwrite it", cli.config.display());
    }
    Config::default().save(&cli.config)?;
    tracing::info!(path = %cli.config.display(), "wrote default config");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_tracing(cli.json, cli.debug, None)?;

    match &cli.command {
        Commands::Serve {
            tick_ms,
            mode,
            no_save,
        } => serve(&cli, *tick_ms, *mode, !no_save).await,
        Commands::InitConfig { force } => init_config(&cli, *force),
    }
}
