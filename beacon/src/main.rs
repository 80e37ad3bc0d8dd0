//! beacon - CLI for the persistent event buffer
//!
//! This tool provides commands for:
//! - Checking buffer configuration and the pending backup
//! - Tracking an event and waiting for it to be delivered
//! - Flushing events left behind by an earlier run
//! - Discarding the backup
//!
//! Uses XDG Base Directory specification for file locations:
//! - Backup: $XDG_DATA_HOME/beacon/BackupEvents.json (~/.local/share/beacon/BackupEvents.json)
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)

use anyhow::{Context, Result};
use beacon_core::{BackupStore, BatchCodec, Config, EventBuffer, FileStore, JsonCodec};
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Buffer events locally and deliver them to a collector")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show buffer configuration and pending events
    Status,

    /// Record an event and wait for delivery
    Track {
        /// Event type, e.g. "click"
        event_type: String,

        /// Event payload
        data: String,

        /// Seconds to wait for delivery before leaving events in the backup
        #[arg(short, long, default_value_t = 10.0)]
        wait: f64,
    },

    /// Deliver events left in the backup by an earlier run
    Flush {
        /// Seconds to wait for delivery before giving up
        #[arg(short, long, default_value_t = 10.0)]
        wait: f64,
    },

    /// Discard the backup without delivering it
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(beacon_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Track {
            event_type,
            data,
            wait,
        } => cmd_track(&config, event_type, data, wait).await,
        Command::Flush { wait } => cmd_flush(&config, wait).await,
        Command::Clear => cmd_clear(&config),
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Beacon Event Buffer");
    println!("===================");
    println!();

    let buffer = &config.buffer;

    println!(
        "Server URL:      {}",
        buffer.server_url.as_deref().unwrap_or("<not set>")
    );
    println!("Cooldown:        {}s", buffer.cooldown_secs);
    println!("Timeout:         {}s", buffer.timeout_secs);
    println!("Backup:          {}", buffer.backup_path().display());
    println!(
        "Logs:            {}",
        beacon_core::logging::log_dir().display()
    );

    let store = FileStore::new(buffer.backup_path());
    let pending = if store.exists() {
        let bytes = store.read_all().context("failed to read backup")?;
        JsonCodec
            .decode(&bytes)
            .context("backup is not a valid event batch")?
            .events
    } else {
        Vec::new()
    };

    println!("Pending events:  {}", pending.len());
    for event in &pending {
        println!("  {:<16} {}", event.event_type, event.data);
    }

    println!();
    match buffer.validate() {
        Ok(()) => println!("Status: Ready to deliver"),
        Err(e) => println!("Status: Not ready ({})", e),
    }

    Ok(())
}

async fn cmd_track(config: &Config, event_type: String, data: String, wait: f64) -> Result<()> {
    let buffer =
        EventBuffer::from_config(&config.buffer).context("failed to start event buffer")?;

    buffer.track(event_type, data);

    drain(&buffer, wait).await
}

async fn cmd_flush(config: &Config, wait: f64) -> Result<()> {
    let buffer =
        EventBuffer::from_config(&config.buffer).context("failed to start event buffer")?;

    if !buffer.is_cooling_down() {
        println!("No pending events to flush.");
        return Ok(());
    }

    println!("Flushing {} pending event(s)...", buffer.pending_count());
    drain(&buffer, wait).await
}

/// Wait up to `wait` seconds for the buffer to go idle, then stop it
async fn drain(buffer: &EventBuffer, wait: f64) -> Result<()> {
    let wait = Duration::try_from_secs_f64(wait).context("--wait must be a non-negative number")?;

    let delivered = tokio::time::timeout(wait, buffer.wait_idle()).await.is_ok();
    buffer.shutdown();

    let stats = buffer.stats();
    tracing::info!(
        delivered,
        pending = buffer.pending_count(),
        attempts = stats.attempts,
        "Drain finished"
    );

    if delivered {
        println!("Delivered {} event(s)", stats.events_delivered);
    } else {
        println!(
            "{} event(s) still pending; they will be retried on the next run",
            buffer.pending_count()
        );
    }

    if stats.attempts > 0 {
        println!();
        println!("Stats:");
        println!("  Attempts:   {}", stats.attempts);
        println!("  Failures:   {}", stats.failures);
    }

    Ok(())
}

fn cmd_clear(config: &Config) -> Result<()> {
    let store = FileStore::new(config.buffer.backup_path());

    if !store.exists() {
        println!("No backup to clear.");
        return Ok(());
    }

    store.delete().context("failed to delete backup")?;
    println!("Removed {}", store.path().display());
    Ok(())
}
