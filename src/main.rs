//! Pulse Capture - 433 MHz RF pulse-width decoder
//!
//! Reads edge transitions from an RF receiver's digital output,
//! classifies pulses (sync / data / end / faults), and streams the
//! decoded records to stdout. Thresholds are tunable at runtime over
//! the control socket.

mod clock;
mod config;
mod control;
mod fifo;
mod pulse;
mod session;
mod source;

use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::Config;
use pulse::thresholds::Thresholds;
use session::PulseDevice;
use source::{EdgeSource, LineSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   Pulse Capture - 433 MHz RF receiver");
    info!("   pulse-width decoder");
    info!("===========================================");

    // Load configuration
    let config = Config::from_env();

    info!("Configuration:");
    info!("  Control address: {}", config.control_addr);
    info!("  FIFO capacity: {} bytes", config.fifo_capacity);
    info!("  pulse_min_len: {} us", config.thresholds.pulse_min_len);
    info!(
        "  sync_pulse band: {}..{} us",
        config.thresholds.sync_pulse_min_len, config.thresholds.sync_pulse_max_len
    );
    info!(
        "  end_pulse_min_len: {} us",
        config.thresholds.end_pulse_min_len
    );
    info!("  echo_timestamps: {}", config.thresholds.echo_timestamps);

    // Pick the edge source: helper command, capture file, or stdin
    let source: Arc<dyn EdgeSource> = if let Some(cmd) = &config.source_command {
        let mut parts = cmd.split_whitespace();
        let program = parts.next().context("EDGE_SOURCE_CMD is empty")?;
        let args = parts.map(String::from).collect();
        Arc::new(LineSource::command(program, args))
    } else if let Some(path) = &config.source_file {
        Arc::new(LineSource::file(path.clone()))
    } else {
        Arc::new(LineSource::stdin())
    };

    let thresholds = Arc::new(Thresholds::new(config.thresholds));
    let device = PulseDevice::new(source, thresholds.clone(), config.fifo_capacity);

    // Open the capture session; this subscribes to the edge source
    let mut session = device
        .open()
        .context("failed to open the capture device")?;
    let interrupt = session.interrupter();

    // Control interface for runtime threshold tuning
    let listener = TcpListener::bind(&config.control_addr)
        .await
        .with_context(|| format!("failed to bind control address {}", config.control_addr))?;
    {
        let thresholds = thresholds.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(listener, thresholds).await {
                warn!("Control interface failed: {}", e);
            }
        });
    }

    info!("===========================================");
    info!("  Capture started, streaming to stdout.");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    // Blocking reader loop: forward decoded bytes to stdout
    let reader_handle = tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::stdout();
        let mut buf = [0u8; 512];
        loop {
            match session.read(&mut buf) {
                Ok(n) => {
                    if stdout
                        .write_all(&buf[..n])
                        .and_then(|()| stdout.flush())
                        .is_err()
                    {
                        warn!("stdout closed, stopping reader");
                        break;
                    }
                }
                // Interrupted: shutdown requested
                Err(_) => break,
            }
        }
        // Dropping the session stops the decode thread and releases
        // the device.
    });

    let stats = device.stats().clone();
    let mut stats_interval =
        tokio::time::interval(Duration::from_secs(config.stats_interval_secs.max(1)));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            _ = stats_interval.tick() => {
                info!(
                    "[Decoder] Edges: {} | Records: {} (dropped: {}) | Sync: {} | Data: {} | End: {} | ERR_LEN: {} | ERR_LEVEL: {}",
                    stats.edges_processed.load(Ordering::Relaxed),
                    stats.records_emitted.load(Ordering::Relaxed),
                    stats.records_dropped.load(Ordering::Relaxed),
                    stats.sync_records.load(Ordering::Relaxed),
                    stats.data_records.load(Ordering::Relaxed),
                    stats.end_records.load(Ordering::Relaxed),
                    stats.length_errors.load(Ordering::Relaxed),
                    stats.level_errors.load(Ordering::Relaxed),
                );
            }
        }
    }

    // Cancel the pending read and wait for the session to close
    interrupt.interrupt();
    let _ = reader_handle.await;

    info!(
        "Shutdown complete. Edges: {}, Records: {} (dropped: {})",
        stats.edges_processed.load(Ordering::Relaxed),
        stats.records_emitted.load(Ordering::Relaxed),
        stats.records_dropped.load(Ordering::Relaxed),
    );
    Ok(())
}
