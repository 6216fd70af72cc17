//! SDR Hub - shared RTL-SDR receiver with supervised decoders
//!
//! Starts the configured decoder pipeline, or opens the receiver for direct
//! monitoring, and logs status until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sdr_hub::decoder::PipelineState;
use sdr_hub::device::DeviceArbiter;
use sdr_hub::sdr::probe_device;
use sdr_hub::{Config, Family, Hub};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   SDR Hub - shared RTL-SDR receiver");
    info!("===========================================");

    let config = Config::from_env();

    if config.mock {
        info!("Mock mode: using synthetic receiver");
    } else {
        info!("Querying RTL-SDR device info...");
        match probe_device(&config.rtl_sdr_path, config.device_index) {
            Some(device) => {
                if let Some(mfr) = &device.manufacturer {
                    info!("  Manufacturer: {}", mfr);
                }
                if let Some(prd) = &device.product {
                    info!("  Product: {}", prd);
                }
                if let Some(sn) = &device.serial {
                    info!("  Serial: {}", sn);
                }
            }
            None => info!("  Could not query device info"),
        }
    }

    info!("Configuration:");
    info!("  Device index: {}", config.device_index);
    info!("  Sample rate: {} S/s", config.sample_rate);
    info!("  Center frequency: {:.3} MHz", config.center_freq as f64 / 1e6);
    info!("  Gain: {}", config.gain);
    info!("  PPM error: {}", config.ppm_error);
    info!("  Work dir: {}", config.work_dir.display());

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;

    let pipeline = config
        .pipeline
        .as_deref()
        .map(str::parse::<Family>)
        .transpose()
        .context("invalid SDR_PIPELINE")?;
    let pipeline_freq = config.pipeline_freq;
    let interval = config.status_interval;

    let hub = Arc::new(Hub::new(config, Arc::new(DeviceArbiter::new())));

    match pipeline {
        Some(family) => {
            info!("Starting {} pipeline...", family);
            hub.start_family(family, pipeline_freq)
                .with_context(|| format!("failed to start {} pipeline", family))?;
        }
        None => {
            info!("No pipeline configured, opening receiver for monitoring");
            if let Err(e) = hub.open_source() {
                error!("Failed to open receiver: {}", e);
                error!("Make sure RTL-SDR device is connected and drivers are installed.");
                return Err(e).context("opening sample source");
            }
        }
    }

    info!("===========================================");
    info!("  Running. Press Ctrl+C to stop.");
    info!("===========================================");

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let hub = hub.clone();
                let keep_going = tokio::task::spawn_blocking(move || report(&hub, pipeline))
                    .await
                    .context("status task panicked")?;
                if !keep_going {
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || hub.stop_all())
        .await
        .context("shutdown task panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Log one status line; false once the watched pipeline has failed
fn report(hub: &Hub, pipeline: Option<Family>) -> bool {
    match pipeline {
        Some(family) => {
            let status = hub.status(family);
            info!(
                "[{}] state={:?} active={} events={} total={} malformed={} audio={}B",
                status.name,
                status.state,
                status.active,
                status.event_count,
                status.events_total,
                status.malformed,
                status.audio_bytes
            );
            if status.state == PipelineState::Failed {
                error!(
                    "[{}] {}",
                    status.name,
                    status.last_error.as_deref().unwrap_or("decoder failed")
                );
                return false;
            }
            true
        }
        None => match hub.spectrum() {
            Ok(spectrum) => {
                if let Some(summary) = spectrum.summary() {
                    info!(
                        "[Monitor] {:.3} MHz: peak {:.4} MHz at {:.1} dB, noise floor {:.1} dB",
                        summary.center_freq_hz / 1e6,
                        summary.peak_freq_hz / 1e6,
                        summary.peak_power_db,
                        summary.noise_floor_db
                    );
                }
                true
            }
            Err(e) => {
                warn!("[Monitor] spectrum read failed: {}", e);
                false
            }
        },
    }
}
