//! # VTX Bridge
//!
//! UART control for FPV video transmitters.
//!
//! Speaks SmartAudio or Tramp over a serial port and continuously reconciles
//! the transmitter's actual band, channel, power and pit mode against the
//! configured targets.

use anyhow::Result;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber;

mod config;
mod device;
mod error;
mod reconciler;
mod serial;
mod smartaudio;
mod tramp;

use config::{BackendKind, Config};
use device::VtxDevice;
use reconciler::{FlightState, Reconciler};
use serial::UartPort;
use smartaudio::SmartAudioBackend;
use tramp::TrampBackend;

/// Reconciliation cadence; both protocol tick budgets assume it
const TICK_INTERVAL_MS: u64 = 200;

/// SmartAudio nominal baud rate (autobauding adjusts from here)
const SMARTAUDIO_BAUD: u32 = 4800;

/// Tramp fixed baud rate
const TRAMP_BAUD: u32 = 9600;

/// Ticks between status log lines (~10 seconds)
const STATUS_LOG_INTERVAL_TICKS: u64 = 50;

/// Main entry point for VTX Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging with tracing subscriber
///    - Load the TOML configuration (path from the first argument)
///    - Open the serial port and register the configured backend
///
/// 2. **Main Loop**
///    - Run one reconciliation pass every 200 ms
///    - Log the transmitter status every ~10 seconds
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be read or fails validation
/// - The serial port cannot be opened
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    info!("VTX Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "vtx-bridge.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded configuration from {}", config_path);

    let mut device = VtxDevice::new();
    match config.serial.backend {
        BackendKind::SmartAudio => {
            // SmartAudio hardware wants two stop bits
            let port = UartPort::open(&config.serial.port, SMARTAUDIO_BAUD, 2)?;
            info!("SmartAudio port opened at: {}", port.device_path());
            device.register(Box::new(SmartAudioBackend::new(Box::new(port))));
        }
        BackendKind::Tramp => {
            let port = UartPort::open(&config.serial.port, TRAMP_BAUD, 1)?;
            info!("Tramp port opened at: {}", port.device_path());
            device.register(Box::new(TrampBackend::new(
                Box::new(port),
                config.vtx.max_power_override_mw,
            )));
        }
    }

    let mut reconciler = Reconciler::new(config.vtx.clone(), config.auto_power.clone());

    // No flight controller feed yet; a bench rig reads as disarmed with no
    // GPS fix, which also exercises the low-power-disarm policy
    let flight = FlightState::default();

    let started = Instant::now();
    let mut tick_interval = interval(Duration::from_millis(TICK_INTERVAL_MS));
    let mut ticks: u64 = 0;

    info!("Reconciling every {} ms", TICK_INTERVAL_MS);
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let now_ms = started.elapsed().as_millis() as u64;
                reconciler.update(&mut device, &flight, now_ms);

                ticks += 1;
                if ticks % STATUS_LOG_INTERVAL_TICKS == 0 {
                    match device.osd_info() {
                        Some(osd) => info!(
                            "VTX {}{} {} MHz, {} mW{}",
                            osd.band_letter,
                            osd.channel,
                            osd.frequency_mhz,
                            osd.power_mw,
                            if device.pit_mode() == Some(true) { " (pit)" } else { "" },
                        ),
                        None => debug!("VTX not detected yet"),
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    Ok(())
}
