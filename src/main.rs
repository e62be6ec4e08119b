//! # mLRS Tx
//!
//! Host runner of the transmitter core.
//!
//! Speaks MBridge with the radio on a serial port and runs the RF link over
//! the loopback simulation, so the radio side can be exercised without RF
//! hardware.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use mlrs_tx::config::{Config, SerialDestination};
use mlrs_tx::link::sim::{SimAir, SimFrameCodec, SimRadio};
use mlrs_tx::link::{
    Antenna, FifoTunnel, IrqMailbox, LinkScheduler, RadioPort, SerialTunnel, WindowedLqTracker,
};
use mlrs_tx::mbridge::commands::DeviceItem;
use mlrs_tx::mbridge::service::{ReceiverInfo, TxDeviceInfo};
use mlrs_tx::mbridge::{MBridgeEvent, MBridgeFramer, MBridgeService, SetupParameters};
use mlrs_tx::serial::{HostSerial, MicrosClock, FALLBACK_DEVICE_PATHS};

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Seconds between status log messages
const STATUS_INTERVAL_S: u64 = 5;

/// Buffering between the link and a separate tunnel port
const TUNNEL_FIFO_SIZE: usize = 512;

/// Receiver sensitivity reported to the radio
const RECEIVER_SENSITIVITY_DBM: i16 = -105;

/// Transmit power reported to the radio
const TX_POWER_DBM: i8 = 10;

/// Read from an optional port, never completing if there is none
async fn read_opt(port: &mut Option<HostSerial>, buf: &mut [u8]) -> mlrs_tx::error::Result<usize> {
    match port {
        Some(port) => port.read(buf).await,
        None => std::future::pending().await,
    }
}

fn handle_event(event: MBridgeEvent) {
    match event {
        MBridgeEvent::ParamChanged { index, rx_param_changed } => {
            info!("Parameter {} changed (receiver side: {})", index, rx_param_changed);
        }
        MBridgeEvent::ModelIdSet(id) => info!("Model id set to {}", id),
        other => warn!("{:?} is not available in the host runner", other),
    }
}

/// Main entry point for the transmitter runner
///
/// # Control Flow
///
/// 1. Load configuration, set up logging
/// 2. Open the MBridge port and, if configured, the tunnel port
/// 3. Every millisecond tick the link scheduler and service the MBridge;
///    bytes from the radio are framed and answered as they arrive
/// 4. Ctrl+C shuts down
///
/// # Errors
///
/// Returns error if the configuration is invalid, a port cannot be opened,
/// or the link hits a logic fault
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    info!("mLRS Tx v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    // RF link over the loopback simulation
    let air = SimAir::shared(config.link.frame_sync_word);
    let radio = |antenna: Antenna| {
        let irq = Arc::new(IrqMailbox::new());
        let radio = SimRadio::new(antenna, air.clone(), irq.clone());
        Some(RadioPort::new(radio, irq))
    };
    let mut scheduler = LinkScheduler::new(
        &config.link,
        SimFrameCodec::new(config.link.frame_sync_word),
        Box::new(WindowedLqTracker::new(
            config.link.lq_averaging_period_ms,
            config.link.frame_rate_ms,
        )),
        radio(Antenna::Antenna1),
        radio(Antenna::Antenna2),
    )?;
    info!(
        "Link: {} ms frames, {} hop channels, antenna {:?}",
        config.link.frame_rate_ms, config.link.fhss_num, config.link.antenna
    );

    // MBridge
    let tx_info = TxDeviceInfo {
        device: DeviceItem {
            firmware_version: config.device.firmware_version_u16()?,
            setup_layout: config.device.setup_layout,
            device_name: config.device.name.clone(),
        },
        receiver_sensitivity_dbm: RECEIVER_SENSITIVITY_DBM,
        actual_power_dbm: TX_POWER_DBM,
        actual_diversity: config.link.antenna.as_u8(),
    };
    let mut framer = MBridgeFramer::new();
    let mut service = MBridgeService::new(
        SetupParameters::standard(),
        tx_info.clone(),
        config.mbridge.channel_order,
    );

    let mut mbridge_port = if config.mbridge.enabled {
        let mut paths = vec![config.serial.port.as_str()];
        paths.extend(FALLBACK_DEVICE_PATHS.iter().filter(|p| **p != config.serial.port));
        Some(HostSerial::open_with_paths(&paths, config.serial.baud_rate)?)
    } else {
        info!("MBridge disabled");
        None
    };

    let destination = config.mbridge.serial_destination;
    let mut tunnel_port = match (destination, config.serial.tunnel_port.as_deref()) {
        (SerialDestination::SerialPort, Some(path)) => {
            Some(HostSerial::open_with_paths(&[path], config.serial.tunnel_baud_rate)?)
        }
        _ => None,
    };
    let mut fifo = FifoTunnel::<TUNNEL_FIFO_SIZE>::new();

    let clock = MicrosClock::new();
    let mut tick = interval(Duration::from_millis(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut status = interval(Duration::from_secs(STATUS_INTERVAL_S));
    let mut mbridge_buf = [0u8; 256];
    let mut tunnel_buf = [0u8; 256];
    let mut was_connected = false;

    info!("Running, press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = tick.tick() => {
                scheduler.tick_ms();

                let tunnel: Option<&mut dyn SerialTunnel> = match destination {
                    SerialDestination::MBridge => Some(&mut framer as &mut dyn SerialTunnel),
                    SerialDestination::SerialPort => Some(&mut fifo as &mut dyn SerialTunnel),
                    SerialDestination::None => None,
                };
                scheduler.poll(tunnel).context("Link fault")?;

                if scheduler.connected() != was_connected {
                    was_connected = scheduler.connected();
                    // the simulated receiver mirrors this module
                    service.set_receiver(was_connected.then(|| ReceiverInfo {
                        device: tx_info.device.clone(),
                        actual_power_dbm: tx_info.actual_power_dbm,
                        actual_diversity: tx_info.actual_diversity,
                    }));
                }

                if config.mbridge.enabled {
                    if let Some(event) = service.poll(&mut framer, &scheduler.link_stats()) {
                        handle_event(event);
                    }
                    if let Some(rc) = service.take_rc_data() {
                        scheduler.set_rc_data(rc);
                    }
                }

                if let Some(port) = tunnel_port.as_mut() {
                    let out = fifo.drain_outbound();
                    if !out.is_empty() {
                        port.send(&out).await?;
                    }
                }
            }

            n = read_opt(&mut mbridge_port, &mut mbridge_buf) => {
                let n = n?;
                if let Some(port) = mbridge_port.as_mut() {
                    port.feed_mbridge(&mbridge_buf[..n], &mut framer, &clock).await?;
                }
            }

            n = read_opt(&mut tunnel_port, &mut tunnel_buf) => {
                fifo.push_inbound(&tunnel_buf[..n?]);
            }

            _ = status.tick() => {
                let stats = scheduler.stats();
                info!(
                    "{:?}, tx seq {}, rx antenna {:?}, rssi {} dBm, {} B/s out, {} B/s in",
                    scheduler.connect_state(),
                    stats.transmit_seq_no,
                    stats.last_rx_antenna,
                    stats.last_rx_rssi(),
                    stats.bytes_per_sec_transmitted,
                    stats.bytes_per_sec_received,
                );
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
