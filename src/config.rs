//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, TxError};
use crate::link::diversity::AntennaConfig;
use crate::link::fhss::FHSS_MAX_NUM;
use crate::mbridge::commands::version_to_u16;
use crate::mbridge::ChannelOrder;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub link: LinkConfig,
    pub mbridge: MBridgeConfig,
    pub device: DeviceConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Port wired to the radio's JR bay
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Separate port for the serial tunnel, used with `serial_destination = "serial_port"`
    #[serde(default)]
    pub tunnel_port: Option<String>,

    #[serde(default = "default_tunnel_baud_rate")]
    pub tunnel_baud_rate: u32,
}

/// RF link configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    #[serde(default = "default_frame_rate_ms")]
    pub frame_rate_ms: u16,

    /// Valid cycles in Sync before the link counts as connected
    #[serde(default = "default_connect_sync_cnt")]
    pub connect_sync_cnt: u8,

    #[serde(default = "default_connect_tmo_ms")]
    pub connect_tmo_ms: u16,

    #[serde(default = "default_send_frame_tmo_ms")]
    pub send_frame_tmo_ms: u16,

    #[serde(default = "default_lq_averaging_period_ms")]
    pub lq_averaging_period_ms: u16,

    #[serde(default = "default_frame_sync_word")]
    pub frame_sync_word: u16,

    #[serde(default = "default_fhss_num")]
    pub fhss_num: usize,

    #[serde(default = "default_fhss_seed")]
    pub fhss_seed: u32,

    #[serde(default)]
    pub antenna: AntennaConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frame_rate_ms: default_frame_rate_ms(),
            connect_sync_cnt: default_connect_sync_cnt(),
            connect_tmo_ms: default_connect_tmo_ms(),
            send_frame_tmo_ms: default_send_frame_tmo_ms(),
            lq_averaging_period_ms: default_lq_averaging_period_ms(),
            frame_sync_word: default_frame_sync_word(),
            fhss_num: default_fhss_num(),
            fhss_seed: default_fhss_seed(),
            antenna: AntennaConfig::default(),
        }
    }
}

/// Where the serial tunnel of the link ends on this side
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialDestination {
    /// Serial packets of the MBridge
    #[default]
    #[serde(rename = "mbridge")]
    MBridge,
    /// A separate serial port
    #[serde(rename = "serial_port")]
    SerialPort,
    #[serde(rename = "none")]
    None,
}

/// MBridge configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MBridgeConfig {
    #[serde(default = "default_mbridge_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub channel_order: ChannelOrder,

    #[serde(default)]
    pub serial_destination: SerialDestination,
}

/// Device identity reported to the radio
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,

    /// Dotted "major.minor.patch"
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,

    #[serde(default = "default_setup_layout")]
    pub setup_layout: u16,
}

impl DeviceConfig {
    /// Firmware version in the MBridge wire format
    ///
    /// # Errors
    ///
    /// Returns error if the version is not three dot separated numbers 0..=255
    pub fn firmware_version_u16(&self) -> Result<u16> {
        let parts: Vec<&str> = self.firmware_version.split('.').collect();
        let parsed: std::result::Result<Vec<u8>, _> = parts.iter().map(|p| p.parse::<u8>()).collect();
        match parsed.as_deref() {
            Ok([major, minor, patch]) => Ok(version_to_u16(*major, *minor, *patch)),
            _ => Err(TxError::Config(toml::de::Error::custom(format!(
                "firmware_version '{}' must be major.minor.patch",
                self.firmware_version
            )))),
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 400000 }
fn default_tunnel_baud_rate() -> u32 { 57600 }

fn default_frame_rate_ms() -> u16 { 20 }
fn default_connect_sync_cnt() -> u8 { 5 }
fn default_connect_tmo_ms() -> u16 { 500 }
fn default_send_frame_tmo_ms() -> u16 { 10 }
fn default_lq_averaging_period_ms() -> u16 { 1000 }
fn default_frame_sync_word() -> u16 { 0x4D4C }
fn default_fhss_num() -> usize { 24 }
fn default_fhss_seed() -> u32 { 0x1234_5678 }

fn default_mbridge_enabled() -> bool { true }

fn default_device_name() -> String { "mLRS Tx".to_string() }
fn default_firmware_version() -> String { "1.3.0".to_string() }
fn default_setup_layout() -> u16 { 3 }

/// JR bay baud rates the radios use for the MBridge
pub const MBRIDGE_BAUD_RATES: &[u32] = &[115200, 400000, 420000];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mlrs_tx::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate serial port configuration
        if self.serial.port.is_empty() {
            return Err(TxError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if !MBRIDGE_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(TxError::Config(
                toml::de::Error::custom("baud_rate must be one of: 115200, 400000, 420000")
            ));
        }

        if self.mbridge.serial_destination == SerialDestination::SerialPort
            && self.serial.tunnel_port.as_deref().map_or(true, str::is_empty) {
            return Err(TxError::Config(
                toml::de::Error::custom("serial_destination 'serial_port' needs serial.tunnel_port")
            ));
        }

        // Validate link timing
        let link = &self.link;
        if link.frame_rate_ms == 0 || link.frame_rate_ms > 100 {
            return Err(TxError::Config(
                toml::de::Error::custom("frame_rate_ms must be between 1 and 100")
            ));
        }

        if link.connect_sync_cnt == 0 || link.connect_sync_cnt > 50 {
            return Err(TxError::Config(
                toml::de::Error::custom("connect_sync_cnt must be between 1 and 50")
            ));
        }

        if link.connect_tmo_ms < link.frame_rate_ms {
            return Err(TxError::Config(
                toml::de::Error::custom("connect_tmo_ms must not be shorter than frame_rate_ms")
            ));
        }

        if link.send_frame_tmo_ms == 0 || link.send_frame_tmo_ms > 100 {
            return Err(TxError::Config(
                toml::de::Error::custom("send_frame_tmo_ms must be between 1 and 100")
            ));
        }

        if link.lq_averaging_period_ms < link.frame_rate_ms {
            return Err(TxError::Config(
                toml::de::Error::custom("lq_averaging_period_ms must not be shorter than frame_rate_ms")
            ));
        }

        if link.frame_sync_word == 0 {
            return Err(TxError::Config(
                toml::de::Error::custom("frame_sync_word cannot be 0")
            ));
        }

        if link.fhss_num == 0 || link.fhss_num > FHSS_MAX_NUM {
            return Err(TxError::Config(
                toml::de::Error::custom(format!("fhss_num must be between 1 and {}", FHSS_MAX_NUM))
            ));
        }

        // Validate device identity
        if self.device.name.is_empty() {
            return Err(TxError::Config(
                toml::de::Error::custom("device name cannot be empty")
            ));
        }
        self.device.firmware_version_u16()?;

        Ok(())
    }
}
