//! Bridge configuration.
//!
//! Values are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. Optional JSON file (`--config bridge.json`)
//! 3. Command-line flags ([`ConfigOverrides`])
//!
//! # Example
//!
//! ```
//! use serial_udp_bridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::from_json_str(r#"{ "baud_rate": 115200 }"#).unwrap();
//! assert_eq!(config.baud_rate, 115200);
//! assert_eq!(config.bind.port(), 11880);
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, MAX_UNFRAGMENTED_PAYLOAD};
use crate::transport::{default_device, DEFAULT_BAUD_RATE};

/// Well-known UDP port the bridge listens on.
pub const DEFAULT_PORT: u16 = 11880;

/// Default bound on one write + read cycle.
pub const DEFAULT_CYCLE_TIMEOUT_MS: u64 = 5000;

/// Everything needed to run one bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Serial device path or port name.
    pub device: String,
    pub baud_rate: u32,
    /// UDP address to receive requests on.
    pub bind: SocketAddr,
    /// Upper bound for writing a request and reading its reply.
    pub cycle_timeout_ms: u64,
    /// Largest accepted reply, terminator included.
    pub max_frame_size: usize,
    /// Log every request and reply frame.
    pub log_frames: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: default_device().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            cycle_timeout_ms: DEFAULT_CYCLE_TIMEOUT_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_frames: false,
        }
    }
}

impl BridgeConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[inline]
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(BridgeError::Config("device must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(BridgeError::Config("baud_rate must be positive".into()));
        }
        if self.cycle_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "cycle_timeout_ms must be positive".into(),
            ));
        }
        if self.max_frame_size == 0 || self.max_frame_size > MAX_UNFRAGMENTED_PAYLOAD {
            return Err(BridgeError::Config(format!(
                "max_frame_size must be between 1 and {} bytes, got {}",
                MAX_UNFRAGMENTED_PAYLOAD, self.max_frame_size
            )));
        }
        Ok(())
    }
}

/// Values supplied on the command line; `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub device: Option<String>,
    pub baud_rate: Option<u32>,
    pub bind: Option<SocketAddr>,
    pub cycle_timeout_ms: Option<u64>,
    pub max_frame_size: Option<usize>,
    pub log_frames: bool,
}

impl ConfigOverrides {
    /// Layer these values over `config`.
    pub fn apply(self, mut config: BridgeConfig) -> BridgeConfig {
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(ms) = self.cycle_timeout_ms {
            config.cycle_timeout_ms = ms;
        }
        if let Some(size) = self.max_frame_size {
            config.max_frame_size = size;
        }
        // A flag can only switch frame logging on.
        config.log_frames |= self.log_frames;
        config
    }
}

/// Build the effective config from an optional file and CLI overrides.
pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<BridgeConfig> {
    let base = match path {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::default(),
    };
    let config = overrides.apply(base);
    config.validate()?;
    Ok(config)
}
