//! Bridge configuration.
//!
//! Everything has a default; [`BridgeConfig::from_env`] overrides the device address and
//! poll interval from the environment:
//!
//! - `NEETS_HOST`: device host (default `192.168.10.109`)
//! - `NEETS_PORT`: device TCP port (default `5000`)
//! - `POLL_INTERVAL`: background poll interval in milliseconds (default `5000`)

use crate::error::{BridgeError, Result};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_HOST: &str = "192.168.10.109";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Backoff settings for automatic reconnection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound the delay grows to
    pub max_delay: Duration,
    /// Growth factor applied after each attempt
    pub multiplier: f64,
    /// Retries before giving up until a manual connect
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 1.5,
            max_attempts: 10,
        }
    }
}

/// Press-and-hold repeat timing
#[derive(Debug, Clone, PartialEq)]
pub struct HoldTiming {
    /// Wait after the first step before repeating
    pub initial_delay: Duration,
    /// Interval between repeated steps
    pub repeat_interval: Duration,
}

impl Default for HoldTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            repeat_interval: Duration::from_millis(500),
        }
    }
}

/// Bridge construction parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Interval of the light background poll while connected
    pub poll_interval: Duration,
    /// Gap between consecutive queries of a status poll
    pub poll_step: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub hold: HoldTiming,
    /// Queue depth per subscriber before events are dropped for it
    pub subscriber_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_step: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            hold: HoldTiming::default(),
            subscriber_capacity: 64,
        }
    }
}

impl BridgeConfig {
    /// Config for a device at `host:port`, defaults elsewhere
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Defaults overridden by `NEETS_HOST`, `NEETS_PORT` and `POLL_INTERVAL`
    pub fn from_env() -> Result<Self> {
        Self::from_environment(::config::Environment::default())
    }

    fn from_environment(environment: ::config::Environment) -> Result<Self> {
        let overrides: EnvOverrides = ::config::Config::builder()
            .set_default("neets_host", DEFAULT_HOST)
            .and_then(|b| b.set_default("neets_port", DEFAULT_PORT as i64))
            .and_then(|b| {
                b.set_default("poll_interval", DEFAULT_POLL_INTERVAL.as_millis() as i64)
            })
            .map_err(config_error)?
            .add_source(environment)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        let mut config = Self::default();
        let host = overrides.neets_host.trim();
        if !host.is_empty() {
            config.host = host.to_string();
        }
        config.port = overrides.neets_port;
        config.poll_interval = Duration::from_millis(overrides.poll_interval);

        config.validate()?;
        Ok(config)
    }

    /// Reject values the background tasks cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(BridgeError::Config("poll interval must be positive".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(BridgeError::Config("connect timeout must be positive".to_string()));
        }
        if self.hold.repeat_interval.is_zero() {
            return Err(BridgeError::Config("hold repeat interval must be positive".to_string()));
        }
        let multiplier = self.reconnect.multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BridgeError::Config(format!(
                "reconnect multiplier must be at least 1, got {}",
                multiplier
            )));
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(BridgeError::Config(
                "reconnect max delay is below the base delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Environment keys, lowercased the way `config::Environment` reports them
#[derive(Debug, Deserialize)]
struct EnvOverrides {
    neets_host: String,
    neets_port: u16,
    /// Milliseconds
    poll_interval: u64,
}

fn config_error(e: ::config::ConfigError) -> BridgeError {
    BridgeError::Config(e.to_string())
}
