//! Configuration management for Hestia
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{HestiaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_false() -> bool {
    false
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider API endpoints and pacing
    pub api: ApiConfig,

    /// Charging decision defaults
    pub charging: ChargingConfig,

    /// Command signing key and registered domain
    pub signing: SigningConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Timezone for off-peak scheduling
    pub timezone: String,
}

/// Provider API endpoints and request pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the vehicle/energy provider API
    pub base_url: String,

    /// OAuth token endpoint used for refresh exchanges
    pub auth_url: String,

    /// Per-call timeout in seconds
    pub timeout_seconds: u64,

    /// Global outbound request ceiling across all components
    pub max_requests_per_second: u32,
}

/// Charging decision defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargingConfig {
    /// Target charge level when none is given per vehicle
    pub default_target_level: u8,

    /// Cap on concurrently charging vehicles
    pub max_simultaneous_charging: usize,

    /// Minimum storage percentage to preserve
    pub reserve_floor_percent: u8,

    /// Minutes between scheduled coordination cycles
    pub interval_minutes: u64,

    /// Local hour after which deferred charging starts
    pub off_peak_hour: u32,

    /// Execute plans automatically when the loop runs
    #[serde(default = "default_false")]
    pub auto_execute: bool,

    /// Storage headroom above the reserve floor that permits charging
    pub storage_headroom_percent: f64,

    /// Solar production must exceed home load by this margin to charge
    pub solar_margin_w: f64,

    /// Larger solar margin that triggers an advisory recommendation
    pub solar_advisory_margin_w: f64,
}

/// Command signing configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SigningConfig {
    /// Path to the RSA private key in PEM format (empty disables signing)
    pub private_key_path: String,

    /// Registered domain the key pair is bound to
    pub domain: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fleet-api.example.com".to_string(),
            auth_url: "https://auth.example.com/oauth2/v3/token".to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 20,
        }
    }
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            default_target_level: 80,
            max_simultaneous_charging: 2,
            reserve_floor_percent: 20,
            interval_minutes: 15,
            off_peak_hour: 23,
            auto_execute: false,
            storage_headroom_percent: 30.0,
            solar_margin_w: 3000.0,
            solar_advisory_margin_w: 5000.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/hestia.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            charging: ChargingConfig::default(),
            signing: SigningConfig::default(),
            logging: LoggingConfig::default(),
            timezone: "UTC".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "hestia_config.yaml",
            "/data/hestia_config.yaml",
            "/etc/hestia/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(HestiaError::validation(
                "api.base_url",
                "Base URL cannot be empty",
            ));
        }

        if self.api.max_requests_per_second == 0 {
            return Err(HestiaError::validation(
                "api.max_requests_per_second",
                "Must be greater than 0",
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(HestiaError::validation(
                "api.timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if self.charging.default_target_level > 100 {
            return Err(HestiaError::validation(
                "charging.default_target_level",
                "Must be between 0 and 100",
            ));
        }

        if self.charging.reserve_floor_percent > 100 {
            return Err(HestiaError::validation(
                "charging.reserve_floor_percent",
                "Must be between 0 and 100",
            ));
        }

        if self.charging.max_simultaneous_charging == 0 {
            return Err(HestiaError::validation(
                "charging.max_simultaneous_charging",
                "Must be greater than 0",
            ));
        }

        if self.charging.interval_minutes == 0 {
            return Err(HestiaError::validation(
                "charging.interval_minutes",
                "Must be greater than 0",
            ));
        }

        if self.charging.off_peak_hour > 23 {
            return Err(HestiaError::validation(
                "charging.off_peak_hour",
                "Must be between 0 and 23",
            ));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(HestiaError::validation(
                "timezone",
                "Unknown timezone identifier",
            ));
        }

        Ok(())
    }

    /// Parsed timezone for schedule operations
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}
