//! Configuration handling for the bridge.
//!
//! Settings come from a YAML file, then environment variables, then the
//! command line. A missing or unparseable file falls back to defaults.

use plejd_session::{ClockSource, SessionConfig, TimeSyncConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// BLE settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Adapter name to use, first adapter when unset
    pub adapter: Option<String>,
    /// Scan duration in seconds
    pub scan_time: f64,
    /// Consecutive heartbeat failures before a heartbeat timeout
    pub retries: u32,
    /// Seconds between heartbeat cycles
    pub time_retries: f64,
    /// Deadline for each BLE operation in seconds
    pub operation_timeout: f64,
    /// Upper bound on retry waits in seconds
    pub max_backoff: f64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            scan_time: 10.0,
            retries: 10,
            time_retries: 10.0,
            operation_timeout: 5.0,
            max_backoff: 60.0,
        }
    }
}

/// Mesh clock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Whether to keep the mesh clock in sync
    pub enabled: bool,
    /// Seconds between sync rounds
    pub update_interval: f64,
    /// Drift in seconds tolerated before the mesh clock is set
    pub update_threshold: f64,
    /// Use the host clock as reference instead of NTP
    pub use_sys_time: bool,
    /// NTP server queried when `use_sys_time` is off
    pub ntp_server: Option<String>,
    /// IANA zone name for reported times, the host zone when unset
    pub timezone: Option<String>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval: 3600.0,
            update_threshold: 10.0,
            use_sys_time: true,
            ntp_server: Some("pool.ntp.org".to_string()),
            timezone: None,
        }
    }
}

/// Bridge configuration (matches the YAML structure)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// BLE settings
    pub ble: BleConfig,
    /// Mesh clock settings
    pub time: TimeConfig,
    /// Path to the cached site snapshot
    pub site_cache: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ble: BleConfig::default(),
            time: TimeConfig::default(),
            site_cache: PathBuf::from("site.json"),
            log_level: "info".to_string(),
        }
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from the file
    File(PathBuf),
    /// File absent, defaults used
    Missing(PathBuf),
    /// File unreadable or invalid, defaults used
    Invalid {
        /// Config file path
        path: PathBuf,
        /// Parse or read error
        error: String,
    },
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

impl BridgeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Runs before logging is set up, so the outcome is returned for the
    /// caller to log.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> (Self, ConfigSource) {
        let path = config_path.as_ref().to_path_buf();
        let (mut config, source) = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str::<BridgeConfig>(&content) {
                Ok(config) => (config, ConfigSource::File(path)),
                Err(e) => (
                    Self::default(),
                    ConfigSource::Invalid {
                        path,
                        error: e.to_string(),
                    },
                ),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (Self::default(), ConfigSource::Missing(path))
            }
            Err(e) => (
                Self::default(),
                ConfigSource::Invalid {
                    path,
                    error: e.to_string(),
                },
            ),
        };

        config.apply_environment_overrides();
        (config, source)
    }

    /// Apply environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("PLEJD_SITE_CACHE") {
            self.site_cache = PathBuf::from(path);
        }
        if let Some(adapter) = lookup("PLEJD_BLE_ADAPTER") {
            self.ble.adapter = Some(adapter);
        }
        if let Some(scan_time) = lookup("PLEJD_SCAN_TIME").and_then(|v| v.parse::<f64>().ok()) {
            self.ble.scan_time = scan_time;
        }
        if let Some(retries) = lookup("PLEJD_BLE_RETRIES").and_then(|v| v.parse::<u32>().ok()) {
            self.ble.retries = retries;
        }
        if let Some(server) = lookup("PLEJD_NTP_SERVER") {
            self.time.ntp_server = Some(server);
            self.time.use_sys_time = false;
        }
        if let Some(zone) = lookup("PLEJD_TIMEZONE") {
            self.time.timezone = Some(zone);
        }
        if let Some(level) = lookup("PLEJD_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Log the effective settings
    pub fn log_summary(&self) {
        info!(
            "Bridge configuration: site_cache={}, adapter={}, scan_time={}s, retries={}, time_sync={}, ntp={}",
            self.site_cache.display(),
            self.ble.adapter.as_deref().unwrap_or("<default>"),
            self.ble.scan_time,
            self.ble.retries,
            self.time.enabled,
            match (&self.time.ntp_server, self.time.use_sys_time) {
                (Some(server), false) => server.as_str(),
                _ => "off",
            }
        );
    }

    /// Session settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            scan_time: seconds(self.ble.scan_time),
            max_retries: self.ble.retries,
            retry_interval: seconds(self.ble.time_retries),
            max_backoff: seconds(self.ble.max_backoff),
            operation_timeout: seconds(self.ble.operation_timeout),
        }
    }

    /// Upper bound on the initial connect backoff
    pub fn max_backoff(&self) -> Duration {
        seconds(self.ble.max_backoff)
    }

    /// Time sync settings. An unknown timezone falls back to the host zone.
    pub fn time_sync_config(&self) -> TimeSyncConfig {
        let source = match (&self.time.ntp_server, self.time.use_sys_time) {
            (Some(server), false) => ClockSource::Ntp {
                server: server.clone(),
            },
            _ => ClockSource::System,
        };
        let timezone = self.time.timezone.as_deref().and_then(|name| {
            match name.parse::<chrono_tz::Tz>() {
                Ok(zone) => Some(zone),
                Err(_) => {
                    warn!("Unknown timezone {}, defaulting to local system timezone", name);
                    None
                }
            }
        });
        TimeSyncConfig {
            update_interval: seconds(self.time.update_interval),
            update_threshold: seconds(self.time.update_threshold),
            source,
            timezone,
        }
    }
}
