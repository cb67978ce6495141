//! Daemon configuration.
//!
//! Loaded from `autoqso.toml` (or `$AUTOQSO_CONFIG`); environment variables
//! override file values, file values override defaults. `callsign` is the
//! only setting without a usable default.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no callsign configured; set `callsign` in autoqso.toml or AUTOQSO_CALLSIGN")]
    MissingCallsign,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Own station callsign, matched against the status feed.
    pub callsign: String,
    /// Digital mode tag used to recognize our own CQ announcements.
    pub mode_tag: String,
    /// WSJT-X / JTDX UDP status port.
    pub udp_port: u16,
    /// JSON snapshot written for the display surface.
    pub status_path: PathBuf,
    /// Polled command file (enable / disable / quit).
    pub command_path: PathBuf,
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            callsign: String::new(),
            mode_tag: "FT8".to_string(),
            udp_port: 2237,
            status_path: PathBuf::from("/tmp/autoqso_status.json"),
            command_path: PathBuf::from("/tmp/autoqso_command.txt"),
            timing: TimingConfig::default(),
        }
    }
}

/// One named value per delay purpose. The historical scripts carried
/// slightly different literals between revisions; these are the canonical
/// ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Quiet window after a finished QSO before TX is re-enabled.
    pub post_qso_delay_secs: u64,
    /// Settle time between CQ enable and TX enable when enabling the system.
    pub enable_settle_secs: u64,
    /// Settle time between TX disable and halt when disabling the system.
    pub disable_settle_secs: u64,
    /// Hourly break wait is drawn uniformly from this range.
    pub break_min_secs: u64,
    pub break_max_secs: u64,
    /// Pause between CQ enable and TX enable inside a break or reset.
    pub break_step_secs: u64,
    /// Repeated finish matches within this window count as one.
    pub finish_debounce_secs: u64,
    /// A QSO with no activity for this long is abandoned.
    pub qso_timeout_secs: u64,
    /// Elapsed time since the last break cycle before the next one arms.
    pub break_after_secs: u64,
    pub idle_watchdog_tick_secs: u64,
    pub tx_watchdog_tick_secs: u64,
    pub break_watchdog_tick_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            post_qso_delay_secs: 45,
            enable_settle_secs: 10,
            disable_settle_secs: 5,
            break_min_secs: 180,
            break_max_secs: 600,
            break_step_secs: 2,
            finish_debounce_secs: 5,
            qso_timeout_secs: 300,
            break_after_secs: 3600,
            idle_watchdog_tick_secs: 5,
            tx_watchdog_tick_secs: 30,
            break_watchdog_tick_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn post_qso_delay(&self) -> Duration {
        Duration::from_secs(self.post_qso_delay_secs)
    }

    pub fn finish_debounce(&self) -> Duration {
        Duration::from_secs(self.finish_debounce_secs)
    }

    pub fn qso_timeout(&self) -> Duration {
        Duration::from_secs(self.qso_timeout_secs)
    }

    pub fn break_after(&self) -> Duration {
        Duration::from_secs(self.break_after_secs)
    }

    pub fn break_step(&self) -> Duration {
        Duration::from_secs(self.break_step_secs)
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(|key| std::env::var(key).ok())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        if config.callsign.trim().is_empty() {
            return Err(ConfigError::MissingCallsign);
        }
        config.callsign = config.callsign.trim().to_ascii_uppercase();
        Ok(config)
    }

    fn load_from_file(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = env("AUTOQSO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("autoqso.toml"));
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                log::info!("Loading config from {}", path.display());
                Ok(toml::from_str(&contents)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file found, using defaults");
                Ok(Config::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests do not have to mutate the process
    /// environment.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("AUTOQSO_CALLSIGN") {
            self.callsign = v;
        }
        if let Some(v) = env("AUTOQSO_MODE_TAG") {
            self.mode_tag = v;
        }
        if let Some(v) = env("AUTOQSO_UDP_PORT") {
            match v.parse() {
                Ok(port) => self.udp_port = port,
                Err(_) => log::warn!("Ignoring invalid AUTOQSO_UDP_PORT value '{}'", v),
            }
        }
        if let Some(v) = env("AUTOQSO_STATUS_PATH") {
            self.status_path = PathBuf::from(v);
        }
        if let Some(v) = env("AUTOQSO_COMMAND_PATH") {
            self.command_path = PathBuf::from(v);
        }
    }
}
