//! Monitor configuration
//!
//! TOML file with `[monitor]`, `[store]`, `[eject]` and `[audit]` sections.
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [monitor]
//! poll_interval = "5s"
//! provider = "auto"
//! log_level = "info"
//!
//! [store]
//! path = "~/.local/share/usb-sentinel/trusted_devices.json"
//!
//! [eject]
//! enabled = true
//! command = ["diskutil", "unmount", "/Volumes/{name}"]
//! ```

use crate::audit::AuditLevel;
use crate::eject::Ejector;
use crate::provider::ProviderKind;
use crate::worker::MAX_POLL_INTERVAL;
use anyhow::{Context, Result, anyhow};
use common::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "usb-sentinel";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub eject: EjectSettings,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Time between polls ("5s", "1m30s")
    #[serde(default = "MonitorSettings::default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub provider: ProviderKind,
    /// Run headless instead of the terminal UI
    #[serde(default)]
    pub service_mode: bool,
    #[serde(default = "MonitorSettings::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Log file used while the terminal UI owns the screen
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Self::default_poll_interval(),
            provider: ProviderKind::default(),
            service_mode: false,
            log_level: Self::default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

impl MonitorSettings {
    fn default_poll_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Configured log file, or `<data_local_dir>/usb-sentinel/monitor.log`
    pub fn log_file_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| data_dir().join("monitor.log"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Trust store JSON file
    #[serde(default = "StoreSettings::default_path")]
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
        }
    }
}

impl StoreSettings {
    fn default_path() -> PathBuf {
        data_dir().join("trusted_devices.json")
    }
}

/// Best-effort eject hook for untrusted devices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EjectSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Program and arguments; `{serial}`, `{name}`, `{vendor_id}` and
    /// `{product_id}` are substituted per device
    #[serde(default)]
    pub command: Vec<String>,
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "AuditConfig::default_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub level: AuditLevel,
    /// Rotate once the file reaches this size
    #[serde(default = "AuditConfig::default_max_size_mb")]
    pub max_size_mb: Option<u32>,
    /// Rotated files kept next to the live one
    #[serde(default = "AuditConfig::default_max_files")]
    pub max_files: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: Self::default_path(),
            level: AuditLevel::default(),
            max_size_mb: Self::default_max_size_mb(),
            max_files: Self::default_max_files(),
        }
    }
}

impl AuditConfig {
    fn default_path() -> PathBuf {
        data_dir().join("audit.log")
    }

    fn default_max_size_mb() -> Option<u32> {
        Some(10)
    }

    fn default_max_files() -> u32 {
        5
    }
}

/// Custom serde module for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        format_duration(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string like "5s", "30m", "1h30m"
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim().to_lowercase();
        let mut total_secs: u64 = 0;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
                continue;
            }
            if current_num.is_empty() {
                return Err(format!("Invalid duration format: {}", s));
            }
            let num: u64 = current_num
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", current_num))?;
            current_num.clear();

            let unit = match c {
                'h' => 3600,
                'm' => 60,
                's' => 1,
                _ => return Err(format!("Invalid duration unit: {}", c)),
            };
            total_secs = num
                .checked_mul(unit)
                .and_then(|secs| total_secs.checked_add(secs))
                .ok_or_else(|| format!("Duration too large: {}", s))?;
        }

        // A bare number means seconds
        if !current_num.is_empty() {
            let num: u64 = current_num
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", current_num))?;
            total_secs = total_secs
                .checked_add(num)
                .ok_or_else(|| format!("Duration too large: {}", s))?;
        }

        if total_secs == 0 {
            return Err("Duration must be greater than 0".to_string());
        }

        Ok(Duration::from_secs(total_secs))
    }

    pub fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        let mut result = String::new();
        if hours > 0 {
            result.push_str(&format!("{}h", hours));
        }
        if mins > 0 {
            result.push_str(&format!("{}m", mins));
        }
        if secs > 0 || result.is_empty() {
            result.push_str(&format!("{}s", secs));
        }
        result
    }
}

pub use duration_serde::parse_duration;

impl MonitorConfig {
    /// Load configuration from `path`, or from the first standard location
    /// that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => expand_path(&p),
            None => [Self::default_path(), Self::system_path()]
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.expand_paths();
        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Per-user configuration file path
    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(config_dir) => config_dir.join(APP_DIR).join("monitor.toml"),
            None => PathBuf::from(".config").join(APP_DIR).join("monitor.toml"),
        }
    }

    /// System-wide configuration file path
    pub fn system_path() -> PathBuf {
        PathBuf::from("/etc").join(APP_DIR).join("monitor.toml")
    }

    /// Build the eject hook if enabled
    pub fn ejector(&self) -> Result<Option<Ejector>> {
        if !self.eject.enabled {
            return Ok(None);
        }
        let ejector = Ejector::new(self.eject.command.clone()).context("Invalid eject command")?;
        Ok(Some(ejector))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_log_level(&self.monitor.log_level)?;

        if self.monitor.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval must be greater than 0"));
        }
        if self.monitor.poll_interval > MAX_POLL_INTERVAL {
            return Err(anyhow!(
                "poll_interval must be at most {}",
                duration_serde::format_duration(MAX_POLL_INTERVAL)
            ));
        }

        if self.eject.enabled && self.eject.command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(anyhow!("eject.command must name a program when eject is enabled"));
        }

        if self.audit.max_files == 0 {
            return Err(anyhow!("audit.max_files must be at least 1"));
        }

        Ok(())
    }

    fn expand_paths(&mut self) {
        self.store.path = expand_path(&self.store.path);
        self.audit.path = expand_path(&self.audit.path);
        if let Some(log_file) = &self.monitor.log_file {
            self.monitor.log_file = Some(expand_path(log_file));
        }
    }
}

/// Check a log level name
pub fn validate_log_level(level: &str) -> Result<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&level) {
        return Err(anyhow!(
            "Invalid log level '{}', must be one of: {}",
            level,
            valid_levels.join(", ")
        ));
    }
    Ok(())
}

/// `<data_local_dir>/usb-sentinel`
fn data_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(data_dir) => data_dir.join(APP_DIR),
        None => PathBuf::from(".local/share").join(APP_DIR),
    }
}

/// Expand a leading `~`
fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}
