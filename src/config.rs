//! Configuration
//!
//! TOML configuration discovered from the usual places and flattened into
//! `section -> key -> value` strings. Lookups fall back from the selected
//! section (`--config-name`) to the requested section to `[base]`.
//!
//! ```toml
//! [base]
//! log-format = "json"
//!
//! [engine]
//! dedup-window = "5m"
//! renewal-threshold = "24h"
//! notification-url = "https://hooks.example/notify"
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use toml::Value;
use log::{debug, info};

use crate::dispatch::DispatchSettings;
use crate::lifecycle::LifecycleSettings;

/// Configuration storage - section_name -> key -> value
pub type Configuration = HashMap<String, HashMap<String, String>>;

/// Section holding engine tunables
pub const ENGINE_SECTION: &str = "engine";

/// Configuration manager
pub struct ConfigManager {
    config: Configuration,
    config_file_path: Option<PathBuf>,
    selected_section: Option<String>,
}

impl ConfigManager {
    /// Create a new ConfigManager from a Configuration (primarily for testing)
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config,
            config_file_path: None,
            selected_section: None,
        }
    }

    /// Load configuration using discovery hierarchy
    pub fn load() -> Result<Self> {
        debug!("Starting configuration discovery");

        for path in discover_config_files() {
            debug!("Attempting to load config from: {}", path.display());
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        info!("No configuration file found, using defaults");
        Ok(Self::from_config(Configuration::new()))
    }

    /// Load configuration from explicit file path
    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = parse_toml_config(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Loaded configuration from: {}", path.display());
        Ok(Self {
            config,
            config_file_path: Some(path),
            selected_section: None,
        })
    }

    /// File the configuration came from, if any
    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Get value from configuration with section fallback
    pub fn get_value(&self, section: &str, key: &str) -> Option<&String> {
        if let Some(selected) = &self.selected_section {
            if let Some(value) = self.config.get(selected).and_then(|s| s.get(key)) {
                return Some(value);
            }
        }

        if let Some(value) = self.config.get(section).and_then(|s| s.get(key)) {
            return Some(value);
        }

        self.config.get("base").and_then(|s| s.get(key))
    }

    /// Select configuration section for --config-name
    pub fn select_section(&mut self, section: String) {
        debug!("Selecting configuration section: {}", section);
        self.selected_section = Some(section);
    }

    /// Get boolean value with type conversion
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(anyhow::anyhow!("Invalid boolean value for {}.{}: {}", section, key, value)),
            },
            None => Ok(None),
        }
    }

    /// Get log level value with type conversion
    pub fn get_log_level(&self, section: &str, key: &str) -> Result<Option<log::LevelFilter>> {
        match self.get_value(section, key) {
            Some(value) => Ok(Some(crate::logging::parse_log_level(value)?)),
            None => Ok(None),
        }
    }

    /// Get path value with type conversion
    pub fn get_path(&self, section: &str, key: &str) -> Option<PathBuf> {
        self.get_value(section, key).map(PathBuf::from)
    }

    /// Get a humanized duration (`90s`, `5m`, `2h`, `3d`, or bare seconds)
    pub fn get_duration(&self, section: &str, key: &str) -> Result<Option<Duration>> {
        match self.get_value(section, key) {
            Some(value) => parse_duration(value)
                .with_context(|| format!("Invalid duration for {}.{}: {}", section, key, value))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Get an unsigned integer
    pub fn get_usize(&self, section: &str, key: &str) -> Result<Option<usize>> {
        match self.get_value(section, key) {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid number for {}.{}: {}", section, key, value))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Get engine configuration from config file
    pub fn get_engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::default();
        let section = ENGINE_SECTION;

        if let Some(value) = self.get_duration(section, "dedup-window")? {
            config.dedup_window = value;
        }
        if let Some(value) = self.get_usize(section, "dedup-max-entries")? {
            config.dedup_max_entries = value;
        }
        if let Some(value) = self.get_duration(section, "forward-timeout")? {
            config.forward_timeout = value;
        }
        if let Some(value) = self.get_duration(section, "upstream-timeout")? {
            config.upstream_timeout = value;
        }
        if let Some(value) = self.get_duration(section, "renewal-threshold")? {
            config.renewal_threshold = value;
        }
        if let Some(value) = self.get_duration(section, "max-lifetime")? {
            config.max_lifetime = value;
        }
        if let Some(value) = self.get_duration(section, "maintenance-interval")? {
            config.maintenance_interval = value;
        }
        if let Some(value) = self.get_value(section, "notification-url") {
            config.notification_url = Some(value.clone());
        }
        if let Some(value) = self.get_value(section, "source-name") {
            config.source_name = value.clone();
        }
        if let Some(value) = self.get_value(section, "default-queue") {
            config.default_queue = value.clone();
        }
        if let Some(value) = self.get_value(section, "tracking-scope") {
            config.tracking_scope = value.clone();
        }

        config.validate()
            .with_context(|| "Engine configuration validation failed")?;

        Ok(config)
    }
}

/// Engine tunables shared by dispatch and lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub dedup_window: Duration,
    pub dedup_max_entries: usize,
    pub forward_timeout: Duration,
    pub upstream_timeout: Duration,
    pub renewal_threshold: Duration,
    pub max_lifetime: Duration,
    pub maintenance_interval: Duration,
    pub notification_url: Option<String>,
    pub source_name: String,
    pub default_queue: String,
    /// Resource path prefix for tracking store listings; empty means all
    pub tracking_scope: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(5 * 60),
            dedup_max_entries: 10_000,
            forward_timeout: Duration::from_secs(10),
            upstream_timeout: Duration::from_secs(30),
            renewal_threshold: Duration::from_secs(24 * 3600),
            max_lifetime: Duration::from_secs(3 * 24 * 3600),
            maintenance_interval: Duration::from_secs(3600),
            notification_url: None,
            source_name: "subsync".to_string(),
            default_queue: "default".to_string(),
            tracking_scope: String::new(),
        }
    }
}

impl EngineConfig {
    /// Reject zero durations and a threshold the provider could never satisfy
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("dedup-window", self.dedup_window),
            ("forward-timeout", self.forward_timeout),
            ("upstream-timeout", self.upstream_timeout),
            ("renewal-threshold", self.renewal_threshold),
            ("max-lifetime", self.max_lifetime),
            ("maintenance-interval", self.maintenance_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                bail!("{} must be greater than zero", name);
            }
        }

        if self.dedup_max_entries == 0 {
            bail!("dedup-max-entries must be greater than zero");
        }
        if self.renewal_threshold > self.max_lifetime {
            bail!(
                "renewal-threshold ({}s) exceeds max-lifetime ({}s)",
                self.renewal_threshold.as_secs(),
                self.max_lifetime.as_secs()
            );
        }
        if self.default_queue.trim().is_empty() {
            bail!("default-queue must not be empty");
        }
        if let Some(url) = &self.notification_url {
            url::Url::parse(url).with_context(|| format!("Invalid notification-url: {}", url))?;
        }
        Ok(())
    }

    pub fn max_lifetime_chrono(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.max_lifetime).context("max-lifetime out of range")
    }

    pub fn renewal_threshold_chrono(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.renewal_threshold).context("renewal-threshold out of range")
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            source_name: self.source_name.clone(),
            default_queue: self.default_queue.clone(),
            forward_timeout: self.forward_timeout,
            upstream_timeout: self.upstream_timeout,
            record_scope: self.tracking_scope.clone(),
            dedup_window: self.dedup_window,
            dedup_max_entries: self.dedup_max_entries,
        }
    }

    pub fn lifecycle_settings(&self) -> Result<LifecycleSettings> {
        Ok(LifecycleSettings {
            max_lifetime: self.max_lifetime_chrono()?,
            renewal_threshold: self.renewal_threshold_chrono()?,
            upstream_timeout: self.upstream_timeout,
            notification_url: self.notification_url.clone(),
            record_scope: self.tracking_scope.clone(),
        })
    }
}

/// Parse `90s`, `5m`, `2h`, `3d`, `250ms` or a bare number of seconds
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        bail!("empty duration");
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let amount: u64 = number
        .parse()
        .with_context(|| format!("Invalid duration amount: '{}'", value))?;

    let seconds_per_unit = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(amount)),
        "" | "s" | "sec" | "secs" => 1,
        "m" | "min" | "mins" => 60,
        "h" | "hr" | "hrs" => 3600,
        "d" | "day" | "days" => 86_400,
        other => bail!("Unknown duration unit '{}'", other),
    };

    amount
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("Duration too large: '{}'", value))
}

/// Discover configuration files in order of precedence
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Environment variable $SUBSYNC_CONFIG
    if let Ok(env_path) = env::var("SUBSYNC_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    // 2. XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("subsync").join("config.toml"));
    }

    // 3. Home directory
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".subsync.toml"));
    }

    // 4. Project local
    paths.push(PathBuf::from("./.subsync.toml"));

    debug!("Config discovery paths: {:?}", paths);
    paths
}

/// Parse TOML content to string-based configuration
fn parse_toml_config(content: &str) -> Result<Configuration> {
    let toml_value: Value = content.parse()
        .context("Failed to parse TOML content")?;

    let mut config = Configuration::new();
    if let Value::Table(table) = toml_value {
        flatten_toml_table(&table, String::new(), &mut config);
    }

    Ok(config)
}

/// Recursively flatten TOML tables into section.subsection format
fn flatten_toml_table(table: &toml::Table, prefix: String, config: &mut Configuration) {
    for (key, value) in table {
        let section_name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Table(subtable) => {
                if subtable.values().all(|v| !matches!(v, Value::Table(_))) {
                    let section_map = config.entry(section_name).or_default();
                    for (subkey, subvalue) in subtable {
                        section_map.insert(subkey.clone(), toml_value_to_string(subvalue));
                    }
                } else {
                    flatten_toml_table(subtable, section_name, config);
                }
            }
            _ => {
                // Top-level keys outside any table land in [base]
                config
                    .entry("base".to_string())
                    .or_default()
                    .insert(section_name, toml_value_to_string(value));
            }
        }
    }
}

/// Convert TOML Value to string representation
fn toml_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Datetime(d) => d.to_string(),
        Value::Array(_) | Value::Table(_) => value.to_string(),
    }
}
