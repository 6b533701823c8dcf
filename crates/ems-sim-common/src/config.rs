//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulator configuration loading and validation."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt::Display;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

pub const ENV_CONFIG_PATH: &str = "EMS_SIM_CONFIG";
pub const ENV_API_BASE_URL: &str = "API_BASE_URL";
pub const ENV_INTERVAL_SECONDS: &str = "INTERVAL_SECONDS";
pub const ENV_VOLTAGE_MIN: &str = "VOLTAGE_MIN";
pub const ENV_VOLTAGE_MAX: &str = "VOLTAGE_MAX";
pub const ENV_KWH_MIN: &str = "KWH_MIN";
pub const ENV_KWH_MAX: &str = "KWH_MAX";
pub const ENV_REQUEST_TIMEOUT_SECONDS: &str = "REQUEST_TIMEOUT_SECONDS";
pub const ENV_DELIVERY_CONCURRENCY: &str = "DELIVERY_CONCURRENCY";
pub const ENV_RANDOM_SEED: &str = "RANDOM_SEED";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_LOG_DIR: &str = "LOG_DIR";
pub const ENV_METRICS_ENABLED: &str = "METRICS_ENABLED";
pub const ENV_METRICS_LISTEN: &str = "METRICS_LISTEN";

/// Largest accepted `random_seed`; TOML integers are `i64`.
pub const MAX_RANDOM_SEED: u64 = i64::MAX as u64;

fn default_api_base_url() -> String {
    "http://localhost:8080/api/v1".to_owned()
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_voltage_min() -> i32 {
    210
}

fn default_voltage_max() -> i32 {
    240
}

fn default_kwh_min() -> f64 {
    0.5
}

fn default_kwh_max() -> f64 {
    15.0
}

fn default_delivery_concurrency() -> usize {
    1
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9898))
}

/// Errors raised while loading or validating [`SimulatorConfig`]. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid api base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("{what} must be greater than zero")]
    NotPositive { what: &'static str },
    #[error("{what} bounds are inverted: min {min} > max {max}")]
    InvertedBounds {
        what: &'static str,
        min: String,
        max: String,
    },
    #[error("kwh bounds must be finite and non-negative (min {min}, max {max})")]
    NegativeKwh { min: f64, max: f64 },
    #[error("solar daytime range is empty: 2 x kwh min ({doubled}) exceeds kwh max ({max})")]
    SolarDaytimeRange { doubled: f64, max: f64 },
}

/// Process-wide simulator configuration. Loaded once before the loop starts.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_interval", rename = "interval_seconds")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_request_timeout", rename = "request_timeout_seconds")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_delivery_concurrency")]
    pub delivery_concurrency: usize,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub voltage: VoltageBounds,
    #[serde(default)]
    pub kwh: KwhBounds,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            interval: default_interval(),
            request_timeout: default_request_timeout(),
            delivery_concurrency: default_delivery_concurrency(),
            random_seed: None,
            voltage: VoltageBounds::default(),
            kwh: KwhBounds::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from the optional file, the process environment, and validate it.
    ///
    /// The file is taken from `explicit` or, when absent, from `EMS_SIM_CONFIG`.
    /// Environment variables override values from the file.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Same as [`SimulatorConfig::load`] with an injected environment lookup.
    pub fn load_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = explicit.map(Path::to_path_buf).or_else(|| {
            lookup(ENV_CONFIG_PATH)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        });
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_with(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Overlay environment variables on top of the current values. Blank values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = var(ENV_API_BASE_URL) {
            self.api_base_url = raw.trim().to_owned();
        }
        if let Some(raw) = var(ENV_INTERVAL_SECONDS) {
            self.interval = Duration::from_secs(parse_value(ENV_INTERVAL_SECONDS, &raw)?);
        }
        if let Some(raw) = var(ENV_REQUEST_TIMEOUT_SECONDS) {
            self.request_timeout =
                Duration::from_secs(parse_value(ENV_REQUEST_TIMEOUT_SECONDS, &raw)?);
        }
        if let Some(raw) = var(ENV_VOLTAGE_MIN) {
            self.voltage.min = parse_value(ENV_VOLTAGE_MIN, &raw)?;
        }
        if let Some(raw) = var(ENV_VOLTAGE_MAX) {
            self.voltage.max = parse_value(ENV_VOLTAGE_MAX, &raw)?;
        }
        if let Some(raw) = var(ENV_KWH_MIN) {
            self.kwh.min = parse_value(ENV_KWH_MIN, &raw)?;
        }
        if let Some(raw) = var(ENV_KWH_MAX) {
            self.kwh.max = parse_value(ENV_KWH_MAX, &raw)?;
        }
        if let Some(raw) = var(ENV_DELIVERY_CONCURRENCY) {
            self.delivery_concurrency = parse_value(ENV_DELIVERY_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = var(ENV_RANDOM_SEED) {
            self.random_seed = Some(parse_value(ENV_RANDOM_SEED, &raw)?);
        }
        if let Some(raw) = var(ENV_LOG_FORMAT) {
            self.logging.format = parse_value(ENV_LOG_FORMAT, &raw)?;
        }
        if let Some(raw) = var(ENV_LOG_DIR) {
            self.logging.directory = Some(PathBuf::from(raw.trim()));
        }
        if let Some(raw) = var(ENV_METRICS_ENABLED) {
            self.metrics.enabled = parse_flag(ENV_METRICS_ENABLED, &raw)?;
        }
        if let Some(raw) = var(ENV_METRICS_LISTEN) {
            self.metrics.listen = parse_value(ENV_METRICS_LISTEN, &raw)?;
        }
        Ok(())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.api_base_url).map_err(|err| ConfigError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if self.interval.is_zero() {
            return Err(ConfigError::NotPositive { what: "interval" });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                what: "request timeout",
            });
        }
        if self.delivery_concurrency == 0 {
            return Err(ConfigError::NotPositive {
                what: "delivery concurrency",
            });
        }
        if let Some(seed) = self.random_seed.filter(|seed| *seed > MAX_RANDOM_SEED) {
            return Err(ConfigError::InvalidValue {
                key: "random_seed",
                value: seed.to_string(),
                reason: format!("must not exceed {MAX_RANDOM_SEED}"),
            });
        }
        self.voltage.validate()?;
        self.kwh.validate()?;
        Ok(())
    }

    /// Join the base URL with a resource path, e.g. `endpoint("sensors")`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl FromStr for SimulatorConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: SimulatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Inclusive voltage range drawn from for every reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoltageBounds {
    #[serde(default = "default_voltage_min")]
    pub min: i32,
    #[serde(default = "default_voltage_max")]
    pub max: i32,
}

impl Default for VoltageBounds {
    fn default() -> Self {
        Self {
            min: default_voltage_min(),
            max: default_voltage_max(),
        }
    }
}

impl VoltageBounds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::InvertedBounds {
                what: "voltage",
                min: self.min.to_string(),
                max: self.max.to_string(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, voltage: i32) -> bool {
        (self.min..=self.max).contains(&voltage)
    }
}

/// Baseline kWh range. Solar sensors derive their day and night ranges from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KwhBounds {
    #[serde(default = "default_kwh_min")]
    pub min: f64,
    #[serde(default = "default_kwh_max")]
    pub max: f64,
}

impl Default for KwhBounds {
    fn default() -> Self {
        Self {
            min: default_kwh_min(),
            max: default_kwh_max(),
        }
    }
}

impl KwhBounds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min < 0.0 || self.max < 0.0 {
            return Err(ConfigError::NegativeKwh {
                min: self.min,
                max: self.max,
            });
        }
        if self.min > self.max {
            return Err(ConfigError::InvertedBounds {
                what: "kwh",
                min: self.min.to_string(),
                max: self.max.to_string(),
            });
        }
        let doubled = self.min * 2.0;
        if doubled > self.max {
            return Err(ConfigError::SolarDaytimeRange {
                doubled,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: raw.to_owned(),
            reason: err.to_string(),
        })
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_owned(),
            reason: "expected a boolean".to_owned(),
        }),
    }
}
