//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and field is optional; missing values fall back to defaults.

use crate::io::estimator::EstimatorOptions;
use crate::services::calibration::Calibration;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Service id reported by /health
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Largest accepted request body (bytes)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_service_name() -> String {
    "body-measurement-api".to_string()
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            service_name: default_service_name(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    /// Pose sidecar endpoint
    #[serde(default = "default_estimator_url")]
    pub url: String,
    /// Deadline for one estimator call
    #[serde(default = "default_estimator_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub options: EstimatorOptions,
}

fn default_estimator_url() -> String {
    "http://127.0.0.1:8502/pose".to_string()
}

fn default_estimator_timeout_ms() -> u64 {
    10_000
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            url: default_estimator_url(),
            timeout_ms: default_estimator_timeout_ms(),
            options: EstimatorOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Periodic metrics log interval (0 to disable)
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    bind_address: String,
    port: u16,
    service_name: String,
    max_upload_bytes: usize,
    estimator_url: String,
    estimator_timeout_ms: u64,
    estimator_options: EstimatorOptions,
    calibration: Calibration,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            service_name: toml_config.server.service_name,
            max_upload_bytes: toml_config.server.max_upload_bytes,
            estimator_url: toml_config.estimator.url,
            estimator_timeout_ms: toml_config.estimator.timeout_ms,
            estimator_options: toml_config.estimator.options,
            calibration: toml_config.calibration,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        toml_config
            .calibration
            .validate()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid [calibration] in {}", path.display()))?;

        let options = &toml_config.estimator.options;
        if options.model_complexity > 2 {
            anyhow::bail!(
                "Invalid [estimator] in {}: model_complexity must be 0, 1 or 2, got {}",
                path.display(),
                options.model_complexity
            );
        }
        if !(0.0..=1.0).contains(&options.min_detection_confidence) {
            anyhow::bail!(
                "Invalid [estimator] in {}: min_detection_confidence must be within 0..=1, got {}",
                path.display(),
                options.min_detection_confidence
            );
        }

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind_address {}", self.bind_address))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    // Getters for all config fields
    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn estimator_url(&self) -> &str {
        &self.estimator_url
    }

    pub fn estimator_timeout_ms(&self) -> u64 {
        self.estimator_timeout_ms
    }

    pub fn estimator_options(&self) -> EstimatorOptions {
        self.estimator_options
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Override the listen port (from the command line)
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the estimator endpoint (from the command line)
    pub fn with_estimator_url(mut self, url: impl Into<String>) -> Self {
        self.estimator_url = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "0.0.0.0");
        assert_eq!(config.port(), 8001);
        assert_eq!(config.service_name(), "body-measurement-api");
        assert_eq!(config.max_upload_bytes(), 20 * 1024 * 1024);
        assert_eq!(config.estimator_url(), "http://127.0.0.1:8502/pose");
        assert_eq!(config.estimator_timeout_ms(), 10_000);
        assert_eq!(config.estimator_options(), EstimatorOptions::default());
        assert_eq!(config.calibration(), &Calibration::default());
        assert_eq!(config.metrics_interval_secs(), 60);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/prod.toml")), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_default() {
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(None), "config/dev.toml");
        }
    }

    #[test]
    fn test_listen_addr() {
        let config = Config::default().with_port(9000);
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_estimator_url("http://pose:9000/infer");
        assert_eq!(config.estimator_url(), "http://pose:9000/infer");
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "empty".to_string());
        assert_eq!(config.port(), 8001);
        assert_eq!(config.estimator_options().model_complexity, 2);
    }
}
