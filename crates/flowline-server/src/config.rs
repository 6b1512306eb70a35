//! Configuration for the Flowline Server
//!
//! This module contains the configuration types and loading functionality.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use flowline_monitoring::{LogFormat, MonitoringConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Chunks buffered between a streaming flow and the response writer
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Deadline applied to every invocation, if any
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stream_buffer() -> usize {
    1
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024 // 2 MiB
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn load_from<F>(lookup: F) -> ServerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Start with defaults
        let mut config = Self::default();

        if let Some(host) = lookup("SERVER_HOST") {
            config.bind_address = host;
        }

        if let Some(port) = parse_var(&lookup, "SERVER_PORT") {
            config.port = port;
        }

        if let Some(log_level) = lookup("LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Some(log_format) = parse_var(&lookup, "LOG_FORMAT") {
            config.log_format = log_format;
        }

        if let Some(buffer) = parse_var::<usize, _>(&lookup, "STREAM_BUFFER_SIZE") {
            if buffer == 0 {
                warn!("Invalid STREAM_BUFFER_SIZE value: 0, using 1");
                config.stream_buffer = 1;
            } else {
                config.stream_buffer = buffer;
            }
        }

        if let Some(timeout) = parse_var(&lookup, "REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = Some(timeout);
        }

        if let Some(max_body) = parse_var(&lookup, "MAX_REQUEST_BODY_BYTES") {
            config.max_body_bytes = max_body;
        }

        // Validate required fields
        if config.bind_address.trim().is_empty() {
            return Err(ServerError::ConfigError(
                "Bind address must not be empty".to_string(),
            ));
        }

        info!("Loaded server configuration");
        Ok(config)
    }

    /// Per-invocation deadline, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Monitoring settings derived from the log options
    pub fn monitoring(&self) -> MonitoringConfig {
        MonitoringConfig {
            service_name: "flowline".to_string(),
            log_filter: self.log_level.clone(),
            log_format: self.log_format,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {} value: {}", key, raw);
            None
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            stream_buffer: default_stream_buffer(),
            request_timeout_ms: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServerResult<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::load_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.stream_buffer, 1);
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SERVER_HOST", "0.0.0.0"),
            ("SERVER_PORT", "3400"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "json"),
            ("STREAM_BUFFER_SIZE", "16"),
            ("REQUEST_TIMEOUT_MS", "2500"),
            ("MAX_REQUEST_BODY_BYTES", "1024"),
        ])
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 3400);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.stream_buffer, 16);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.max_body_bytes, 1024);

        let monitoring = config.monitoring();
        assert_eq!(monitoring.log_filter, "debug");
        assert_eq!(monitoring.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = load(&[
            ("SERVER_PORT", "eighty"),
            ("STREAM_BUFFER_SIZE", "0"),
            ("LOG_FORMAT", "xml"),
            ("REQUEST_TIMEOUT_MS", "-5"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.stream_buffer, 1);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.request_timeout_ms, None);
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let err = load(&[("SERVER_HOST", " ")]).unwrap_err();
        assert!(matches!(err, ServerError::ConfigError(_)));
    }
}
