//! Monitoring for Flowline: structured logging and log-based metrics.

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod logging;
pub mod metrics;

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, multi-line output
    #[default]
    Pretty,
    /// One JSON object per event, for log aggregation
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringConfig {
    /// Service name attached to the start-up event
    pub service_name: String,
    /// Log level filter (e.g., "info,flowline_core=debug"). `RUST_LOG` wins.
    pub log_filter: String,
    /// Output format
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "flowline".to_string(),
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Initialize monitoring. Fails if a global subscriber is already set.
pub fn init(config: MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(&config)?;
    debug!("Monitoring initialized with config: {:?}", config);
    Ok(())
}


// Exported types
pub use crate::logging::{init_logging, LogExt};
pub use crate::metrics::FlowMetrics;
