use anyhow::Context;
use flowline::samples::sample_registry;
use flowline_monitoring::LogExt;
use flowline_server::ServerConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load().context("Failed to load server configuration")?;
    flowline_monitoring::init(config.monitoring()).context("Failed to initialize logging")?;

    let registry = sample_registry().context("Failed to define sample flows")?;
    info!(flows = registry.len(), "Sample flows defined");

    flowline_server::run(config, registry)
        .await
        .log_err("Server terminated with an error")
        .context("Server error")
}
