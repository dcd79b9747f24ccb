use anyhow::Context;
use gateway::{config::get_configuration, logging::setup_observability, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration().context("failed to load configuration")?;
    config
        .model
        .validate()
        .context("invalid model configuration")?;
    let _telemetry = setup_observability(&config)?;

    tracing::info!(
        environment = %config.environment,
        architecture = %config.model.architecture,
        probability_mode = %config.model.probability_mode,
        "Starting gateway"
    );

    serve(config).await
}
