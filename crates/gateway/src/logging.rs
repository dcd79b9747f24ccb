use crate::config::Config;
use common::TelemetryGuard;

pub const SERVICE_NAME: &str = "gradcam-gateway";

/// Install the global subscriber. With an OTLP endpoint configured the
/// returned guard must stay alive until shutdown.
pub fn setup_observability(config: &Config) -> anyhow::Result<Option<TelemetryGuard>> {
    match config.otel_endpoint.as_deref() {
        Some(endpoint) => {
            let guard =
                TelemetryGuard::init(SERVICE_NAME, endpoint, config.log_level, config.environment)?;
            Ok(Some(guard))
        }
        None => {
            common::setup_logging(config.log_level, config.environment);
            Ok(None)
        }
    }
}
