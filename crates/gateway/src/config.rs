use common::{Environment, LogLevel};
use inference::InferenceConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub log_level: LogLevel,
    pub bind_addr: String,
    pub otel_endpoint: Option<String>,
    pub request_timeout_ms: u64,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
    pub model: InferenceConfig,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Defaults overlaid with `GRADCAM_*` environment variables, e.g.
/// `GRADCAM_BIND_ADDR`, `GRADCAM_MODEL__PROBABILITY_MODE`, or the comma list
/// `GRADCAM_MODEL__CLASS_LABELS`.
pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .set_default("environment", "development")?
        .set_default("log_level", "info")?
        .set_default("bind_addr", "0.0.0.0:8000")?
        .set_default("request_timeout_ms", 30_000i64)?
        .set_default("max_upload_bytes", 10i64 * 1024 * 1024)?
        .set_default(
            "cors_origins",
            vec!["http://localhost:3000", "http://127.0.0.1:3000"],
        )?
        .set_default("model.architecture", inference::config::DEFAULT_ARCHITECTURE)?
        .add_source(
            config::Environment::with_prefix("GRADCAM")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cors_origins")
                .with_list_parse_key("model.class_labels")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}
