use crate::config::{Environment, LogLevel};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter from `RUST_LOG`, falling back to the configured level.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Also adds an OpenTelemetry layer, which stays silent unless a global
/// tracer provider was installed (see [`crate::TelemetryGuard`]).
pub fn setup_logging(level: LogLevel, environment: Environment) {
    let registry = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_opentelemetry::layer());

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}

/// Same as [`setup_logging`] but writes to stderr, keeping stdout free for
/// program output.
pub fn setup_stderr_logging(level: LogLevel, environment: Environment) {
    let registry = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_opentelemetry::layer());

    match environment {
        Environment::Production => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_level(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        Environment::Development => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}
