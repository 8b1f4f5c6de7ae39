use crate::config::{Config, LogFormat, LogLevel};
use tracing::{subscriber::DefaultGuard, Subscriber};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Filter applied when `RUST_LOG` is unset. The HTTP stack is kept quiet.
fn default_directives(log_level: &LogLevel) -> String {
    format!("{},hyper_util=warn,reqwest=warn", log_level.as_str())
}

/// Builds the subscriber described by `config`: timestamp, level, target and
/// message, on stdout, as plain text or JSON.
pub fn get_subscriber(config: &Config) -> Box<dyn Subscriber + Send + Sync> {
    let log_level = default_directives(&config.log_level);
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
    );

    match config.log_format {
        LogFormat::Json => Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .with_level(true)
                    .with_target(true)
                    .with_writer(std::io::stdout),
            ),
        ),
        LogFormat::Text => Box::new(
            registry.with(
                fmt::layer()
                    .with_level(true)
                    .with_target(true)
                    .with_writer(std::io::stdout),
            ),
        ),
    }
}

/// Installs `subscriber` for the calling thread until the guard is dropped.
/// The binary runs everything on one thread, so this covers every component.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync + 'static) -> DefaultGuard {
    tracing::subscriber::set_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureConfig, InferenceServerConfig, ModelConfig};

    fn config(log_level: LogLevel, log_format: LogFormat) -> Config {
        Config {
            log_level,
            log_format,
            inference_server: InferenceServerConfig::default(),
            model: ModelConfig::default(),
            capture: CaptureConfig::default(),
        }
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(&LogLevel::Debug),
            "debug,hyper_util=warn,reqwest=warn"
        );
    }

    #[test]
    fn test_subscriber_is_scoped_to_guard() {
        for format in [LogFormat::Text, LogFormat::Json] {
            let guard = init_subscriber(get_subscriber(&config(LogLevel::Info, format)));
            tracing::info!("subscriber installed");
            drop(guard);
        }
    }
}
