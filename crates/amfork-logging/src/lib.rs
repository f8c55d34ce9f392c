use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format of the service logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Plain,
}

/// Initialize structured logging with JSON format
pub fn init() {
    init_with_level("info")
}

/// Initialize JSON logging with specific level
pub fn init_with_level(level: &str) {
    init_with(level, LogFormat::Json)
}

/// Initialize logging. `RUST_LOG` wins over `level` when set.
pub fn init_with(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // a global subscriber may already be installed (tests, embedding)
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Plain => builder.with_target(true).try_init(),
    };
}

/// Initialize logging for tests (plain format)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info, warn};

    #[test]
    fn test_logging_init() {
        init_test();
        init_with("info", LogFormat::Plain);
        info!(backend = "local", "Test info message");
        warn!("Test warning message");
        error!("Test error message");
    }

    #[test]
    fn test_log_format_default() {
        assert_eq!(LogFormat::default(), LogFormat::Json);
    }
}
