use shared::config::{Config, LogFormat};
use std::io;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
///
/// Returns the configured default level.
pub fn initialize_tracing(config: &Config) -> String {
    let builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_level(true)
        .with_writer(io::stderr);

    // A subscriber may already be set (tests); keep it.
    let _ = if matches!(config.logging.format, LogFormat::Json) {
        builder.json().with_ansi(false).try_init()
    } else {
        builder.with_ansi(false).try_init()
    };

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let config = Config::with_defaults();
        assert_eq!(initialize_tracing(&config), "info");
    }
}
