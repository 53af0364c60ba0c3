use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level. Logs go to stderr so command output on stdout stays
/// clean.
pub fn init(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scribe_hub={0},tower_http={0}", cfg.level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cfg.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    // Already set (tests, embedding): keep the existing subscriber.
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        let cfg = LoggingConfig::default();
        init(&cfg);
        init(&LoggingConfig {
            json: true,
            ..cfg
        });
    }
}
