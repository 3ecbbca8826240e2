// 📝 Logging - tracing subscriber setup
// RUST_LOG wins over the configured level; JSON output for log shippers.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Install the global subscriber. Logs go to stderr so stdout stays clean for JSON output.
///
/// Returns false when a subscriber was already installed.
pub fn init_tracing(level: &str, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let formatting_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .json()
            .flatten_event(true);
        Registry::default()
            .with(env_filter)
            .with(formatting_layer)
            .try_init()
            .is_ok()
    } else {
        let formatting_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        Registry::default()
            .with(env_filter)
            .with(formatting_layer)
            .try_init()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        init_tracing("debug", false);
        assert!(!init_tracing("info", true));
    }
}
