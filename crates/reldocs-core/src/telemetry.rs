//! Tracing initialisation for reldocs binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored since
//! the global subscriber can only be set once per process.

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json` emits newline-delimited JSON log lines.
/// * `level` is the default verbosity when `RUST_LOG` is not set.
///
/// Logs go to stderr so stdout stays free for the run result.
pub fn init_tracing(json: bool, level: Level) {
    tracing::subscriber::set_global_default(build_subscriber(json, level)).ok();
}

/// The subscriber [`init_tracing`] installs.
pub fn build_subscriber(json: bool, level: Level) -> Box<dyn Subscriber + Send + Sync> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        Box::new(
            registry.with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            ),
        )
    } else {
        Box::new(registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_accept_events() {
        for json in [false, true] {
            tracing::subscriber::with_default(build_subscriber(json, Level::DEBUG), || {
                tracing::info!(event = "telemetry.test", json, "subscriber ready");
            });
        }
    }
}
