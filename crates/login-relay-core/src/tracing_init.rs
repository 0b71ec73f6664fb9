//! Tracing subscriber setup for the relay binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "login_relay_server=info,login_relay_core=info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_filter`. With `log_json` every event is a
/// single JSON object per line, which keeps the structured `operation`,
/// `host` and `port` fields queryable in log aggregation.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (json_layer, text_layer) = if log_json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}
