//! Process-wide tracing subscriber and metric descriptions.
//!
//! The filter reads `RIPARO_LOG` (same syntax as `RUST_LOG`) on top of the
//! configured level, so one module can be turned up without touching config.

use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::worker::{lifecycle, strategy};

use super::error::InfraError;

pub const FILTER_ENV: &str = "RIPARO_LOG";

/// Every counter the worker emits, with its description.
pub const COUNTERS: [(&str, &str); 4] = [
    (
        strategy::METRIC_STRATEGY_RESPONSE,
        "Intercepted requests answered, by strategy and response source.",
    ),
    (strategy::METRIC_FALLBACK, "Fallback resolutions, by fallback kind."),
    (
        lifecycle::METRIC_POPULATE_FAILED,
        "Manifest entries that could not be stored during startup.",
    ),
    (
        lifecycle::METRIC_GENERATION_DELETED,
        "Stale cache generations removed during cutover.",
    ),
];

static DESCRIBED: Once = Once::new();

pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter(logging.level))
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))?;

    tracing::debug!(level = %logging.level, format = ?logging.format, "telemetry ready");
    Ok(())
}

fn filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(FILTER_ENV)
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Only the first call registers anything.
fn describe_metrics() {
    DESCRIBED.call_once(|| {
        for (name, description) in COUNTERS {
            describe_counter!(name, Unit::Count, description);
        }
    });
}
