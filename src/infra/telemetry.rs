use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::interceptor::{
    METRIC_READ_BYPASS_TOTAL, METRIC_READ_HIT_TOTAL, METRIC_READ_MISS_TOTAL,
    METRIC_STORE_FALLBACK_TOTAL,
};
use crate::cache::invalidation::{
    METRIC_INVALIDATION_FAILED_TOTAL, METRIC_INVALIDATION_MS, METRIC_INVALIDATION_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Target of this crate's spans and events.
const CRATE_TARGET: &str = "relcache";

/// Install a global tracing subscriber using the provided logging settings.
///
/// `RUST_LOG` wins when set. Otherwise the configured level applies to
/// relcache itself and everything else is held at `warn`.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::builder().parse_lossy(directives)
        }
        _ => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(crate_directive(logging.level)),
    };

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn crate_directive(level: LevelFilter) -> String {
    format!("{CRATE_TARGET}={level}")
}

/// Register metric descriptions with the installed recorder. Runs once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_READ_HIT_TOTAL,
            Unit::Count,
            "Reads served from the cache store without executing the query."
        );
        describe_counter!(
            METRIC_READ_MISS_TOTAL,
            Unit::Count,
            "Reads that executed the query and populated the cache store."
        );
        describe_counter!(
            METRIC_READ_BYPASS_TOTAL,
            Unit::Count,
            "Calls passed straight to the executor (excluded model or non-read operation)."
        );
        describe_counter!(
            METRIC_STORE_FALLBACK_TOTAL,
            Unit::Count,
            "Cacheable reads executed directly because the store was missing or failed."
        );
        describe_counter!(
            METRIC_INVALIDATION_TOTAL,
            Unit::Count,
            "Tags invalidated, labelled by the strategy that succeeded."
        );
        describe_counter!(
            METRIC_INVALIDATION_FAILED_TOTAL,
            Unit::Count,
            "Tags for which every invalidation strategy failed."
        );
        describe_histogram!(
            METRIC_INVALIDATION_MS,
            Unit::Milliseconds,
            "Post-mutation invalidation latency in milliseconds."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_level_to_this_crate() {
        assert_eq!(crate_directive(LevelFilter::DEBUG), "relcache=debug");
        assert_eq!(crate_directive(LevelFilter::OFF), "relcache=off");

        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(crate_directive(LevelFilter::TRACE));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }
}
