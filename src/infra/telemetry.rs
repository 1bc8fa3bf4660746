use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::{
        admission::METRIC_ADMISSION_TIMEOUT,
        janitor::METRIC_JANITOR_RECLAIMED,
        render::{METRIC_RENDER_DURATION_MS, METRIC_RENDER_FAILURE, METRIC_RENDER_SUCCESS},
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_RENDER_SUCCESS,
            Unit::Count,
            "Total number of renders that produced an artifact."
        );
        describe_counter!(
            METRIC_RENDER_FAILURE,
            Unit::Count,
            "Total number of failed renders, labelled by failure kind."
        );
        describe_counter!(
            METRIC_ADMISSION_TIMEOUT,
            Unit::Count,
            "Total number of requests turned away at the admission gate."
        );
        describe_counter!(
            METRIC_JANITOR_RECLAIMED,
            Unit::Count,
            "Total number of abandoned artifacts reclaimed by the janitor."
        );
        describe_histogram!(
            METRIC_RENDER_DURATION_MS,
            Unit::Milliseconds,
            "Render worker wall-clock duration in milliseconds."
        );
    });
}
