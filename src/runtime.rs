//! Async runtime instrumentation reported through a meter provider.

use crate::error::TelemetryError;
use opentelemetry::InstrumentationScope;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::time::Instant;
use tokio::runtime::Handle;

/// Registers observable gauges describing the current Tokio runtime.
///
/// The gauges are:
/// - `process.runtime.tokio.workers`
/// - `process.runtime.tokio.alive_tasks`
/// - `process.runtime.tokio.global_queue_depth`
/// - `process.uptime`, seconds since the gauges were registered
///
/// # Errors
///
/// Returns [`TelemetryError::RuntimeMetrics`] when called outside a Tokio
/// runtime.
pub fn start(provider: &SdkMeterProvider) -> Result<(), TelemetryError> {
    let handle = Handle::try_current().map_err(TelemetryError::RuntimeMetrics)?;
    let meter = provider.meter_with_scope(
        InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .build(),
    );

    let metrics = handle.metrics();
    meter
        .u64_observable_gauge("process.runtime.tokio.workers")
        .with_description("Number of worker threads used by the runtime")
        .with_unit("{thread}")
        .with_callback(move |observer| observer.observe(metrics.num_workers() as u64, &[]))
        .build();

    let metrics = handle.metrics();
    meter
        .u64_observable_gauge("process.runtime.tokio.alive_tasks")
        .with_description("Number of tasks currently alive in the runtime")
        .with_unit("{task}")
        .with_callback(move |observer| observer.observe(metrics.num_alive_tasks() as u64, &[]))
        .build();

    let metrics = handle.metrics();
    meter
        .u64_observable_gauge("process.runtime.tokio.global_queue_depth")
        .with_description("Number of tasks waiting in the runtime's global queue")
        .with_unit("{task}")
        .with_callback(move |observer| {
            observer.observe(metrics.global_queue_depth() as u64, &[])
        })
        .build();

    let started = Instant::now();
    meter
        .f64_observable_gauge("process.uptime")
        .with_description("Time since runtime instrumentation started")
        .with_unit("s")
        .with_callback(move |observer| observer.observe(started.elapsed().as_secs_f64(), &[]))
        .build();

    tracing::debug!(target: "otel_lifecycle", "Started runtime metrics");
    Ok(())
}
