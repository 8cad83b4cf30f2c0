//! Provider lifecycle management.
//!
//! [`Telemetry`] holds the providers produced by [`Builder::build`](crate::Builder::build).
//! Providers that were not configured are replaced with no-op implementations
//! when requested, so callers never need to check for their presence.

use crate::error::{Signal, TelemetryError};
use crate::middleware::HttpLayer;
use opentelemetry::InstrumentationScope;
use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::{InstrumentProvider, Meter, MeterProvider};
use opentelemetry::trace::TracerProvider;
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::Arc;

/// Gives access to a meter and a tracer provider.
pub trait Provider {
    /// Returns the meter provider, or a no-op provider when none is configured.
    fn meter_provider(&self) -> MeterProviderHandle;

    /// Returns the tracer provider, or a no-op provider when none is configured.
    fn tracer_provider(&self) -> TracerProviderHandle;
}

/// Flush and shutdown of configured providers.
pub trait Lifecycle {
    /// Exports all pending telemetry.
    ///
    /// # Errors
    ///
    /// Returns the joined errors of every provider that failed to flush.
    fn force_flush(&self) -> Result<(), TelemetryError>;

    /// Flushes and shuts down every configured provider.
    ///
    /// # Errors
    ///
    /// Returns the joined errors of every provider that failed to shut down.
    fn shutdown(&self) -> Result<(), TelemetryError>;
}

/// The providers built by [`Builder`](crate::Builder).
///
/// Cloning is cheap; clones share the same providers. Providers are not shut
/// down on drop; call [`shutdown`](Self::shutdown) before the process exits.
///
/// # Example
///
/// ```no_run
/// use opentelemetry::trace::{Tracer, TracerProvider};
/// use telemetry_builder::{Builder, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), telemetry_builder::TelemetryError> {
/// let telemetry = Builder::new(Config::default()).build()?;
///
/// telemetry
///     .tracer_provider()
///     .tracer("checkout")
///     .in_span("charge", |_cx| {});
///
/// telemetry.shutdown()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    meter: Option<SdkMeterProvider>,
    tracer: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Wraps already built providers.
    pub fn new(meter: Option<SdkMeterProvider>, tracer: Option<SdkTracerProvider>) -> Self {
        Self { meter, tracer }
    }

    /// Returns the meter provider, or a no-op provider when none is configured.
    pub fn meter_provider(&self) -> MeterProviderHandle {
        match &self.meter {
            Some(provider) => MeterProviderHandle::Sdk(provider.clone()),
            None => MeterProviderHandle::Noop(NoopMeterProvider),
        }
    }

    /// Returns the tracer provider, or a no-op provider when none is configured.
    pub fn tracer_provider(&self) -> TracerProviderHandle {
        match &self.tracer {
            Some(provider) => TracerProviderHandle::Sdk(provider.clone()),
            None => TracerProviderHandle::Noop(NoopTracerProvider::new()),
        }
    }

    /// Returns a `tower` layer that traces requests and records their
    /// duration with this handle's providers.
    pub fn http_layer(&self, operation: impl Into<String>) -> HttpLayer {
        HttpLayer::new(self, operation)
    }

    /// Returns the SDK meter provider if configured.
    pub fn sdk_meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.meter.as_ref()
    }

    /// Returns the SDK tracer provider if configured.
    pub fn sdk_tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer.as_ref()
    }

    /// Exports all pending telemetry of both providers.
    ///
    /// Both providers are flushed even if the first one fails. Blocks until
    /// the exporters finish. There is no deadline or cancellation parameter;
    /// the wait is bounded only by `OTEL_EXPORTER_OTLP_TIMEOUT` for spans and
    /// `OTEL_METRIC_EXPORT_TIMEOUT` for metrics.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Flush`] for a single failure, or
    /// [`TelemetryError::Multiple`] when both providers fail.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        let mut errs = Vec::new();

        if let Some(provider) = &self.meter
            && let Err(source) = provider.force_flush()
        {
            tracing::error!(target: "otel_lifecycle", error = %source, "Failed to flush meter provider");
            errs.push(TelemetryError::Flush {
                signal: Signal::Metrics,
                source,
            });
        }

        if let Some(provider) = &self.tracer
            && let Err(source) = provider.force_flush()
        {
            tracing::error!(target: "otel_lifecycle", error = %source, "Failed to flush tracer provider");
            errs.push(TelemetryError::Flush {
                signal: Signal::Traces,
                source,
            });
        }

        TelemetryError::join(errs).map_or(Ok(()), Err)
    }

    /// Shuts down both providers.
    ///
    /// Pending telemetry is exported first. Both providers are shut down even
    /// if the first one fails. Like [`force_flush`](Self::force_flush) this
    /// cannot be cancelled; the exporter timeouts are the only bound.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Shutdown`] for a single failure, or
    /// [`TelemetryError::Multiple`] when both providers fail.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        let mut errs = Vec::new();

        if let Some(provider) = &self.meter
            && let Err(source) = provider.shutdown()
        {
            tracing::error!(target: "otel_lifecycle", error = %source, "Failed to shut down meter provider");
            errs.push(TelemetryError::Shutdown {
                signal: Signal::Metrics,
                source,
            });
        }

        if let Some(provider) = &self.tracer
            && let Err(source) = provider.shutdown()
        {
            tracing::error!(target: "otel_lifecycle", error = %source, "Failed to shut down tracer provider");
            errs.push(TelemetryError::Shutdown {
                signal: Signal::Traces,
                source,
            });
        }

        TelemetryError::join(errs).map_or(Ok(()), Err)
    }
}

impl Provider for Telemetry {
    fn meter_provider(&self) -> MeterProviderHandle {
        Telemetry::meter_provider(self)
    }

    fn tracer_provider(&self) -> TracerProviderHandle {
        Telemetry::tracer_provider(self)
    }
}

impl Lifecycle for Telemetry {
    fn force_flush(&self) -> Result<(), TelemetryError> {
        Telemetry::force_flush(self)
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        Telemetry::shutdown(self)
    }
}

impl<T: Provider + ?Sized> Provider for &T {
    fn meter_provider(&self) -> MeterProviderHandle {
        (**self).meter_provider()
    }

    fn tracer_provider(&self) -> TracerProviderHandle {
        (**self).tracer_provider()
    }
}

impl<T: Lifecycle + ?Sized> Lifecycle for &T {
    fn force_flush(&self) -> Result<(), TelemetryError> {
        (**self).force_flush()
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        (**self).shutdown()
    }
}

impl<T: Provider> Provider for Option<T> {
    fn meter_provider(&self) -> MeterProviderHandle {
        match self {
            Some(inner) => inner.meter_provider(),
            None => MeterProviderHandle::Noop(NoopMeterProvider),
        }
    }

    fn tracer_provider(&self) -> TracerProviderHandle {
        match self {
            Some(inner) => inner.tracer_provider(),
            None => TracerProviderHandle::Noop(NoopTracerProvider::new()),
        }
    }
}

impl<T: Lifecycle> Lifecycle for Option<T> {
    fn force_flush(&self) -> Result<(), TelemetryError> {
        self.as_ref().map_or(Ok(()), |inner| inner.force_flush())
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        self.as_ref().map_or(Ok(()), |inner| inner.shutdown())
    }
}

/// Meter provider returned by [`Telemetry::meter_provider`].
#[derive(Debug, Clone)]
pub enum MeterProviderHandle {
    /// A configured SDK provider.
    Sdk(SdkMeterProvider),
    /// A provider whose instruments record nothing.
    Noop(NoopMeterProvider),
}

impl MeterProviderHandle {
    /// Returns `true` if this is the no-op provider.
    pub fn is_noop(&self) -> bool {
        matches!(self, MeterProviderHandle::Noop(_))
    }
}

impl MeterProvider for MeterProviderHandle {
    fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        match self {
            MeterProviderHandle::Sdk(provider) => provider.meter_with_scope(scope),
            MeterProviderHandle::Noop(provider) => provider.meter_with_scope(scope),
        }
    }
}

/// A meter provider whose instruments discard every measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMeterProvider;

#[derive(Debug)]
struct NoopInstruments;

impl InstrumentProvider for NoopInstruments {}

impl MeterProvider for NoopMeterProvider {
    fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
        Meter::new(Arc::new(NoopInstruments))
    }
}

/// Tracer provider returned by [`Telemetry::tracer_provider`].
#[derive(Debug, Clone)]
pub enum TracerProviderHandle {
    /// A configured SDK provider.
    Sdk(SdkTracerProvider),
    /// A provider whose spans are never recorded.
    Noop(NoopTracerProvider),
}

impl TracerProviderHandle {
    /// Returns `true` if this is the no-op provider.
    pub fn is_noop(&self) -> bool {
        matches!(self, TracerProviderHandle::Noop(_))
    }
}

impl TracerProvider for TracerProviderHandle {
    type Tracer = BoxedTracer;

    fn tracer_with_scope(&self, scope: InstrumentationScope) -> Self::Tracer {
        match self {
            TracerProviderHandle::Sdk(provider) => {
                BoxedTracer::new(Box::new(provider.tracer_with_scope(scope)))
            }
            TracerProviderHandle::Noop(provider) => {
                BoxedTracer::new(Box::new(provider.tracer_with_scope(scope)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span, Tracer};
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    #[test]
    fn absent_handle_returns_noop_providers() {
        let telemetry: Option<Telemetry> = None;

        assert!(telemetry.meter_provider().is_noop());
        assert!(telemetry.tracer_provider().is_noop());
        assert!(Lifecycle::force_flush(&telemetry).is_ok());
        assert!(Lifecycle::shutdown(&telemetry).is_ok());
    }

    #[test]
    fn absent_reference_is_valid() {
        let telemetry: Option<&Telemetry> = None;

        assert!(telemetry.tracer_provider().is_noop());
        assert!(Lifecycle::shutdown(&telemetry).is_ok());
    }

    #[test]
    fn empty_telemetry_returns_noop_providers() {
        let telemetry = Telemetry::default();

        assert!(telemetry.meter_provider().is_noop());
        assert!(telemetry.tracer_provider().is_noop());
        assert!(telemetry.force_flush().is_ok());
        assert!(telemetry.shutdown().is_ok());
    }

    #[test]
    fn noop_instruments_accept_measurements() {
        let meter = Telemetry::default().meter_provider().meter("test");
        meter.u64_counter("requests").build().add(1, &[]);
        meter.f64_histogram("latency").build().record(0.5, &[]);
    }

    #[test]
    fn noop_tracer_does_not_record() {
        let tracer = Telemetry::default().tracer_provider().tracer("test");
        let span = tracer.start("ignored");
        assert!(!span.is_recording());
    }

    #[test]
    fn configured_providers_are_returned() {
        let exporter = InMemorySpanExporter::default();
        let tracer_provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let telemetry = Telemetry::new(Some(SdkMeterProvider::default()), Some(tracer_provider));

        assert!(!telemetry.meter_provider().is_noop());
        let handle = Some(&telemetry).tracer_provider();
        assert!(!handle.is_noop());

        handle.tracer("test").in_span("recorded", |_| {});
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
        assert!(telemetry.shutdown().is_ok());
    }

    #[test]
    fn shutdown_failures_from_both_providers_are_joined() {
        let telemetry = Telemetry::new(
            Some(SdkMeterProvider::default()),
            Some(SdkTracerProvider::default()),
        );
        assert!(telemetry.shutdown().is_ok());

        let err = telemetry.shutdown().unwrap_err();
        let signals: Vec<_> = err
            .errors()
            .iter()
            .map(|e| match e {
                TelemetryError::Shutdown { signal, .. } => *signal,
                other => panic!("unexpected error: {other:?}"),
            })
            .collect();
        assert_eq!(signals, [Signal::Metrics, Signal::Traces]);
    }

    #[test]
    fn telemetry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Telemetry>();
    }
}
