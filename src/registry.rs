//! Registration of built providers as the process-wide defaults.

use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::fmt::Debug;
use std::sync::Arc;

/// Destination for providers built with `global()` set.
///
/// Builders register through this trait instead of touching process state
/// directly, so the destination can be replaced in tests.
pub trait GlobalRegistry: Send + Sync + Debug {
    /// Installs `provider` as the default meter provider.
    fn set_meter_provider(&self, provider: SdkMeterProvider);

    /// Installs `provider` as the default tracer provider.
    fn set_tracer_provider(&self, provider: SdkTracerProvider);
}

/// Registers providers with [`opentelemetry::global`].
///
/// Installing a tracer provider also installs a W3C trace context and
/// baggage propagator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelGlobal;

impl GlobalRegistry for OtelGlobal {
    fn set_meter_provider(&self, provider: SdkMeterProvider) {
        opentelemetry::global::set_meter_provider(provider);
        tracing::debug!(target: "otel_lifecycle", "Registered global meter provider");
    }

    fn set_tracer_provider(&self, provider: SdkTracerProvider) {
        opentelemetry::global::set_tracer_provider(provider);

        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);
        opentelemetry::global::set_text_map_propagator(propagator);
        tracing::debug!(target: "otel_lifecycle", "Registered global tracer provider");
    }
}

pub(crate) fn default_registry() -> Arc<dyn GlobalRegistry> {
    Arc::new(OtelGlobal)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records registrations instead of installing them.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingRegistry {
        pub(crate) meters: Mutex<Vec<SdkMeterProvider>>,
        pub(crate) tracers: Mutex<Vec<SdkTracerProvider>>,
    }

    impl RecordingRegistry {
        pub(crate) fn meter_count(&self) -> usize {
            self.meters.lock().unwrap().len()
        }

        pub(crate) fn tracer_count(&self) -> usize {
            self.tracers.lock().unwrap().len()
        }
    }

    impl GlobalRegistry for RecordingRegistry {
        fn set_meter_provider(&self, provider: SdkMeterProvider) {
            self.meters.lock().unwrap().push(provider);
        }

        fn set_tracer_provider(&self, provider: SdkTracerProvider) {
            self.tracers.lock().unwrap().push(provider);
        }
    }
}
