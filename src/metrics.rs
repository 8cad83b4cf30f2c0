//! Meter provider construction.

use crate::attributes::build_resource;
use crate::config::{Environment, ExporterOtlpConfig, MeterProviderConfig};
use crate::error::{ErrorList, MeterBuildError, TelemetryError};
use crate::exporter;
use crate::registry::{GlobalRegistry, default_registry};
use crate::runtime;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::reader::MetricReader;
use opentelemetry_sdk::metrics::{
    MeterProviderBuilder as SdkMeterProviderBuilder, PeriodicReader, SdkMeterProvider, View,
};
use std::fmt;
use std::sync::Arc;

type MeterOption =
    Box<dyn FnOnce(SdkMeterProviderBuilder, &MeterProviderConfig) -> SdkMeterProviderBuilder + Send>;

/// Builder for an [`SdkMeterProvider`].
///
/// Option methods never fail. Errors from exporter construction are kept
/// until [`build`](Self::build), which fails if any were recorded.
///
/// # Example
///
/// ```no_run
/// use telemetry_builder::{MeterProviderBuilder, MeterProviderConfig};
///
/// let registry = prometheus::Registry::new();
/// let mut config = MeterProviderConfig::default();
/// let provider = MeterProviderBuilder::new()
///     .with_prometheus_exporter(Some(&registry))
///     .disable_runtime_metrics()
///     .build(&mut config)?;
/// # Ok::<(), telemetry_builder::MeterBuildError>(())
/// ```
#[must_use = "builders do nothing unless .build() is called"]
pub struct MeterProviderBuilder {
    opts: Vec<MeterOption>,
    errs: ErrorList,
    attributes: Vec<KeyValue>,
    global: bool,
    runtime_metrics: bool,
    registry: Arc<dyn GlobalRegistry>,
}

impl MeterProviderBuilder {
    /// Creates a builder with runtime metrics enabled and no readers.
    pub fn new() -> Self {
        Self {
            opts: Vec::new(),
            errs: ErrorList::new(),
            attributes: Vec::new(),
            global: false,
            runtime_metrics: true,
            registry: default_registry(),
        }
    }

    /// Appends a raw SDK builder transformation.
    ///
    /// Options run in the order they were added, after the resource is set,
    /// so a later option overrides an earlier one.
    pub fn with<F>(mut self, option: F) -> Self
    where
        F: FnOnce(SdkMeterProviderBuilder) -> SdkMeterProviderBuilder + Send + 'static,
    {
        self.opts.push(Box::new(move |builder, _| option(builder)));
        self
    }

    /// Registers a metric reader.
    pub fn with_reader<R: MetricReader>(self, reader: R) -> Self {
        self.with(move |builder| builder.with_reader(reader))
    }

    /// Registers a view that transforms matching instruments.
    pub fn with_view<V: View>(self, view: V) -> Self {
        self.with(move |builder| builder.with_view(view))
    }

    /// Registers a push exporter behind a periodic reader.
    ///
    /// The export interval is read from the [`MeterProviderConfig`] passed to
    /// [`build`](Self::build).
    pub fn with_periodic_exporter<E: PushMetricExporter>(mut self, exporter: E) -> Self {
        self.opts.push(Box::new(move |builder, config| {
            let reader = PeriodicReader::builder(exporter)
                .with_interval(config.export_interval)
                .build();
            builder.with_reader(reader)
        }));
        self
    }

    /// Registers an OTLP/gRPC exporter.
    ///
    /// A construction failure is recorded and returned by [`build`](Self::build).
    pub fn with_grpc_exporter(mut self, config: &ExporterOtlpConfig) -> Self {
        match exporter::grpc_metric_exporter(config) {
            Ok(exporter) => self.with_periodic_exporter(exporter),
            Err(err) => {
                self.errs.push(err);
                self
            }
        }
    }

    /// Registers a Prometheus reader bound to `registry`. Does nothing when
    /// `registry` is `None`.
    pub fn with_prometheus_exporter(mut self, registry: Option<&prometheus::Registry>) -> Self {
        let Some(registry) = registry else {
            return self;
        };

        match exporter::prometheus_exporter(registry) {
            Ok(reader) => self.with_reader(reader),
            Err(err) => {
                self.errs.push(err);
                self
            }
        }
    }

    /// Adds resource attributes.
    pub fn with_attributes(mut self, attrs: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attrs);
        self
    }

    /// Registers the built provider as the global meter provider.
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Skips starting runtime metrics after the provider is built.
    pub fn disable_runtime_metrics(mut self) -> Self {
        self.runtime_metrics = false;
        self
    }

    /// Replaces the destination used by [`global`](Self::global).
    pub fn with_registry(mut self, registry: Arc<dyn GlobalRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Returns `true` if the provider will be registered globally.
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Returns `true` if runtime metrics will be started.
    pub fn runtime_metrics_enabled(&self) -> bool {
        self.runtime_metrics
    }

    /// Builds the provider.
    ///
    /// Environment overrides are loaded into `config` first, so the caller
    /// observes the values the provider was built with.
    ///
    /// # Errors
    ///
    /// Returns [`MeterBuildError::Failed`] if an option recorded an error or
    /// the configuration cannot be loaded. Returns
    /// [`MeterBuildError::RuntimeMetrics`] with a usable provider if runtime
    /// metrics did not start; the provider is registered globally either way.
    pub fn build(
        mut self,
        config: &mut MeterProviderConfig,
    ) -> Result<SdkMeterProvider, MeterBuildError> {
        self.errs.join()?;
        config.load_env()?;

        let resource = build_resource(&self.attributes).map_err(TelemetryError::Resource)?;
        let mut builder = SdkMeterProvider::builder().with_resource(resource);
        for option in self.opts {
            builder = option(builder, config);
        }
        let provider = builder.build();

        let runtime_err = if self.runtime_metrics {
            runtime::start(&provider).err()
        } else {
            None
        };

        if self.global {
            self.registry.set_meter_provider(provider.clone());
        }

        match runtime_err {
            Some(source) => Err(MeterBuildError::RuntimeMetrics { provider, source }),
            None => Ok(provider),
        }
    }

    /// Consumes the builder without building, returning any recorded errors.
    pub(crate) fn discard(mut self) -> Result<(), TelemetryError> {
        self.errs.join()
    }

    /// Clears the global mark, returning the registry it pointed at.
    pub(crate) fn take_registration(&mut self) -> Option<Arc<dyn GlobalRegistry>> {
        std::mem::take(&mut self.global).then(|| Arc::clone(&self.registry))
    }
}

impl Default for MeterProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("options", &self.opts.len())
            .field("errors", &self.errs.len())
            .field("attributes", &self.attributes)
            .field("global", &self.global)
            .field("runtime_metrics", &self.runtime_metrics)
            .finish()
    }
}
