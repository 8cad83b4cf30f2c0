//! Top-level builder assembling both providers from one [`Config`].
//!
//! Configuration is layered:
//! 1. Compiled defaults ([`Config::default`])
//! 2. An optional configuration file ([`Config::from_file`])
//! 3. Programmatic changes to [`Builder::config`]
//! 4. `OTEL_*` environment variables, loaded by [`Builder::build`]
//!
//! Later layers take precedence.

use crate::config::{Config, Environment, Protocol, SAMPLER_ALWAYS_ON};
use crate::error::{ErrorList, MeterBuildError, TelemetryError};
use crate::exporter::stdout_span_exporter;
use crate::metrics::MeterProviderBuilder;
use crate::registry::GlobalRegistry;
use crate::telemetry::Telemetry;
use crate::trace::TracerProviderBuilder;
use std::sync::Arc;

/// Builder for a [`Telemetry`] holding a meter and a tracer provider.
///
/// The builder owns the only copy of the configuration. Changes made to
/// [`config`](Self::config) before [`build`](Self::build) are what the
/// provider builders observe.
///
/// # Example
///
/// ```no_run
/// use telemetry_builder::{Builder, Config, TelemetryError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), TelemetryError> {
///     let telemetry = Builder::new(Config::default())
///         .service_name("checkout")
///         .endpoint("http://collector:4317")
///         .with_default_exporter()
///         .global()
///         .build()?;
///
///     // ...
///
///     telemetry.shutdown()
/// }
/// ```
#[derive(Debug)]
#[must_use = "builders do nothing unless .build() is called"]
pub struct Builder {
    /// Configuration shared by both provider builders.
    pub config: Config,
    /// Meter provider builder. No meter provider is built when `None`.
    pub meter_provider: Option<MeterProviderBuilder>,
    /// Tracer provider builder. No tracer provider is built when `None`.
    pub tracer_provider: Option<TracerProviderBuilder>,
    default_exporter: bool,
}

impl Builder {
    /// Creates a builder that owns `config`, with both provider builders.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            meter_provider: Some(MeterProviderBuilder::new()),
            tracer_provider: Some(TracerProviderBuilder::new()),
            default_exporter: false,
        }
    }

    /// Creates a builder for local development.
    ///
    /// Every span is sampled and printed to stdout.
    pub fn development(config: Config) -> Self {
        let mut builder = Self::new(config);
        builder.config.tracer.sampler = SAMPLER_ALWAYS_ON.to_string();
        builder.tracer(|t| t.with_span_exporter(stdout_span_exporter()))
    }

    /// Registers both built providers as the global providers.
    pub fn global(mut self) -> Self {
        self.meter_provider = self.meter_provider.map(MeterProviderBuilder::global);
        self.tracer_provider = self.tracer_provider.map(TracerProviderBuilder::global);
        self
    }

    /// Wires an OTLP exporter into both providers when the configuration
    /// names an endpoint.
    ///
    /// The decision is made by [`build`](Self::build) after environment
    /// overrides are loaded. Only `grpc` is wired; `http/protobuf` is logged
    /// and skipped.
    pub fn with_default_exporter(mut self) -> Self {
        self.default_exporter = true;
        self
    }

    /// Replaces the destination used by [`global`](Self::global) in both
    /// provider builders.
    pub fn with_registry(mut self, registry: Arc<dyn GlobalRegistry>) -> Self {
        self.meter_provider = self
            .meter_provider
            .map(|m| m.with_registry(Arc::clone(&registry)));
        self.tracer_provider = self.tracer_provider.map(|t| t.with_registry(registry));
        self
    }

    /// Configures the meter provider builder. Does nothing if it was removed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use telemetry_builder::{Builder, Config};
    ///
    /// let registry = prometheus::Registry::new();
    /// let builder = Builder::new(Config::default())
    ///     .meter(|m| m.with_prometheus_exporter(Some(&registry)));
    /// ```
    pub fn meter<F>(mut self, f: F) -> Self
    where
        F: FnOnce(MeterProviderBuilder) -> MeterProviderBuilder,
    {
        self.meter_provider = self.meter_provider.map(f);
        self
    }

    /// Configures the tracer provider builder. Does nothing if it was removed.
    pub fn tracer<F>(mut self, f: F) -> Self
    where
        F: FnOnce(TracerProviderBuilder) -> TracerProviderBuilder,
    {
        self.tracer_provider = self.tracer_provider.map(f);
        self
    }

    /// Sets the service name resource attribute.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = Some(name.into());
        self
    }

    /// Sets the OTLP endpoint.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.exporter.endpoint = Some(url.into());
        self
    }

    /// Adds a resource attribute shared by both providers.
    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .resource_attributes
            .insert(key.into(), value.into());
        self
    }

    /// Builds both providers.
    ///
    /// Environment overrides are loaded into the configuration first; a
    /// malformed value fails before any provider is built. Both providers are
    /// then built and their errors joined. A provider that is disabled or
    /// whose builder was removed is absent from the result, but errors
    /// recorded by its builder are still returned. If runtime metrics fail to
    /// start, the failure is logged and the meter provider is kept.
    ///
    /// # Errors
    ///
    /// Returns the configuration error, or the joined errors of both
    /// provider builders. Nothing is registered globally when an error is
    /// returned; providers that were built are shut down.
    pub fn build(mut self) -> Result<Telemetry, TelemetryError> {
        self.config.load_env()?;
        if self.default_exporter {
            self.attach_default_exporter();
        }

        let Builder {
            mut config,
            mut meter_provider,
            mut tracer_provider,
            ..
        } = self;

        // Registration waits until both providers are known to be usable.
        let meter_registry = meter_provider
            .as_mut()
            .and_then(MeterProviderBuilder::take_registration);
        let tracer_registry = tracer_provider
            .as_mut()
            .and_then(TracerProviderBuilder::take_registration);

        let attributes = config.resource_key_values();
        let mut errs = ErrorList::new();

        let meter = match meter_provider {
            Some(builder) if config.meter.enabled => {
                match builder
                    .with_attributes(attributes.iter().cloned())
                    .build(&mut config.meter)
                {
                    Ok(provider) => Some(provider),
                    Err(MeterBuildError::RuntimeMetrics { provider, source }) => {
                        tracing::warn!(
                            target: "otel_lifecycle",
                            error = %source,
                            "Meter provider built without runtime metrics"
                        );
                        Some(provider)
                    }
                    Err(MeterBuildError::Failed(err)) => {
                        errs.push(err);
                        None
                    }
                }
            }
            Some(builder) => {
                errs.append(builder.discard().err());
                None
            }
            None => None,
        };

        let tracer = match tracer_provider {
            Some(builder) if config.tracer.enabled => {
                match builder.with_attributes(attributes).build(&mut config.tracer) {
                    Ok(provider) => Some(provider),
                    Err(err) => {
                        errs.push(err);
                        None
                    }
                }
            }
            Some(builder) => {
                errs.append(builder.discard().err());
                None
            }
            None => None,
        };

        let telemetry = Telemetry::new(meter, tracer);
        if let Err(err) = errs.join() {
            if let Err(cleanup) = telemetry.shutdown() {
                tracing::warn!(
                    target: "otel_lifecycle",
                    error = %cleanup,
                    "Failed to shut down providers after a failed build"
                );
            }
            return Err(err);
        }

        if let (Some(registry), Some(provider)) = (meter_registry, telemetry.sdk_meter_provider()) {
            registry.set_meter_provider(provider.clone());
        }
        if let (Some(registry), Some(provider)) = (tracer_registry, telemetry.sdk_tracer_provider())
        {
            registry.set_tracer_provider(provider.clone());
        }

        tracing::debug!(
            target: "otel_lifecycle",
            metrics = telemetry.sdk_meter_provider().is_some(),
            traces = telemetry.sdk_tracer_provider().is_some(),
            "Telemetry providers built"
        );
        Ok(telemetry)
    }

    fn attach_default_exporter(&mut self) {
        let exporter = &self.config.exporter;
        let Some(endpoint) = exporter.endpoint() else {
            return;
        };

        match exporter.protocol {
            Protocol::Grpc => {
                let mut metric_exporter = exporter.clone();
                metric_exporter.timeout = exporter.timeout.min(self.config.meter.export_timeout);

                if self.config.meter.enabled {
                    self.meter_provider = self
                        .meter_provider
                        .take()
                        .map(|m| m.with_grpc_exporter(&metric_exporter));
                }
                if self.config.tracer.enabled {
                    self.tracer_provider = self
                        .tracer_provider
                        .take()
                        .map(|t| t.with_grpc_exporter(exporter));
                }
                tracing::debug!(target: "otel_lifecycle", endpoint, "Wired default OTLP exporter");
            }
            Protocol::HttpProtobuf => {
                tracing::warn!(
                    target: "otel_lifecycle",
                    protocol = %exporter.protocol,
                    "Default exporter only supports grpc; no exporter wired"
                );
            }
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
