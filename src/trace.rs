//! Tracer provider construction.

use crate::attributes::build_resource;
use crate::build_info::BuildInfo;
use crate::config::{Environment, ExporterOtlpConfig, TracerProviderConfig};
use crate::error::{ErrorList, TelemetryError};
use crate::exporter;
use crate::registry::{GlobalRegistry, default_registry};
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{
    Sampler, SdkTracerProvider, SpanExporter, TracerProviderBuilder as SdkTracerProviderBuilder,
};
use std::fmt;
use std::sync::Arc;

type TracerOption = Box<dyn FnOnce(SdkTracerProviderBuilder) -> SdkTracerProviderBuilder + Send>;

/// A span exporter waiting to be wired into its own batch pipeline.
struct PendingExporter {
    name: &'static str,
    install: TracerOption,
}

/// Builder for an [`SdkTracerProvider`].
///
/// # Example
///
/// ```no_run
/// use telemetry_builder::{TracerProviderBuilder, TracerProviderConfig, stdout_span_exporter};
///
/// let mut config = TracerProviderConfig::default();
/// let provider = TracerProviderBuilder::new()
///     .with_span_exporter(stdout_span_exporter())
///     .build(&mut config)?;
/// # Ok::<(), telemetry_builder::TelemetryError>(())
/// ```
#[must_use = "builders do nothing unless .build() is called"]
pub struct TracerProviderBuilder {
    opts: Vec<TracerOption>,
    errs: ErrorList,
    attributes: Vec<KeyValue>,
    sampler: Option<Sampler>,
    exporters: Vec<PendingExporter>,
    global: bool,
    registry: Arc<dyn GlobalRegistry>,
}

impl TracerProviderBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            opts: Vec::new(),
            errs: ErrorList::new(),
            attributes: Vec::new(),
            sampler: None,
            exporters: Vec::new(),
            global: false,
            registry: default_registry(),
        }
    }

    /// Appends a raw SDK builder transformation.
    ///
    /// Options run in the order they were added, after the configured sampler
    /// is applied and before the [`with_sampler`](Self::with_sampler)
    /// override.
    pub fn with<F>(mut self, option: F) -> Self
    where
        F: FnOnce(SdkTracerProviderBuilder) -> SdkTracerProviderBuilder + Send + 'static,
    {
        self.opts.push(Box::new(option));
        self
    }

    /// Overrides the sampler from [`TracerProviderConfig`]. The configured
    /// sampler is then not resolved at all, so an invalid
    /// `OTEL_TRACES_SAMPLER` does not fail the build.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Adds resource attributes. Duplicates are kept; the last one wins
    /// when the resource is built.
    pub fn with_attributes(mut self, attrs: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attrs);
        self
    }

    /// Adds a span exporter, wired into its own batch pipeline.
    pub fn with_span_exporter<E: SpanExporter + 'static>(mut self, exporter: E) -> Self {
        self.exporters.push(PendingExporter {
            name: std::any::type_name::<E>(),
            install: Box::new(move |builder| builder.with_batch_exporter(exporter)),
        });
        self
    }

    /// Adds an OTLP/gRPC span exporter.
    ///
    /// A construction failure is recorded and returned by [`build`](Self::build).
    pub fn with_grpc_exporter(mut self, config: &ExporterOtlpConfig) -> Self {
        match exporter::grpc_span_exporter(config) {
            Ok(exporter) => self.with_span_exporter(exporter),
            Err(err) => {
                self.errs.push(err);
                self
            }
        }
    }

    /// Adds attributes describing the build: `service.version`, every `vcs.*`
    /// setting and the versions of the named `modules`. Does nothing when
    /// `info` is `None`.
    pub fn with_build_info(self, info: Option<&BuildInfo>, modules: &[&str]) -> Self {
        match info {
            Some(info) => self.with_attributes(info.key_values(modules)),
            None => self,
        }
    }

    /// Registers the built provider as the global tracer provider.
    pub fn global(mut self) -> Self {
        self.global = true;
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

    /// Returns the number of registered span exporters.
    pub fn span_exporter_count(&self) -> usize {
        self.exporters.len()
    }

    /// Returns the type names of the registered span exporters.
    pub fn span_exporter_names(&self) -> Vec<&'static str> {
        self.exporters.iter().map(|e| e.name).collect()
    }

    /// Returns the accumulated resource attributes.
    pub fn attributes(&self) -> &[KeyValue] {
        &self.attributes
    }

    /// Builds the provider.
    ///
    /// Environment overrides are loaded into `config` first.
    ///
    /// # Errors
    ///
    /// Fails if an option recorded an error, the configuration cannot be
    /// loaded, an attribute has an empty key, or the configured sampler is
    /// invalid and no explicit sampler was set.
    pub fn build(
        mut self,
        config: &mut TracerProviderConfig,
    ) -> Result<SdkTracerProvider, TelemetryError> {
        self.errs.join()?;
        config.load_env()?;

        let resource = build_resource(&self.attributes).map_err(TelemetryError::Resource)?;

        let mut builder = SdkTracerProvider::builder();
        if self.sampler.is_none() {
            builder = builder.with_sampler(config.sampler()?);
        }
        for option in self.opts {
            builder = option(builder);
        }
        if let Some(sampler) = self.sampler {
            builder = builder.with_sampler(sampler);
        }
        for exporter in self.exporters {
            builder = (exporter.install)(builder);
        }

        let provider = builder.with_resource(resource).build();

        if self.global {
            self.registry.set_tracer_provider(provider.clone());
        }
        Ok(provider)
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

impl Default for TracerProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TracerProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerProviderBuilder")
            .field("options", &self.opts.len())
            .field("errors", &self.errs.len())
            .field("attributes", &self.attributes)
            .field("sampler", &self.sampler)
            .field("span_exporters", &self.span_exporter_names())
            .field("global", &self.global)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SAMPLER_ALWAYS_OFF, SAMPLER_ALWAYS_ON, keys};
    use crate::registry::testing::RecordingRegistry;
    use opentelemetry::trace::{Tracer, TracerProvider as _};
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    fn always_on() -> TracerProviderConfig {
        TracerProviderConfig {
            sampler: SAMPLER_ALWAYS_ON.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn spans_reach_every_exporter() {
        let first = InMemorySpanExporter::default();
        let second = InMemorySpanExporter::default();
        let mut config = always_on();

        let provider = TracerProviderBuilder::new()
            .with_span_exporter(first.clone())
            .with_span_exporter(second.clone())
            .build(&mut config)
            .unwrap();

        provider.tracer("test").in_span("checkout", |_| {});
        provider.force_flush().unwrap();

        assert_eq!(first.get_finished_spans().unwrap().len(), 1);
        assert_eq!(second.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn configured_sampler_is_applied() {
        let exporter = InMemorySpanExporter::default();
        let mut config = TracerProviderConfig {
            sampler: SAMPLER_ALWAYS_OFF.to_string(),
            ..Default::default()
        };

        let provider = TracerProviderBuilder::new()
            .with_span_exporter(exporter.clone())
            .build(&mut config)
            .unwrap();

        provider.tracer("test").in_span("dropped", |_| {});
        provider.force_flush().unwrap();

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn explicit_sampler_overrides_config() {
        let exporter = InMemorySpanExporter::default();
        let mut config = TracerProviderConfig {
            sampler: SAMPLER_ALWAYS_OFF.to_string(),
            ..Default::default()
        };

        let provider = TracerProviderBuilder::new()
            .with_sampler(Sampler::AlwaysOn)
            .with_span_exporter(exporter.clone())
            .build(&mut config)
            .unwrap();

        provider.tracer("test").in_span("kept", |_| {});
        provider.force_flush().unwrap();

        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn explicit_sampler_ignores_invalid_environment_sampler() {
        temp_env::with_var(keys::TRACES_SAMPLER, Some("bogus"), || {
            let exporter = InMemorySpanExporter::default();
            let mut config = TracerProviderConfig::default();

            let provider = TracerProviderBuilder::new()
                .with_sampler(Sampler::AlwaysOn)
                .with_span_exporter(exporter.clone())
                .build(&mut config)
                .unwrap();

            provider.tracer("test").in_span("kept", |_| {});
            provider.force_flush().unwrap();

            assert_eq!(config.sampler, "bogus");
            assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
        });
    }

    #[test]
    fn take_registration_clears_global() {
        let mut builder = TracerProviderBuilder::new();
        assert!(builder.take_registration().is_none());

        let mut builder = builder.global();
        assert!(builder.take_registration().is_some());
        assert!(!builder.is_global());
    }

    #[test]
    fn build_info_becomes_attributes() {
        let info = BuildInfo::new("3.1.0")
            .with_setting("vcs.revision", "abc123")
            .with_dependency("tokio", "1.44.1");
        let mut config = always_on();

        let builder = TracerProviderBuilder::new()
            .with_attributes([KeyValue::new("service.name", "orders")])
            .with_build_info(Some(&info), &["tokio"]);

        let keys: Vec<_> = builder.attributes().iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(
            keys,
            ["service.name", "service.version", "vcs.revision", "tokio"]
        );
        assert!(builder.build(&mut config).is_ok());
    }

    #[test]
    fn build_info_none_is_a_no_op() {
        let builder = TracerProviderBuilder::new().with_build_info(None, &["tokio"]);
        assert!(builder.attributes().is_empty());
    }

    #[test]
    fn deferred_exporter_errors_fail_build() {
        let registry = Arc::new(RecordingRegistry::default());
        let broken = ExporterOtlpConfig {
            endpoint: Some("https://collector:4317".to_string()),
            certificate: Some("/nonexistent/ca.pem".to_string()),
            ..Default::default()
        };
        let mut config = TracerProviderConfig::default();

        let err = TracerProviderBuilder::new()
            .with_grpc_exporter(&broken)
            .with_grpc_exporter(&broken)
            .global()
            .with_registry(registry.clone())
            .build(&mut config)
            .unwrap_err();

        assert_eq!(err.errors().len(), 2);
        assert_eq!(registry.tracer_count(), 0);
    }

    #[test]
    fn global_registers_with_registry() {
        let registry = Arc::new(RecordingRegistry::default());
        let mut config = TracerProviderConfig::default();

        TracerProviderBuilder::new()
            .global()
            .with_registry(registry.clone())
            .build(&mut config)
            .unwrap();

        assert_eq!(registry.tracer_count(), 1);
    }

    #[test]
    fn unknown_sampler_from_environment_fails_build() {
        temp_env::with_var(keys::TRACES_SAMPLER, Some("sometimes"), || {
            let mut config = TracerProviderConfig::default();
            let err = TracerProviderBuilder::new().build(&mut config).unwrap_err();

            assert!(matches!(err, TelemetryError::InvalidSampler { .. }));
            assert_eq!(config.sampler, "sometimes");
        });
    }

    #[test]
    fn empty_attribute_key_fails_build() {
        let mut config = TracerProviderConfig::default();
        let err = TracerProviderBuilder::new()
            .with_attributes([KeyValue::new("", "orphan")])
            .build(&mut config)
            .unwrap_err();

        assert!(matches!(err, TelemetryError::Resource(_)));
    }

    #[test]
    fn exporter_names_are_reported() {
        let builder = TracerProviderBuilder::new().with_span_exporter(InMemorySpanExporter::default());

        assert_eq!(builder.span_exporter_count(), 1);
        assert!(builder.span_exporter_names()[0].ends_with("InMemorySpanExporter"));
    }
}
