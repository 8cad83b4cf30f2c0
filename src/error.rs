//! Error types for provider construction and lifecycle.
//!
//! Builder methods never fail mid-chain. Failures are recorded in an
//! [`ErrorList`] and surfaced once, when the builder is finalised.

use crate::attributes::AttributeError;
use figment::Error as FigmentError;
use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::fmt;

/// The telemetry signal an error relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The metrics pipeline.
    Metrics,
    /// The tracing pipeline.
    Traces,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Metrics => f.write_str("meter provider"),
            Signal::Traces => f.write_str("tracer provider"),
        }
    }
}

/// Errors from configuration loading, provider construction and lifecycle.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TelemetryError {
    /// Failed to extract configuration from its sources.
    #[error("configuration error")]
    Config(#[source] Box<FigmentError>),

    /// An environment variable holds a value that cannot be decoded.
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv {
        /// The offending environment key.
        key: &'static str,
        /// The raw value that failed to decode.
        value: String,
        /// Why decoding failed.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The configured sampler name is not recognised.
    #[error("unsupported sampler {name:?}")]
    InvalidSampler {
        /// The sampler name that was configured.
        name: String,
    },

    /// Failed to create a metric exporter.
    #[error("failed to create metric exporter")]
    MetricExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to create a span exporter.
    #[error("failed to create span exporter")]
    TraceExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to create the Prometheus exporter.
    #[error("failed to create prometheus exporter")]
    PrometheusExporter(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to read TLS material for the OTLP exporter.
    #[error("failed to read TLS material from {path}")]
    Tls {
        /// Path of the certificate or key file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Only one half of the client certificate/key pair is configured.
    #[error(
        "OTEL_EXPORTER_OTLP_CLIENT_CERTIFICATE and OTEL_EXPORTER_OTLP_CLIENT_KEY must be set together"
    )]
    IncompleteClientIdentity,

    /// An OTLP/gRPC exporter was requested outside a Tokio runtime.
    #[error("OTLP/gRPC exporters must be created inside a Tokio runtime")]
    ExporterRuntime(#[source] tokio::runtime::TryCurrentError),

    /// Runtime metrics could not be started.
    #[error("failed to start runtime metrics")]
    RuntimeMetrics(#[source] tokio::runtime::TryCurrentError),

    /// Failed to merge attributes into the provider resource.
    #[error("failed to merge resource attributes")]
    Resource(#[source] AttributeError),

    /// Failed to flush a provider.
    #[error("failed to flush {signal}")]
    Flush {
        /// The provider that failed.
        signal: Signal,
        /// The SDK error.
        #[source]
        source: OTelSdkError,
    },

    /// Failed to shut down a provider.
    #[error("failed to shut down {signal}")]
    Shutdown {
        /// The provider that failed.
        signal: Signal,
        /// The SDK error.
        #[source]
        source: OTelSdkError,
    },

    /// Several independent failures, in the order they occurred.
    #[error("{0}")]
    Multiple(Errors),
}

impl TelemetryError {
    /// Returns every root error contained in this error.
    ///
    /// A [`TelemetryError::Multiple`] yields its members; any other error
    /// yields itself.
    pub fn errors(&self) -> &[TelemetryError] {
        match self {
            TelemetryError::Multiple(errors) => &errors.0,
            other => std::slice::from_ref(other),
        }
    }

    /// Joins errors: `None` when empty, the error itself when there is one,
    /// otherwise [`TelemetryError::Multiple`].
    pub fn join(errors: impl IntoIterator<Item = TelemetryError>) -> Option<TelemetryError> {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                TelemetryError::Multiple(Errors(nested)) => flat.extend(nested),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(TelemetryError::Multiple(Errors(flat))),
        }
    }
}

impl From<FigmentError> for TelemetryError {
    fn from(err: FigmentError) -> Self {
        TelemetryError::Config(Box::new(err))
    }
}

/// An ordered collection of errors carried by [`TelemetryError::Multiple`].
#[derive(Debug)]
pub struct Errors(Vec<TelemetryError>);

impl Errors {
    /// Iterates the contained errors in the order they occurred.
    pub fn iter(&self) -> std::slice::Iter<'_, TelemetryError> {
        self.0.iter()
    }

    /// Returns the number of contained errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no errors.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the collection, returning the errors.
    pub fn into_inner(self) -> Vec<TelemetryError> {
        self.0
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            write!(f, "\n  {}: {err}", i + 1)?;
            let mut source = std::error::Error::source(err);
            while let Some(cause) = source {
                write!(f, ": {cause}")?;
                source = cause.source();
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a TelemetryError;
    type IntoIter = std::slice::Iter<'a, TelemetryError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Accumulates construction errors until a builder is finalised.
#[derive(Debug, Default)]
pub struct ErrorList {
    errs: Option<Vec<TelemetryError>>,
}

impl ErrorList {
    /// Creates an empty list. No storage is allocated until the first append.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends errors to the end of the list.
    pub fn append(&mut self, errs: impl IntoIterator<Item = TelemetryError>) {
        let mut errs = errs.into_iter().peekable();
        if errs.peek().is_none() {
            return;
        }
        self.errs.get_or_insert_with(|| Vec::with_capacity(2)).extend(errs);
    }

    /// Appends a single error.
    pub fn push(&mut self, err: TelemetryError) {
        self.append(std::iter::once(err));
    }

    /// Returns the number of collected errors.
    pub fn len(&self) -> usize {
        self.errs.as_ref().map_or(0, Vec::len)
    }

    /// Returns `true` if no errors were collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Joins and drains the collected errors.
    ///
    /// Errors already returned by a previous call are not returned again.
    pub fn join(&mut self) -> Result<(), TelemetryError> {
        match TelemetryError::join(self.errs.take().unwrap_or_default()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Failure of [`MeterProviderBuilder::build`](crate::MeterProviderBuilder::build).
#[derive(Debug, thiserror::Error)]
pub enum MeterBuildError {
    /// No provider was constructed.
    #[error(transparent)]
    Failed(#[from] TelemetryError),

    /// The provider was constructed and is usable, but runtime metrics did
    /// not start.
    #[error("meter provider built without runtime metrics")]
    RuntimeMetrics {
        /// The usable provider.
        provider: SdkMeterProvider,
        /// Why runtime metrics did not start.
        #[source]
        source: TelemetryError,
    },
}

impl MeterBuildError {
    /// Returns the provider if one was constructed despite the error.
    pub fn into_provider(self) -> Option<SdkMeterProvider> {
        match self {
            MeterBuildError::Failed(_) => None,
            MeterBuildError::RuntimeMetrics { provider, .. } => Some(provider),
        }
    }
}

impl From<FigmentError> for MeterBuildError {
    fn from(err: FigmentError) -> Self {
        MeterBuildError::Failed(err.into())
    }
}
