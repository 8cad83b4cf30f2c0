//! Exporter construction for the OTLP, Prometheus and stdout pipelines.

use crate::config::{ExporterOtlpConfig, Protocol};
use crate::error::TelemetryError;
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use std::collections::HashMap;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

/// Converts exporter headers into gRPC metadata.
///
/// Entries that are not valid metadata are skipped with a warning.
pub(crate) fn build_tonic_metadata(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in headers {
        match (
            key.parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            (Ok(k), Ok(v)) => {
                metadata.insert(k, v);
            }
            _ => {
                tracing::warn!(target: "otel_lifecycle", header = %key, "Skipping invalid OTLP header");
            }
        }
    }
    metadata
}

/// Reads the configured TLS material.
///
/// Returns `None` when no certificate, client key or client certificate is
/// configured.
pub(crate) fn tls_config(
    config: &ExporterOtlpConfig,
) -> Result<Option<ClientTlsConfig>, TelemetryError> {
    let non_empty = |path: &Option<String>| path.clone().filter(|p| !p.is_empty());
    let ca = non_empty(&config.certificate);
    let client_cert = non_empty(&config.client_certificate);
    let client_key = non_empty(&config.client_key);

    if ca.is_none() && client_cert.is_none() && client_key.is_none() {
        return Ok(None);
    }

    let mut tls = ClientTlsConfig::new();
    if let Some(path) = ca {
        tls = tls.ca_certificate(Certificate::from_pem(read_pem(&path)?));
    }

    match (client_cert, client_key) {
        (Some(cert), Some(key)) => {
            tls = tls.identity(Identity::from_pem(read_pem(&cert)?, read_pem(&key)?));
        }
        (None, None) => {}
        _ => return Err(TelemetryError::IncompleteClientIdentity),
    }

    Ok(Some(tls))
}

fn read_pem(path: &str) -> Result<Vec<u8>, TelemetryError> {
    std::fs::read(path).map_err(|source| TelemetryError::Tls {
        path: path.to_string(),
        source,
    })
}

macro_rules! build_exporter {
    ($config:expr, $exporter_type:ident, $error_variant:ident) => {{
        let config: &ExporterOtlpConfig = $config;
        if config.protocol != Protocol::Grpc {
            tracing::warn!(
                target: "otel_lifecycle",
                protocol = %config.protocol,
                "Building a gRPC exporter although the configured protocol differs"
            );
        }

        let mut builder = opentelemetry_otlp::$exporter_type::builder()
            .with_tonic()
            .with_timeout(config.timeout);

        if let Some(endpoint) = config.endpoint() {
            builder = builder.with_endpoint(endpoint);
        }

        if !config.headers.is_empty() {
            builder = builder.with_metadata(build_tonic_metadata(&config.headers));
        }

        if let Some(tls) = tls_config(config)? {
            builder = builder.with_tls_config(tls);
        }

        // The tonic channel is connected lazily and needs a reactor.
        tokio::runtime::Handle::try_current().map_err(TelemetryError::ExporterRuntime)?;

        builder.build().map_err(TelemetryError::$error_variant)?
    }};
}

/// Builds an OTLP/gRPC metric exporter.
///
/// # Errors
///
/// Fails when TLS material cannot be read or no Tokio runtime is running.
pub fn grpc_metric_exporter(
    config: &ExporterOtlpConfig,
) -> Result<opentelemetry_otlp::MetricExporter, TelemetryError> {
    Ok(build_exporter!(config, MetricExporter, MetricExporter))
}

/// Builds an OTLP/gRPC span exporter.
///
/// # Errors
///
/// Fails when TLS material cannot be read or no Tokio runtime is running.
pub fn grpc_span_exporter(
    config: &ExporterOtlpConfig,
) -> Result<opentelemetry_otlp::SpanExporter, TelemetryError> {
    Ok(build_exporter!(config, SpanExporter, TraceExporter))
}

/// Builds a Prometheus reader bound to `registry`.
///
/// # Errors
///
/// Returns [`TelemetryError::PrometheusExporter`] if the exporter cannot be
/// created.
pub fn prometheus_exporter(
    registry: &prometheus::Registry,
) -> Result<opentelemetry_prometheus::PrometheusExporter, TelemetryError> {
    opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|err| TelemetryError::PrometheusExporter(Box::new(err)))
}

/// Returns a span exporter that pretty-prints spans to stdout.
pub fn stdout_span_exporter() -> opentelemetry_stdout::SpanExporter {
    opentelemetry_stdout::SpanExporter::default()
}
