//! Environment-driven assembly of OpenTelemetry meter and tracer providers.
//!
//! A [`Builder`] owns a [`Config`] whose fields map one-to-one onto the
//! standard `OTEL_*` environment variables. Building loads the environment,
//! wires the configured exporters (OTLP over gRPC, Prometheus, stdout) and
//! returns a [`Telemetry`] handle that hands out providers, falling back to
//! no-op implementations for anything left unconfigured. [`HttpLayer`]
//! instruments `tower` HTTP services with the handle's providers.
//!
//! # Example
//!
//! ```no_run
//! use telemetry_builder::{Builder, Config, TelemetryError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TelemetryError> {
//!     let telemetry = Builder::new(Config::default())
//!         .service_name("my-service")
//!         .with_default_exporter()
//!         .global()
//!         .build()?;
//!
//!     tracing::info!("Application running");
//!
//!     telemetry.shutdown()
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod attributes;
mod build_info;
mod builder;
pub mod config;
mod error;
mod exporter;
mod metrics;
mod middleware;
mod registry;
pub mod runtime;
mod telemetry;
mod trace;

pub use attributes::{AttributeError, attributes_from_map};
pub use build_info::{BuildInfo, Module, Setting, emit_build_env};
pub use builder::Builder;
pub use config::{
    Config, EnvMap, Environment, ExporterOtlpConfig, MeterProviderConfig, ParseProtocolError,
    Protocol, TracerProviderConfig,
};
pub use error::{ErrorList, Errors, MeterBuildError, Signal, TelemetryError};
pub use exporter::{
    grpc_metric_exporter, grpc_span_exporter, prometheus_exporter, stdout_span_exporter,
};
pub use metrics::MeterProviderBuilder;
pub use middleware::{HttpFuture, HttpLayer, HttpService};
pub use registry::{GlobalRegistry, OtelGlobal};
pub use telemetry::{
    Lifecycle, MeterProviderHandle, NoopMeterProvider, Provider, Telemetry, TracerProviderHandle,
};
pub use trace::TracerProviderBuilder;

/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry;
/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry_sdk;
/// Re-exported for version compatibility with this crate's dependencies.
pub use prometheus;
/// Re-exported for version compatibility with this crate's dependencies.
pub use tracing;

/// Re-exported for users who want to layer configuration themselves.
pub use figment;

/// Captures build information for [`TracerProviderBuilder::with_build_info`].
///
/// Reads the variables emitted by [`emit_build_env`] in build.rs, plus the
/// package version. Variables that were not emitted are skipped.
///
/// # Example
///
/// ```ignore
/// // In build.rs:
/// fn main() {
///     telemetry_builder::emit_build_env();
/// }
///
/// // In main.rs:
/// use telemetry_builder::{Builder, Config, capture_build_info};
///
/// let info = capture_build_info!();
/// let telemetry = Builder::new(Config::default())
///     .tracer(|t| t.with_build_info(Some(&info), &["tokio", "hyper"]))
///     .build()?;
/// ```
///
/// # Attributes Added
///
/// - `service.version` - the package version
/// - `vcs.revision`, `vcs.time`, `vcs.modified` - when built from a git checkout
/// - one attribute per requested dependency, holding its resolved version
#[macro_export]
macro_rules! capture_build_info {
    () => {
        $crate::BuildInfo::from_build_env(
            env!("CARGO_PKG_VERSION"),
            &[
                ("vcs.revision", option_env!("VCS_REVISION")),
                ("vcs.time", option_env!("VCS_TIME")),
                ("vcs.modified", option_env!("VCS_MODIFIED")),
                ("build.profile", option_env!("BUILD_PROFILE")),
            ],
            option_env!("BUILD_DEPENDENCIES"),
        )
    };
}
