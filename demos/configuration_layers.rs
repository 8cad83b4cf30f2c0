//! Demonstrates how configuration is layered.
//!
//! Precedence, lowest first: defaults, a TOML file, programmatic changes,
//! then `OTEL_*` environment variables.
//!
//! Run with: OTEL_SERVICE_NAME=env-override cargo run --example configuration_layers

use telemetry_builder::{Builder, Config, Environment, TelemetryError};

#[tokio::main]
async fn main() -> Result<(), TelemetryError> {
    // A missing file is skipped and the defaults are used.
    let config = Config::from_file("telemetry.toml")?;

    let mut builder = Builder::new(config)
        .service_name("layered-config-example")
        .endpoint("http://localhost:4317")
        .resource_attribute("deployment.environment.name", "development")
        .resource_attribute("custom.team", "platform")
        .with_default_exporter();
    builder.config.meter.enabled = false;
    builder
        .config
        .exporter
        .headers
        .insert("authorization".to_string(), "Bearer my-token".to_string());

    // Preview the effective configuration as environment variables.
    let mut preview = builder.config.clone();
    preview.load_env()?;
    for (key, value) in preview.environ() {
        println!("{key}={value}");
    }

    // The endpoint is only used because of `with_default_exporter`. Exports
    // fail quietly in the background when no collector is listening.
    let telemetry = builder.build()?;
    println!(
        "Metrics built: {}",
        telemetry.sdk_meter_provider().is_some()
    );
    println!(
        "Traces built: {}",
        telemetry.sdk_tracer_provider().is_some()
    );

    telemetry.shutdown()
}
