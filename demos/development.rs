//! Minimal setup for local development: every span is printed to stdout.
//!
//! Run with: cargo run --example development

use opentelemetry::trace::{Tracer, TracerProvider as _};
use telemetry_builder::{Builder, Config, TelemetryError};

fn main() -> Result<(), TelemetryError> {
    let telemetry = Builder::development(Config::default())
        .service_name("development-example")
        .build()?;

    let tracer = telemetry.tracer_provider().tracer("development-example");
    tracer.in_span("handle_request", |_cx| {
        tracer.in_span("load_user", |_cx| {});
    });

    // Flushes the batch pipeline so the spans reach stdout before exit.
    telemetry.shutdown()
}
