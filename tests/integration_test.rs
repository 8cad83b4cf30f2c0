//! Integration tests verifying the builder wires exporters end to end.
//!
//! Global providers can only be installed once per process, so the global
//! registration test is a single comprehensive test.

use mock_collector::{MockServer, Protocol as MockProtocol};
use opentelemetry::KeyValue;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::{Tracer, TracerProvider as _};
use std::time::Duration;
use telemetry_builder::config::keys;
use telemetry_builder::{
    Builder, Config, Environment, Lifecycle, Protocol, Provider, Telemetry, TelemetryError,
};

#[tokio::test(flavor = "multi_thread")]
async fn test_spans_exported_to_grpc_collector() -> Result<(), TelemetryError> {
    let collector = MockServer::builder()
        .protocol(MockProtocol::Grpc)
        .start()
        .await
        .expect("Failed to start mock collector");

    let endpoint = format!("http://{}", collector.addr());

    let mut builder = Builder::new(Config::default())
        .service_name("integration-test-service")
        .endpoint(&endpoint)
        .resource_attribute("deployment.environment.name", "test")
        .with_default_exporter()
        .global();
    builder.config.exporter.protocol = Protocol::Grpc;
    builder.config.tracer.sampler = "always_on".to_string();

    let telemetry = builder.build()?;

    let tracer = opentelemetry::global::tracer("integration");
    do_traced_work(&tracer);
    outer_work(&tracer);

    let counter = telemetry.meter_provider().meter("integration").u64_counter("jobs").build();
    counter.add(1, &[KeyValue::new("queue", "default")]);

    // Use block_in_place to allow blocking without starving the tokio runtime.
    tokio::task::block_in_place(|| telemetry.force_flush())?;

    // We expect: do_traced_work, outer_work, inner_work = 3 spans
    collector
        .wait_for_spans(3, Duration::from_secs(5))
        .await
        .expect("Should receive all spans");

    collector
        .with_collector(|c| {
            c.expect_span_with_name("do_traced_work").assert_exists();
            c.expect_span_with_name("outer_work").assert_exists();
            c.expect_span_with_name("inner_work").assert_exists();
        })
        .await;

    tokio::task::block_in_place(|| telemetry.shutdown())?;

    Ok(())
}

#[test]
fn test_absent_handle_is_usable() {
    let telemetry: Option<Telemetry> = None;

    let span = telemetry.tracer_provider().tracer("absent").start("noop");
    drop(span);
    telemetry
        .meter_provider()
        .meter("absent")
        .u64_counter("ignored")
        .build()
        .add(1, &[]);

    assert!(telemetry.force_flush().is_ok());
    assert!(telemetry.shutdown().is_ok());
}

#[test]
fn test_environment_snapshot_round_trips() {
    temp_env::with_vars(
        [
            (keys::EXPORTER_OTLP_ENDPOINT, Some("http://collector:4317")),
            (keys::EXPORTER_OTLP_HEADERS, Some("x-tenant=blue")),
            (keys::TRACES_SAMPLER, Some("traceidratio")),
        ],
        || {
            let mut config = Config::default();
            config.load_env().expect("environment decodes");

            let snapshot = config.environ();
            assert_eq!(
                snapshot.get(keys::EXPORTER_OTLP_PROTOCOL).map(String::as_str),
                Some("grpc")
            );
            assert_eq!(
                snapshot.get(keys::EXPORTER_OTLP_TIMEOUT).map(String::as_str),
                Some("10000")
            );
            assert_eq!(
                snapshot.get(keys::EXPORTER_OTLP_HEADERS).map(String::as_str),
                Some("x-tenant=blue")
            );

            let mut decoded = Config::default();
            decoded.load_from_map(&snapshot).expect("snapshot decodes");
            assert_eq!(decoded, config);
        },
    );
}

fn do_traced_work<T>(tracer: &T)
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    tracer.in_span("do_traced_work", |_cx| {});
}

fn outer_work<T>(tracer: &T)
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    tracer.in_span("outer_work", |_cx| {
        inner_work(tracer);
    });
}

fn inner_work<T>(tracer: &T)
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    tracer.in_span("inner_work", |_cx| {});
}
