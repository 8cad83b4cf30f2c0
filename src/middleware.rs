//! Request instrumentation for `tower` HTTP services.
//!
//! [`HttpLayer`] wraps a service handling [`http::Request`]s. Every request
//! gets a server span named after the operation, and its duration is
//! recorded in the `http.server.request.duration` histogram. Both use the
//! providers of a [`Telemetry`](crate::Telemetry) handle, so an absent or
//! disabled provider makes the layer a no-op.

use crate::telemetry::Provider;
use http::{HeaderMap, Request, Response};
use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::{Histogram, MeterProvider as _};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context, InstrumentationScope, KeyValue};
use opentelemetry_semantic_conventions::attribute::{
    ERROR_TYPE, HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, URL_PATH,
};
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, ready};
use std::time::Instant;
use tower::{Layer, Service};

const REQUEST_DURATION: &str = "http.server.request.duration";

/// Tower layer that traces requests and records their duration.
///
/// # Example
///
/// ```ignore
/// use telemetry_builder::{Builder, Config};
/// use tower::ServiceBuilder;
///
/// let telemetry = Builder::new(Config::default()).build()?;
/// let service = ServiceBuilder::new()
///     .layer(telemetry.http_layer("checkout"))
///     .service(my_handler);
/// ```
#[derive(Clone)]
pub struct HttpLayer {
    operation: Arc<str>,
    tracer: Arc<BoxedTracer>,
    duration: Histogram<f64>,
}

impl HttpLayer {
    /// Creates a layer using the providers of `provider`.
    ///
    /// Spans are named `operation`.
    pub fn new<P: Provider + ?Sized>(provider: &P, operation: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();

        let tracer = provider.tracer_provider().tracer_with_scope(scope.clone());
        let duration = provider
            .meter_provider()
            .meter_with_scope(scope)
            .f64_histogram(REQUEST_DURATION)
            .with_description("Duration of HTTP server requests")
            .with_unit("s")
            .build();

        Self {
            operation: Arc::from(operation.into()),
            tracer: Arc::new(tracer),
            duration,
        }
    }
}

impl fmt::Debug for HttpLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLayer")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for HttpLayer {
    type Service = HttpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Service produced by [`HttpLayer`].
#[derive(Clone)]
pub struct HttpService<S> {
    inner: S,
    layer: HttpLayer,
}

impl<S: fmt::Debug> fmt::Debug for HttpService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpService")
            .field("inner", &self.inner)
            .field("layer", &self.layer)
            .finish()
    }
}

impl<S, B, RB> Service<Request<B>> for HttpService<S>
where
    S: Service<Request<B>, Response = Response<RB>>,
    S::Error: fmt::Display,
{
    type Response = Response<RB>;
    type Error = S::Error;
    type Future = HttpFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderMapExtractor(request.headers()))
        });

        let method = request.method().as_str().to_string();
        let span = self
            .layer
            .tracer
            .span_builder(self.layer.operation.to_string())
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new(HTTP_REQUEST_METHOD, method.clone()),
                KeyValue::new(URL_PATH, request.uri().path().to_string()),
            ])
            .start_with_context(self.layer.tracer.as_ref(), &parent);
        let cx = parent.with_span(span);

        let inner = {
            let _guard = cx.clone().attach();
            self.inner.call(request)
        };

        HttpFuture {
            inner,
            cx,
            method,
            started: Instant::now(),
            duration: self.layer.duration.clone(),
        }
    }
}

/// Future returned by [`HttpService`].
///
/// Ends the request span and records the request duration on completion.
#[pin_project]
pub struct HttpFuture<F> {
    #[pin]
    inner: F,
    cx: Context,
    method: String,
    started: Instant,
    duration: Histogram<f64>,
}

impl<F, RB, E> Future for HttpFuture<F>
where
    F: Future<Output = Result<Response<RB>, E>>,
    E: fmt::Display,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, task: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = {
            let _guard = this.cx.clone().attach();
            ready!(this.inner.poll(task))
        };

        let span = this.cx.span();
        let mut attrs = vec![KeyValue::new(HTTP_REQUEST_METHOD, this.method.clone())];
        match &result {
            Ok(response) => {
                let status = response.status();
                let code = KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(status.as_u16()));
                span.set_attribute(code.clone());
                attrs.push(code);
                if status.is_server_error() {
                    span.set_status(Status::error(status.to_string()));
                    attrs.push(KeyValue::new(ERROR_TYPE, status.as_str().to_string()));
                }
            }
            Err(err) => {
                span.set_status(Status::error(err.to_string()));
                attrs.push(KeyValue::new(ERROR_TYPE, "_OTHER"));
            }
        }
        span.end();

        this.duration
            .record(this.started.elapsed().as_secs_f64(), &attrs);
        Poll::Ready(result)
    }
}

struct HeaderMapExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderMapExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Telemetry;
    use opentelemetry::trace::SpanId;
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use std::convert::Infallible;
    use tower::ServiceExt;

    struct Harness {
        telemetry: Telemetry,
        spans: InMemorySpanExporter,
        metrics: InMemoryMetricExporter,
    }

    fn harness() -> Harness {
        let spans = InMemorySpanExporter::default();
        let metrics = InMemoryMetricExporter::default();
        let telemetry = Telemetry::new(
            Some(
                SdkMeterProvider::builder()
                    .with_reader(PeriodicReader::builder(metrics.clone()).build())
                    .build(),
            ),
            Some(
                SdkTracerProvider::builder()
                    .with_simple_exporter(spans.clone())
                    .build(),
            ),
        );
        Harness {
            telemetry,
            spans,
            metrics,
        }
    }

    fn respond_with(
        status: u16,
    ) -> impl Service<Request<()>, Response = Response<()>, Error = Infallible> + Clone {
        tower::service_fn(move |_req: Request<()>| async move {
            Ok::<_, Infallible>(Response::builder().status(status).body(()).unwrap())
        })
    }

    fn attribute(span: &opentelemetry_sdk::trace::SpanData, key: &str) -> Option<String> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    #[tokio::test]
    async fn request_creates_server_span() {
        let h = harness();
        let service = h.telemetry.http_layer("checkout").layer(respond_with(200));

        let response = service
            .oneshot(Request::get("/pay").body(()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let spans = h.spans.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "checkout");
        assert_eq!(span.span_kind, SpanKind::Server);
        assert_eq!(attribute(span, HTTP_REQUEST_METHOD).as_deref(), Some("GET"));
        assert_eq!(attribute(span, URL_PATH).as_deref(), Some("/pay"));
        assert_eq!(
            attribute(span, HTTP_RESPONSE_STATUS_CODE).as_deref(),
            Some("200")
        );
        assert_eq!(span.status, Status::Unset);
    }

    #[tokio::test]
    async fn server_errors_mark_span_as_failed() {
        let h = harness();
        let service = h.telemetry.http_layer("checkout").layer(respond_with(503));

        service
            .oneshot(Request::get("/pay").body(()).unwrap())
            .await
            .unwrap();

        let spans = h.spans.get_finished_spans().unwrap();
        assert!(matches!(spans[0].status, Status::Error { .. }));
    }

    #[tokio::test]
    async fn inner_errors_are_forwarded() {
        let h = harness();
        let failing = tower::service_fn(|_req: Request<()>| async {
            Err::<Response<()>, _>(std::io::Error::other("backend unavailable"))
        });
        let service = h.telemetry.http_layer("checkout").layer(failing);

        let err = service
            .oneshot(Request::get("/pay").body(()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "backend unavailable");

        let spans = h.spans.get_finished_spans().unwrap();
        assert!(matches!(spans[0].status, Status::Error { .. }));
    }

    #[tokio::test]
    async fn request_duration_is_recorded() {
        let h = harness();
        let service = h.telemetry.http_layer("checkout").layer(respond_with(200));

        service
            .oneshot(Request::get("/pay").body(()).unwrap())
            .await
            .unwrap();
        h.telemetry.force_flush().unwrap();

        let names: Vec<String> = h
            .metrics
            .get_finished_metrics()
            .unwrap()
            .iter()
            .flat_map(|rm| rm.scope_metrics.iter())
            .flat_map(|sm| sm.metrics.iter())
            .map(|m| m.name.to_string())
            .collect();
        assert!(names.contains(&REQUEST_DURATION.to_string()));
    }

    #[tokio::test]
    async fn incoming_trace_context_becomes_parent() {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        let h = harness();
        let service = h.telemetry.http_layer("checkout").layer(respond_with(200));

        let request = Request::get("/pay")
            .header(
                "traceparent",
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )
            .body(())
            .unwrap();
        service.oneshot(request).await.unwrap();

        let spans = h.spans.get_finished_spans().unwrap();
        assert_eq!(
            spans[0].parent_span_id,
            SpanId::from_hex("00f067aa0ba902b7").unwrap()
        );
    }

    #[tokio::test]
    async fn absent_handle_passes_requests_through() {
        let telemetry: Option<Telemetry> = None;
        let service = HttpLayer::new(&telemetry, "checkout").layer(respond_with(204));

        let response = service
            .oneshot(Request::get("/pay").body(()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
    }
}
