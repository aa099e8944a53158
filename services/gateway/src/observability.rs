//! Tracing and metrics setup for the gateway process.
//!
//! Logs go to stdout through an `EnvFilter`ed fmt layer. Spans are also
//! exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Inbound W3C
//! `traceparent` headers parent the `http.request` span built in
//! [`crate::app::with_tracing`]. Generation and OAuth2 counters land in one
//! process-wide Prometheus recorder rendered by [`metrics_router`].
use axum::Router;
use axum::http::HeaderMap;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::sync::{Once, OnceLock};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();
static SUBSCRIBER: Once = Once::new();
static PROPAGATOR: Once = Once::new();

/// Install the subscriber and the metrics recorder. Later calls only return
/// the existing recorder handle.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    SUBSCRIBER.call_once(|| {
        install_propagator();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let otlp = otlp_tracer(service_name).map(|provider| {
            tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()))
        });
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(otlp)
            .try_init();
    });
    install_metrics_recorder()
}

fn otlp_tracer(service_name: &str) -> Option<SdkTracerProvider> {
    std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT")?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder().with_tonic().build() {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("otlp exporter disabled: {err}");
            return None;
        }
    };
    let resource = Resource::builder_empty()
        .with_attributes([KeyValue::new("service.name", service_name.to_string())])
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn install_propagator() {
    PROPAGATOR.call_once(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

/// Remote parent carried by `traceparent`/`tracestate`, or an empty context.
pub fn trace_context_from_headers(headers: &HeaderMap) -> Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&Headers(headers)))
}

struct Headers<'a>(&'a HeaderMap);

impl Extractor for Headers<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// The process-wide Prometheus recorder.
pub fn install_metrics_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("a metrics recorder was already installed; /metrics will be empty");
            }
            handle
        })
        .clone()
}

pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || async move { handle.render() }))
}

/// Serve [`metrics_router`] on `listener` until `shutdown` resolves.
pub async fn serve_metrics<F>(
    handle: PrometheusHandle,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, metrics_router(handle))
        .with_graceful_shutdown(shutdown)
        .await
}
