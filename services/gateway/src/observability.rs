//! Logging, trace propagation, and Prometheus metrics for the gateway.
//!
//! Logs always go to stdout through the fmt layer, filtered by `RUST_LOG`
//! (default `info`). Spans are additionally exported over OTLP when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` names a collector. Every gateway metric is
//! listed in [`GATEWAY_METRICS`] and described on startup, so `/metrics`
//! carries HELP text before the first sample is recorded.
use axum::Router;
use axum::http::HeaderMap;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// `(name, kind, help)` for every metric the gateway records.
pub const GATEWAY_METRICS: &[(&str, MetricKind, &str)] = &[
    (
        "gatehouse_reconcile_events_total",
        MetricKind::Counter,
        "Outbox events handled by the reconcile controller, by kind and outcome",
    ),
    (
        "gatehouse_reconcile_user_failures_total",
        MetricKind::Counter,
        "Users whose workspace could not be reconciled during a group or full resync",
    ),
    (
        "gatehouse_group_sync_total",
        MetricKind::Counter,
        "Membership refreshes against the identity provider, by outcome",
    ),
    (
        "gatehouse_provider_requests_total",
        MetricKind::Counter,
        "Identity provider requests, by endpoint and outcome",
    ),
    (
        "gatehouse_workspaces_total",
        MetricKind::Gauge,
        "Power-user workspaces currently held by the resource store",
    ),
];

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static PROPAGATOR_INIT: OnceLock<()> = OnceLock::new();
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the tracing subscriber and the metrics recorder. Safe to call
/// more than once; later calls return the first recorder's handle.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    TRACING_INIT.get_or_init(|| {
        install_propagator();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match otlp_endpoint().and_then(|endpoint| build_tracer_provider(service_name, &endpoint)) {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                global::set_tracer_provider(provider);
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });

    let handle = METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .add_global_label("service", service_name)
                .install_recorder()
                .expect("install metrics recorder")
        })
        .clone();
    describe_metrics();
    handle
}

pub fn describe_metrics() {
    for (name, kind, help) in GATEWAY_METRICS {
        match kind {
            MetricKind::Counter => metrics::describe_counter!(*name, *help),
            MetricKind::Gauge => metrics::describe_gauge!(*name, *help),
        }
    }
}

/// The collector endpoint, when one is configured. Blank counts as unset.
fn otlp_endpoint() -> Option<String> {
    std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn build_tracer_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("otlp exporter disabled: {err}");
            return None;
        }
    };
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder_empty()
                    .with_attributes(resource_attributes(service_name))
                    .build(),
            )
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    if let Ok(instance) =
        std::env::var("GATEHOUSE_SERVICE_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"))
    {
        attrs.push(KeyValue::new("service.instance.id", instance));
    }
    attrs
}

fn install_propagator() {
    PROPAGATOR_INIT.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

/// W3C trace context carried by an inbound request, used as the parent of
/// its `http.request` span.
pub fn trace_context_from_headers(headers: &HeaderMap) -> opentelemetry::Context {
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

pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serves `/metrics` on its own listener until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}
