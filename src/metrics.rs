use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};

/// `route` label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

const REQUEST_DURATION: &str = "http_request_duration_ms";
const BUCKETS_MS: [f64; 8] = [50.0, 100.0, 200.0, 300.0, 400.0, 500.0, 1000.0, 2000.0];

/// Process-wide metrics registry. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    request_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(REQUEST_DURATION, "HTTP request latency in ms")
                .buckets(BUCKETS_MS.to_vec()),
            &["method", "route", "code"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        register_process_metrics(&registry)?;

        Ok(Self {
            registry,
            request_duration,
        })
    }

    pub fn observe(&self, method: &str, route: &str, code: u16, elapsed: Duration) {
        let code = code.to_string();
        self.request_duration
            .with_label_values(&[method, route, code.as_str()])
            .observe(elapsed.as_secs_f64() * 1000.0);
    }

    /// Text exposition of everything registered.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

#[cfg(target_os = "linux")]
fn register_process_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn register_process_metrics(_registry: &Registry) -> prometheus::Result<()> {
    Ok(())
}

/// Middleware observing the latency of every routed request.
pub async fn track_latency(State(metrics): State<Metrics>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());

    let response = next.run(request).await;

    metrics.observe(&method, &route, response.status().as_u16(), start.elapsed());
    response
}

#[test]
pub fn test_observation_shows_up_in_exposition() {
    let metrics = Metrics::new().unwrap();
    metrics.observe("GET", "/health", 200, Duration::from_millis(75));
    let text = metrics.render().unwrap();
    assert!(text.contains("# TYPE http_request_duration_ms histogram"));
    assert!(text.contains("le=\"100\""));
    assert!(text.contains("route=\"/health\""));
    assert!(text.contains("code=\"200\""));
}

#[test]
pub fn test_registries_are_independent() {
    let first = Metrics::new().unwrap();
    let second = Metrics::new().unwrap();
    first.observe("GET", "/health", 200, Duration::from_millis(1));
    assert!(!second.render().unwrap().contains("route=\"/health\""));
}

#[cfg(target_os = "linux")]
#[test]
pub fn test_process_metrics_are_exposed() {
    let text = Metrics::new().unwrap().render().unwrap();
    assert!(text.contains("process_start_time_seconds"));
}
