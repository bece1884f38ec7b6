use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::{to_bytes, Body},
    extract::{Query, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use stock_relay::{
    config::{Config, DashboardConfig, ProviderConfig},
    router,
    structs::{HistoryPoint, StockSnapshot},
    AppState,
};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
enum Behavior {
    Respond { quote: Value, intraday: Value },
    Status(StatusCode),
    Delay(Duration),
    Garbage,
}

#[derive(Clone)]
struct MockProvider {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl MockProvider {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<HashMap<String, String>> {
        self.seen.lock().unwrap().clone()
    }

    async fn spawn(&self) -> SocketAddr {
        let app = Router::new()
            .route("/query", get(provider_query))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

async fn provider_query(
    State(mock): State<MockProvider>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    mock.calls.fetch_add(1, Ordering::SeqCst);
    let function = params.get("function").cloned().unwrap_or_default();
    mock.seen.lock().unwrap().push(params);

    match mock.behavior {
        Behavior::Respond { quote, intraday } => match function.as_str() {
            "GLOBAL_QUOTE" => Json(quote).into_response(),
            "TIME_SERIES_INTRADAY" => Json(intraday).into_response(),
            _ => StatusCode::BAD_REQUEST.into_response(),
        },
        Behavior::Status(status) => status.into_response(),
        Behavior::Delay(delay) => {
            tokio::time::sleep(delay).await;
            Json(json!({})).into_response()
        }
        Behavior::Garbage => "<html>not json</html>".into_response(),
    }
}

fn tcs_quote() -> Value {
    json!({
        "Global Quote": {
            "01. symbol": "TCS.NS",
            "05. price": "3500.25",
            "07. latest trading day": "2024-01-01"
        }
    })
}

fn tcs_intraday() -> Value {
    json!({
        "Meta Data": {
            "2. Symbol": "TCS.NS",
            "3. Last Refreshed": "2024-01-01 09:15:00",
            "6. Time Zone": "Asia/Kolkata"
        },
        "Time Series (5min)": {
            "2024-01-01 09:15:00": { "4. close": "3498.00" },
            "2024-01-01 09:10:00": { "4. close": "3497.50" }
        }
    })
}

fn config_for(addr: Option<SocketAddr>, api_key: Option<&str>, timeout: Duration) -> Config {
    Config {
        port: 0,
        provider: ProviderConfig {
            api_key: api_key.map(str::to_string),
            base_url: match addr {
                Some(addr) => format!("http://{addr}/query"),
                None => "http://127.0.0.1:9/query".to_string(),
            },
            timeout,
        },
        dashboard: DashboardConfig::default(),
    }
}

async fn app_with(mock: &MockProvider, api_key: Option<&str>, timeout: Duration) -> Router {
    let addr = mock.spawn().await;
    router(AppState::new(&config_for(Some(addr), api_key, timeout)).unwrap())
}

async fn get_path(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get_path(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// Captures formatted log lines for the current thread.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

// `count` of the latency histogram series with exactly these labels.
fn observed_count(text: &str, method: &str, route: &str, code: &str) -> Option<u64> {
    text.lines()
        .filter(|line| line.starts_with("http_request_duration_ms_count{"))
        .find(|line| {
            line.contains(&format!("method=\"{method}\""))
                && line.contains(&format!("route=\"{route}\""))
                && line.contains(&format!("code=\"{code}\""))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|count| count.parse().ok())
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn end_to_end_snapshot_is_merged_and_sorted() {
    let mock = MockProvider::new(Behavior::Respond {
        quote: tcs_quote(),
        intraday: tcs_intraday(),
    });
    let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

    let (status, body) = get_json(&app, "/stock/TCS.NS").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "symbol": "TCS.NS",
            "currentPrice": 3500.25,
            "history": [
                { "time": "2024-01-01 09:10:00", "price": 3497.5 },
                { "time": "2024-01-01 09:15:00", "price": 3498.0 }
            ]
        })
    );
    assert_eq!(mock.calls(), 2);

    let snapshot: StockSnapshot = serde_json::from_value(body).unwrap();
    assert_eq!(snapshot.symbol(), "TCS.NS");
    assert_eq!(snapshot.current_price(), 3500.25);
    assert_eq!(
        snapshot.history().data(),
        &[
            HistoryPoint::new("2024-01-01 09:10:00", 3497.5),
            HistoryPoint::new("2024-01-01 09:15:00", 3498.0),
        ]
    );
}

#[tokio::test]
async fn null_series_section_is_empty_history() {
    let mock = MockProvider::new(Behavior::Respond {
        quote: json!({ "Global Quote": null }),
        intraday: json!({ "Time Series (5min)": null }),
    });
    let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

    let (status, body) = get_json(&app, "/stock/TCS.NS").await;
    assert_eq!(status, StatusCode::OK);

    let snapshot: StockSnapshot = serde_json::from_value(body).unwrap();
    assert_eq!(snapshot.current_price(), 0.0);
    assert!(snapshot.history().is_empty());
}

#[tokio::test]
async fn outbound_queries_carry_symbol_key_and_interval() {
    let mock = MockProvider::new(Behavior::Respond {
        quote: tcs_quote(),
        intraday: tcs_intraday(),
    });
    let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

    let (status, body) = get_json(&app, "/stock/M%26M.NS").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbol"], "M&M.NS");

    let seen = mock.seen();
    assert_eq!(seen.len(), 2);
    for params in &seen {
        assert_eq!(params["symbol"], "M&M.NS");
        assert_eq!(params["apikey"], "test-key");
    }
    let intraday = seen
        .iter()
        .find(|p| p["function"] == "TIME_SERIES_INTRADAY")
        .unwrap();
    assert_eq!(intraday["interval"], "5min");
    assert_eq!(intraday["outputsize"], "compact");
    assert!(seen.iter().any(|p| p["function"] == "GLOBAL_QUOTE"));
}

#[tokio::test]
async fn history_is_strictly_ascending() {
    let mock = MockProvider::new(Behavior::Respond {
        quote: tcs_quote(),
        intraday: json!({
            "Time Series (5min)": {
                "2024-01-02 09:15:00": { "4. close": "4" },
                "2024-01-01 15:25:00": { "4. close": "3" },
                "2024-01-01 09:20:00": { "4. close": "2" },
                "2024-01-01 09:15:00": { "4. close": "1" },
                "2024-01-02 09:20:00": { "4. close": "5" }
            }
        }),
    });
    let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

    let (status, body) = get_json(&app, "/stock/INFY.NS").await;
    assert_eq!(status, StatusCode::OK);

    let history = body["history"].as_array().unwrap();
    let prices: Vec<f64> = history.iter().map(|p| p["price"].as_f64().unwrap()).collect();
    assert_eq!(prices, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    let times: Vec<&str> = history.iter().map(|p| p["time"].as_str().unwrap()).collect();
    assert!(times.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn missing_or_bad_quote_price_is_zero() {
    for quote in [
        json!({}),
        json!({ "Global Quote": {} }),
        json!({ "Global Quote": { "05. price": "not-a-number" } }),
    ] {
        let mock = MockProvider::new(Behavior::Respond {
            quote,
            intraday: tcs_intraday(),
        });
        let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

        let (status, body) = get_json(&app, "/stock/TCS.NS").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentPrice"], json!(0.0));
        assert_eq!(body["history"].as_array().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn missing_api_key_makes_no_outbound_call() {
    let mock = MockProvider::new(Behavior::Respond {
        quote: tcs_quote(),
        intraday: tcs_intraday(),
    });
    let app = app_with(&mock, None, TIMEOUT).await;

    let (status, body) = get_json(&app, "/stock/TCS.NS").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "API key not configured" }));
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn provider_timeout_is_500_and_logged() {
    let (logs, _guard) = capture_logs();
    let mock = MockProvider::new(Behavior::Delay(Duration::from_secs(3)));
    let app = app_with(&mock, Some("test-key"), Duration::from_millis(200)).await;

    let (status, body) = get_json(&app, "/stock/TCS.NS").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to fetch from provider" }));
    let logged = logs.contents();
    assert!(logged.contains("failed to fetch from provider"), "{logged}");
    assert!(!logged.contains("test-key"), "{logged}");
}

#[tokio::test]
async fn provider_error_status_is_500_and_logged() {
    let (logs, _guard) = capture_logs();
    let mock = MockProvider::new(Behavior::Status(StatusCode::SERVICE_UNAVAILABLE));
    let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

    let (status, body) = get_json(&app, "/stock/TCS.NS").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to fetch from provider" }));
    assert!(logs.contents().contains("503"));
}

#[tokio::test]
async fn malformed_provider_body_is_500() {
    let mock = MockProvider::new(Behavior::Garbage);
    let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

    let (status, body) = get_json(&app, "/stock/TCS.NS").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to fetch from provider" }));
}

#[tokio::test]
async fn unreachable_provider_is_500() {
    let app = router(
        AppState::new(&config_for(None, Some("test-key"), Duration::from_secs(2))).unwrap(),
    );

    let (status, body) = get_json(&app, "/stock/TCS.NS").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to fetch from provider" }));
}

#[tokio::test]
async fn health_is_ok_regardless_of_provider() {
    let mock = MockProvider::new(Behavior::Status(StatusCode::INTERNAL_SERVER_ERROR));
    let app = app_with(&mock, None, TIMEOUT).await;

    let (status, body) = get_json(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn metrics_record_every_prior_route() {
    let mock = MockProvider::new(Behavior::Respond {
        quote: tcs_quote(),
        intraday: tcs_intraday(),
    });
    let app = app_with(&mock, Some("test-key"), TIMEOUT).await;

    get_path(&app, "/health").await;
    get_path(&app, "/health").await;
    get_path(&app, "/stock/TCS.NS").await;
    get_path(&app, "/stock/INFY.NS").await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let text = String::from_utf8(
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec(),
    )
    .unwrap();

    assert_eq!(observed_count(&text, "GET", "/health", "200"), Some(2));
    assert_eq!(observed_count(&text, "GET", "/stock/{symbol}", "200"), Some(2));
    assert!(text.contains("le=\"2000\""));
}

#[tokio::test]
async fn metrics_label_failed_stock_requests_with_500() {
    let mock = MockProvider::new(Behavior::Garbage);
    let app = app_with(&mock, None, TIMEOUT).await;

    get_path(&app, "/stock/TCS.NS").await;
    let (_, body) = get_path(&app, "/metrics").await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(observed_count(&text, "GET", "/stock/{symbol}", "500"), Some(1));
}

#[tokio::test]
async fn dashboard_is_served_with_runtime_settings() {
    let mut config = config_for(None, None, TIMEOUT);
    config.dashboard = DashboardConfig {
        api_base: "http://relay.example".to_string(),
        refresh: Duration::from_secs(15),
    };
    let app = router(AppState::new(&config).unwrap());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let page = String::from_utf8(
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec(),
    )
    .unwrap();
    assert!(page.contains(r#"const API_BASE = "http://relay.example";"#));
    assert!(page.contains("const REFRESH_MS = 15000;"));
    // stale responses are dropped unless they belong to the latest request
    assert!(page.contains("const request = ++latestRequest;"));
    assert!(page.contains("if (request !== latestRequest) return;"));
}
