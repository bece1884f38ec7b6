use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of a single `/stock/{symbol}` request.
///
/// Every variant maps to a 500 with a fixed message. The detailed reason is
/// only ever logged, never sent to the client.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("provider request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("provider responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("provider body could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RelayError {
    /// Message exposed in the `{"error": ...}` body.
    pub fn public_message(&self) -> &'static str {
        match self {
            RelayError::MissingApiKey => "API key not configured",
            _ => "Failed to fetch from provider",
        }
    }
}

// The request URL carries the API key, so it is stripped before the error is
// stored or logged.
impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Request(err.without_url())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.public_message() })),
        )
            .into_response()
    }
}

/// Invalid startup configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Anything that stops the server from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to set up metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[test]
pub fn test_upstream_errors_share_one_public_message() {
    let status = RelayError::Status(reqwest::StatusCode::BAD_GATEWAY);
    let decode = RelayError::Decode(serde_json::from_str::<u8>("x").unwrap_err());
    assert_eq!(status.public_message(), "Failed to fetch from provider");
    assert_eq!(decode.public_message(), "Failed to fetch from provider");
    assert_eq!(RelayError::MissingApiKey.public_message(), "API key not configured");
}

#[test]
pub fn test_error_renders_as_500_json() {
    let response = RelayError::MissingApiKey.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
