//! JSON envelope every endpoint answers with.
//!
//! `{"success": bool, "message": "...", "details": ..., ...extra}` where
//! `details` carries the raw broker payload (or the error) and extra keys hold
//! endpoint specific values such as `volume_closed`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tvbridge_core::*;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// HTTP status for a failed operation.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Connectivity => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Resolution => StatusCode::NOT_FOUND,
        ErrorKind::Submission => StatusCode::BAD_GATEWAY,
    }
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: None,
            extra: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    pub fn with_details<S: Serialize>(mut self, details: &S) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Add a top-level key next to `success` and `message`.
    pub fn with<S: Serialize>(mut self, key: &str, value: &S) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.extra.insert(key.to_string(), value);
        }
        self
    }

    pub fn from_error(err: &TradeError) -> (StatusCode, Self) {
        (
            status_for(err.kind()),
            Self::failure(err.to_string()).with_details(err),
        )
    }

    pub fn from_order(result: &Result<OrderFill, TradeError>) -> (StatusCode, Self) {
        match result {
            Ok(fill) => (
                StatusCode::OK,
                Self::ok(fill.message())
                    .with_details(&fill.result)
                    .with("symbol", &fill.symbol)
                    .with("broker_symbol", &fill.broker_symbol)
                    .with("price", &fill.price),
            ),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn from_close(result: &Result<CloseFill, TradeError>) -> (StatusCode, Self) {
        match result {
            Ok(fill) => (
                StatusCode::OK,
                Self::ok(fill.message())
                    .with_details(&fill.result)
                    .with("volume_closed", &fill.volume_closed),
            ),
            Err(e) => Self::from_error(e),
        }
    }

    /// A summary with any failed close is reported as a gateway error; the
    /// per-position results are in `details` either way.
    pub fn from_close_all(result: &Result<CloseAllSummary, TradeError>) -> (StatusCode, Self) {
        let summary = match result {
            Ok(summary) => summary,
            Err(e) => return Self::from_error(e),
        };

        let attempts: Vec<Value> = summary.attempts.iter().map(attempt_value).collect();
        let envelope = Envelope {
            success: summary.success(),
            ..Self::ok(summary.message())
        }
        .with_details(&attempts)
        .with("closed_count", &summary.closed_count())
        .with("failed_count", &summary.failed_count())
        .with("total_volume_closed", &summary.total_volume_closed());

        let status = if summary.success() {
            StatusCode::OK
        } else {
            StatusCode::BAD_GATEWAY
        };
        (status, envelope)
    }
}

fn attempt_value(attempt: &CloseAttempt) -> Value {
    let envelope = match &attempt.outcome {
        Ok(fill) => Envelope::ok(fill.message())
            .with_details(&fill.result)
            .with("volume_closed", &fill.volume_closed),
        Err(e) => Envelope::failure(e.to_string()).with_details(e),
    };
    let envelope = envelope
        .with("ticket", &attempt.ticket)
        .with("requested_volume", &attempt.requested_volume);
    serde_json::to_value(envelope).unwrap_or(Value::Null)
}

/// Render a `(status, envelope)` pair.
pub fn respond((status, envelope): (StatusCode, Envelope)) -> Response {
    (status, Json(envelope)).into_response()
}
