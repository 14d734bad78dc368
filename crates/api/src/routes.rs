use crate::envelope::{respond, Envelope};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use tvbridge_brokers_metatrader::TradeIntent;
use tvbridge_core::Side;
use uuid::Uuid;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Alerts
        .route("/webhook", post(webhook))
        .route("/trade", post(webhook))
        // Positions
        .route("/positions", get(list_positions))
        .route("/positions/{ticket}/close", post(close_position))
        .route("/close", post(close_volume))
        // Terminal
        .route("/symbols", get(list_symbols))
        .route("/account", get(account))
        // Health
        .route("/health", get(health_check))
}

fn bad_request(message: impl Into<String>) -> Response {
    respond((StatusCode::BAD_REQUEST, Envelope::failure(message)))
}

fn not_connected() -> Response {
    respond((
        StatusCode::SERVICE_UNAVAILABLE,
        Envelope::failure("Terminal not connected"),
    ))
}

/// Read a decimal from a JSON number or numeric string.
fn lenient_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Alert payload as sent by a charting platform webhook.
#[derive(Debug, Default, Deserialize)]
struct AlertPayload {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    action: String,
    volume: Option<Value>,
    comment: Option<String>,
    stop_loss: Option<Value>,
    take_profit: Option<Value>,
    close_existing: Option<bool>,
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AlertPayload>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let alert = match payload {
        Ok(Json(alert)) => alert,
        Err(e) => {
            warn!(%request_id, error = %e, "Rejected webhook body");
            return bad_request("No data received");
        }
    };
    if alert.symbol.is_empty() || alert.action.is_empty() {
        return bad_request("Missing required fields: symbol, action");
    }

    let requested_volume = alert.volume.as_ref().and_then(lenient_decimal);
    let volume = requested_volume.unwrap_or(state.trading.default_volume);
    info!(
        %request_id,
        action = %alert.action,
        volume = %volume,
        symbol = %alert.symbol,
        "Received webhook"
    );

    let action = alert.action.to_lowercase();
    if action == "close" {
        let close_volume = requested_volume.filter(|v| *v > Decimal::ZERO);
        let result = state
            .session
            .lock()
            .await
            .close_all_positions(Some(alert.symbol.as_str()), close_volume)
            .await;
        return respond(Envelope::from_close_all(&result));
    }

    let side = match Side::from_str(&action) {
        Ok(side) => side,
        Err(_) => {
            warn!(%request_id, action = %alert.action, "Unknown action");
            return bad_request(format!("Unknown action: {}", alert.action));
        }
    };

    let mut intent = TradeIntent::market(&alert.symbol, side, volume)
        .with_comment(alert.comment.unwrap_or_else(|| state.trading.default_comment.clone()));
    intent.stop_loss = alert.stop_loss.as_ref().and_then(lenient_decimal);
    intent.take_profit = alert.take_profit.as_ref().and_then(lenient_decimal);
    intent.close_existing = alert.close_existing.unwrap_or(state.trading.close_existing);

    let result = state.session.lock().await.place_trade(&intent).await;
    if let Err(e) = &result {
        warn!(%request_id, error = %e, "Failed to process order");
    }
    respond(Envelope::from_order(&result))
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PositionsQuery {
    symbol: Option<String>,
}

async fn list_positions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PositionsQuery>,
) -> Response {
    let mut session = state.session.lock().await;
    let positions = session.get_positions(query.symbol.as_deref()).await;
    if !session.is_connected() {
        return not_connected();
    }
    let envelope = Envelope::ok(format!("{} open positions", positions.len()))
        .with("positions", &positions);
    respond((StatusCode::OK, envelope))
}

#[derive(Debug, Default, Deserialize)]
struct ClosePositionBody {
    volume: Option<Decimal>,
}

async fn close_position(
    State(state): State<Arc<AppState>>,
    Path(ticket): Path<u64>,
    payload: Result<Json<ClosePositionBody>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        // No body: close the whole position
        Err(JsonRejection::MissingJsonContentType(_)) => ClosePositionBody::default(),
        Err(e) => return bad_request(e.body_text()),
    };
    if let Some(volume) = body.volume.filter(|v| *v <= Decimal::ZERO) {
        return bad_request(format!("Invalid volume: {}", volume));
    }

    let result = state
        .session
        .lock()
        .await
        .close_position(ticket, body.volume)
        .await;
    respond(Envelope::from_close(&result))
}

#[derive(Debug, Default, Deserialize)]
struct CloseVolumeBody {
    #[serde(default)]
    symbol: String,
    volume: Option<Value>,
}

/// Close a total volume across every position on a symbol.
async fn close_volume(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CloseVolumeBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return bad_request("No data received");
    };
    let volume = body
        .volume
        .as_ref()
        .and_then(lenient_decimal)
        .filter(|v| *v > Decimal::ZERO);
    let Some(volume) = volume.filter(|_| !body.symbol.is_empty()) else {
        return bad_request("Missing required fields: symbol, volume");
    };

    let result = state
        .session
        .lock()
        .await
        .close_all_positions(Some(body.symbol.as_str()), Some(volume))
        .await;
    respond(Envelope::from_close_all(&result))
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

async fn list_symbols(State(state): State<Arc<AppState>>) -> Response {
    let mut session = state.session.lock().await;
    let symbols = session.list_symbols().await;
    if !session.is_connected() {
        return not_connected();
    }
    let envelope = Envelope::ok(format!("{} symbols", symbols.len())).with("symbols", &symbols);
    respond((StatusCode::OK, envelope))
}

async fn account(State(state): State<Arc<AppState>>) -> Response {
    let mut session = state.session.lock().await;
    match session.account_info().await {
        Some(info) => respond((
            StatusCode::OK,
            Envelope::ok("Account info").with("account", &info),
        )),
        None if !session.is_connected() => not_connected(),
        None => respond((
            StatusCode::BAD_GATEWAY,
            Envelope::failure("Failed to get account info"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let terminal_status = if state.session.lock().await.is_connected() {
        "connected"
    } else {
        "disconnected"
    };
    Json(serde_json::json!({
        "status": "healthy",
        "terminal_status": terminal_status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
