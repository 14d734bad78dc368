use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::retcode;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Direction of an order or position.
///
/// On the wire this is the terminal's order type (`BUY` / `SELL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an alert carries a direction we do not understand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid order type: {0}")]
pub struct ParseSideError(pub String);

impl FromStr for Side {
    type Err = ParseSideError;

    /// Accepts `buy`/`long` and `sell`/`short`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Ok(Side::Buy),
            "SELL" | "SHORT" => Ok(Side::Sell),
            _ => Err(ParseSideError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal / account / symbol snapshots
// ---------------------------------------------------------------------------

/// Status of the terminal process itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalInfo {
    /// Whether the terminal currently holds a session with the trade server.
    pub connected: bool,
    pub trade_allowed: bool,
    pub build: u32,
    pub name: String,
}

/// Snapshot of the logged-in trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub server: String,
    pub name: String,
    pub currency: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub leverage: u32,
}

/// A tradeable instrument as the terminal describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Broker-qualified name (e.g. `EURUSD.r`).
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Selected in Market Watch, i.e. enabled for quoting and trading.
    pub visible: bool,
    pub digits: u32,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub time: DateTime<Utc>,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

impl Quote {
    /// Price paid to open (or received to close) on the given side:
    /// buys execute at the ask, sells at the bid.
    pub fn price_for(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A broker-reported open trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    /// The terminal's own name for the symbol, kept when `symbol` has had the
    /// broker suffix stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_symbol: Option<String>,
    #[serde(rename = "type")]
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    pub profit: Decimal,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub magic: u64,
    #[serde(default)]
    pub comment: String,
}

impl Position {
    /// Name the terminal knows this position's instrument by.
    pub fn terminal_symbol(&self) -> &str {
        self.broker_symbol.as_deref().unwrap_or(&self.symbol)
    }
}

/// Which positions to enumerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum PositionFilter {
    All,
    Symbol { symbol: String },
    Ticket { ticket: u64 },
}

// ---------------------------------------------------------------------------
// Trade requests
// ---------------------------------------------------------------------------

/// Kind of trade operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    /// Immediate execution at the current market price.
    Deal,
}

/// How long an order stays in the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTime {
    Gtc,
    Day,
}

/// How an order is filled when the full volume is not available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderFilling {
    Fok,
    Ioc,
    Return,
}

/// Fixed per-deployment values stamped onto every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStamp {
    /// Maximum accepted slippage, in points.
    pub deviation: u32,
    /// Expert id identifying orders placed by this bridge.
    pub magic: u64,
}

/// A request handed to the terminal's order-submission call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub action: TradeAction,
    pub symbol: String,
    pub volume: Decimal,
    #[serde(rename = "type")]
    pub side: Side,
    pub price: Decimal,
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
    /// Ticket of the position being closed; absent when opening.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    pub type_time: OrderTime,
    pub type_filling: OrderFilling,
}

impl TradeRequest {
    /// Market deal opening a new position.
    pub fn market(
        symbol: &str,
        side: Side,
        volume: Decimal,
        price: Decimal,
        stamp: RequestStamp,
        comment: &str,
    ) -> Self {
        Self {
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            volume,
            side,
            price,
            deviation: stamp.deviation,
            magic: stamp.magic,
            comment: comment.to_string(),
            position: None,
            type_time: OrderTime::Gtc,
            type_filling: OrderFilling::Ioc,
        }
    }

    /// Market deal closing (part of) an existing position.
    pub fn close(
        position: &Position,
        volume: Decimal,
        price: Decimal,
        stamp: RequestStamp,
        comment: &str,
    ) -> Self {
        let mut request = Self::market(
            position.terminal_symbol(),
            position.side.opposite(),
            volume,
            price,
            stamp,
            comment,
        );
        request.position = Some(position.ticket);
        request
    }
}

/// The terminal's answer to an order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub retcode: u32,
    #[serde(default)]
    pub deal: u64,
    #[serde(default)]
    pub order: u64,
    pub volume: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub bid: Decimal,
    #[serde(default)]
    pub ask: Decimal,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub request_id: u64,
}

impl TradeResult {
    /// Only an explicit "done" counts as a fill.
    pub fn is_done(&self) -> bool {
        self.retcode == retcode::DONE
    }
}

// ---------------------------------------------------------------------------
// Volume field
// ---------------------------------------------------------------------------

/// Name the terminal uses for traded volume in rate records. Broker-dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeField {
    Volume,
    TickVolume,
}

impl VolumeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeField::Volume => "volume",
            VolumeField::TickVolume => "tick_volume",
        }
    }

    /// Picks `volume` if present, otherwise `tick_volume`.
    pub fn detect<S: AsRef<str>>(fields: &[S]) -> Option<Self> {
        [VolumeField::Volume, VolumeField::TickVolume]
            .into_iter()
            .find(|candidate| fields.iter().any(|f| f.as_ref() == candidate.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parsing() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("LONG".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!(" Sell ".parse::<Side>().unwrap(), Side::Sell);
        assert_eq!("short".parse::<Side>().unwrap(), Side::Sell);

        let err = "hold".parse::<Side>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid order type: hold");
    }

    #[test]
    fn test_quote_price_for_side() {
        let quote = Quote {
            time: Utc::now(),
            bid: dec!(1.1048),
            ask: dec!(1.1050),
            last: dec!(1.1049),
        };
        assert_eq!(quote.price_for(Side::Buy), dec!(1.1050));
        assert_eq!(quote.price_for(Side::Sell), dec!(1.1048));
    }

    #[test]
    fn test_close_request_inverts_side() {
        let position = Position {
            ticket: 42,
            symbol: "EURUSD".to_string(),
            broker_symbol: Some("EURUSD.r".to_string()),
            side: Side::Buy,
            volume: dec!(0.5),
            price_open: dec!(1.1000),
            price_current: dec!(1.1010),
            profit: dec!(50),
            time: Utc::now(),
            magic: 234000,
            comment: String::new(),
        };
        let stamp = RequestStamp { deviation: 30, magic: 234000 };
        let request = TradeRequest::close(&position, dec!(0.2), dec!(1.1008), stamp, "Close position");

        assert_eq!(request.symbol, "EURUSD.r");
        assert_eq!(request.side, Side::Sell);
        assert_eq!(request.position, Some(42));
        assert_eq!(request.type_filling, OrderFilling::Ioc);
        assert_eq!(request.type_time, OrderTime::Gtc);
    }

    #[test]
    fn test_volume_field_detection() {
        assert_eq!(
            VolumeField::detect(&["time", "open", "tick_volume", "volume"]),
            Some(VolumeField::Volume)
        );
        assert_eq!(
            VolumeField::detect(&["time", "close", "tick_volume"]),
            Some(VolumeField::TickVolume)
        );
        assert_eq!(VolumeField::detect(&["time", "close"]), None);
    }

    #[test]
    fn test_side_wire_names_match_display() {
        for side in [Side::Buy, Side::Sell] {
            let json = serde_json::to_value(side).unwrap();
            assert_eq!(json, side.as_str());
            assert_eq!(serde_json::from_value::<Side>(json).unwrap(), side);
        }
    }

    #[test]
    fn test_trade_request_wire_shape() {
        let stamp = RequestStamp { deviation: 30, magic: 234000 };
        let request = TradeRequest::market("EURUSD", Side::Buy, dec!(0.1), dec!(1.1050), stamp, "TV Signal");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["type"], "BUY");
        assert_eq!(json["action"], "deal");
        assert_eq!(json["type_filling"], "ioc");
        assert_eq!(json["price"], "1.1050");
        assert!(json.get("position").is_none());
    }
}
