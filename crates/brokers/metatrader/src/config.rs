use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tvbridge_core::RequestStamp;

/// Where the bridge process running beside MT5 listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host address (e.g. "127.0.0.1").
    pub host: String,
    /// Port the bridge is listening on.
    pub port: u16,
    /// Upper bound on a single request/response round-trip.
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
            request_timeout_secs: 10,
        }
    }
}

impl BridgeConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Account credentials and broker conventions for a MetaTrader 5 terminal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaTraderConfig {
    pub account: u64,
    pub password: String,
    pub server: String,
    /// Terminal install path (`terminal64.exe`); `None` lets the terminal
    /// locate itself.
    pub path: Option<String>,
    /// Suffix the broker appends to symbol names (e.g. ".r"). Empty for none.
    pub symbol_suffix: String,
    /// Liquid instrument used to probe rate record fields after connecting.
    pub probe_symbol: String,
    pub bridge: BridgeConfig,
}

impl Default for MetaTraderConfig {
    fn default() -> Self {
        Self {
            account: 0,
            password: String::new(),
            server: String::new(),
            path: None,
            symbol_suffix: String::new(),
            probe_symbol: "EURUSD".to_string(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl fmt::Debug for MetaTraderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaTraderConfig")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .field("path", &self.path)
            .field("symbol_suffix", &self.symbol_suffix)
            .field("probe_symbol", &self.probe_symbol)
            .field("bridge", &self.bridge)
            .finish()
    }
}

/// Fixed order policy applied to every request the session builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Lots traded when an alert does not say.
    pub default_volume: Decimal,
    /// Maximum slippage in points.
    pub deviation: u32,
    pub magic: u64,
    /// Pause between closing existing positions and opening a new one.
    pub settle_delay_ms: u64,
    pub default_comment: String,
    pub close_comment: String,
    /// Whether a new order flattens the symbol first when the alert does not say.
    pub close_existing: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            default_volume: Decimal::new(1, 2), // 0.01 lots
            deviation: 30,
            magic: 234000,
            settle_delay_ms: 500,
            default_comment: "TV Signal".to_string(),
            close_comment: "Close position".to_string(),
            close_existing: true,
        }
    }
}

impl TradingConfig {
    pub fn stamp(&self) -> RequestStamp {
        RequestStamp {
            deviation: self.deviation,
            magic: self.magic,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
