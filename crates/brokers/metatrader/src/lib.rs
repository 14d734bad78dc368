//! MetaTrader 5 terminal adapter.
//!
//! [`BridgeTerminal`] talks to a bridge process running beside the MT5
//! terminal over a length-prefixed JSON socket protocol. [`TerminalSession`]
//! wraps any [`tvbridge_core::Terminal`] with connection management, symbol
//! suffix handling and the trade/close workflows.

pub mod client;
pub mod config;
pub mod protocol;
pub mod session;
pub mod symbols;

pub use client::BridgeTerminal;
pub use config::{BridgeConfig, MetaTraderConfig, TradingConfig};
pub use session::{ConnectionState, TerminalSession, TradeIntent};
pub use symbols::SymbolMapper;
