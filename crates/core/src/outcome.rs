//! Typed outcomes of session operations.
//!
//! Every public session operation returns one of these instead of raising:
//! a fill payload on success, a [`TradeError`] describing what went wrong
//! otherwise.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::*;
use crate::traits::TerminalError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Coarse classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Terminal unreachable or session invalid, even after one reconnect.
    Connectivity,
    /// The caller asked for something that can never succeed as stated.
    InvalidRequest,
    /// Unknown symbol, symbol that cannot be enabled, or missing position.
    Resolution,
    /// Transport failure on submission, or a non-done return code.
    Submission,
}

/// Why a session operation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum TradeError {
    #[error("Terminal connection failed: {reason}")]
    NotConnected { reason: String },

    #[error("Invalid volume: {volume}")]
    InvalidVolume { volume: Decimal },

    #[error("Symbol {symbol} not found")]
    SymbolNotFound {
        symbol: String,
        /// Known symbols sharing the requested base name.
        similar: Vec<String>,
    },

    #[error("Failed to select symbol {symbol}")]
    SymbolUnavailable { symbol: String },

    #[error("Failed to get market data for {symbol}")]
    NoMarketData { symbol: String },

    #[error("Position {ticket} not found")]
    PositionNotFound { ticket: u64 },

    /// The submission call itself failed; no result came back.
    #[error("Order failed. Error: {message}")]
    Transport { code: Option<i32>, message: String },

    /// The broker answered with a return code other than done.
    #[error("Order failed. Error code: {retcode} ({})", crate::retcode::describe(*retcode))]
    Rejected { retcode: u32, details: TradeResult },
}

impl TradeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradeError::NotConnected { .. } => ErrorKind::Connectivity,
            TradeError::InvalidVolume { .. } => ErrorKind::InvalidRequest,
            TradeError::SymbolNotFound { .. }
            | TradeError::SymbolUnavailable { .. }
            | TradeError::NoMarketData { .. }
            | TradeError::PositionNotFound { .. } => ErrorKind::Resolution,
            TradeError::Transport { .. } | TradeError::Rejected { .. } => ErrorKind::Submission,
        }
    }

    /// Wrap a failed submission call.
    pub fn transport(err: &TerminalError) -> Self {
        TradeError::Transport {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Raw broker payload attached to the failure, if any.
    pub fn details(&self) -> Option<&TradeResult> {
        match self {
            TradeError::Rejected { details, .. } => Some(details),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fills
// ---------------------------------------------------------------------------

/// A market order the broker filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderFill {
    /// Symbol as the caller named it.
    pub symbol: String,
    /// Symbol as the terminal traded it.
    pub broker_symbol: String,
    pub side: Side,
    pub volume: Decimal,
    /// Quote the request was priced at.
    pub price: Decimal,
    pub result: TradeResult,
}

impl OrderFill {
    pub fn message(&self) -> String {
        format!("Order executed: {} {}", self.side, self.symbol)
    }
}

/// A (partial) position close the broker filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseFill {
    pub ticket: u64,
    pub symbol: String,
    /// Never more than the position held when the close was sent.
    pub volume_closed: Decimal,
    pub result: TradeResult,
}

impl CloseFill {
    pub fn message(&self) -> String {
        format!("Position {} closed (Volume: {})", self.ticket, self.volume_closed)
    }
}

// ---------------------------------------------------------------------------
// Batch close
// ---------------------------------------------------------------------------

/// One position's share of a close-all.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseAttempt {
    pub ticket: u64,
    /// Volume asked for; `None` means the full position.
    pub requested_volume: Option<Decimal>,
    pub outcome: Result<CloseFill, TradeError>,
}

/// Aggregate of a close-all run. Counts and totals are derived from the
/// attempts, so `closed_count() + failed_count() == attempts.len()`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseAllSummary {
    pub symbol: Option<String>,
    pub attempts: Vec<CloseAttempt>,
}

impl CloseAllSummary {
    pub fn closed_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.outcome.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.outcome.is_err()).count()
    }

    pub fn total_volume_closed(&self) -> Decimal {
        self.attempts
            .iter()
            .filter_map(|a| a.outcome.as_ref().ok())
            .map(|fill| fill.volume_closed)
            .sum()
    }

    /// True only when no individual close failed.
    pub fn success(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn message(&self) -> String {
        if self.attempts.is_empty() {
            "No positions to close".to_string()
        } else {
            format!(
                "Closed {} positions, {} failed",
                self.closed_count(),
                self.failed_count()
            )
        }
    }
}

/// Per-position volume for a close-all: a requested total is split evenly
/// across the matching positions regardless of their individual sizes.
///
/// The share is not rounded to the symbol's volume step, so a split such as
/// 0.1 over three positions reaches the broker as 0.0333... lots and is
/// rejected there with an invalid-volume return code.
pub fn split_close_volume(total: Option<Decimal>, positions: usize) -> Option<Decimal> {
    match total {
        Some(volume) if positions > 1 => Some(volume / Decimal::from(positions)),
        other => other,
    }
}
