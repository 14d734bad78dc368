use crate::models::*;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Terminal Trait
// ---------------------------------------------------------------------------

/// Errors raised by a terminal call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TerminalError {
    #[error("Terminal not connected")]
    NotConnected,
    /// The terminal ran the call and reported a failure (its "last error").
    #[error("Terminal call failed ({code}): {message}")]
    Call { code: i32, message: String },
    #[error("Terminal request timed out")]
    Timeout,
    #[error("Terminal I/O error: {0}")]
    Io(String),
    #[error("Terminal protocol error: {0}")]
    Protocol(String),
}

impl TerminalError {
    /// Numeric code reported by the terminal, when there is one.
    pub fn code(&self) -> Option<i32> {
        match self {
            TerminalError::Call { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Primitive calls offered by a MetaTrader-style trading terminal.
///
/// Implementations perform one blocking round-trip per call; none of them
/// retry. Reconnect policy lives in the session that owns the terminal.
#[async_trait]
pub trait Terminal: Send {
    /// Attach to the terminal process, optionally at an install path.
    async fn initialize(&mut self, path: Option<&str>) -> Result<(), TerminalError>;

    /// Authenticate against the trade server.
    async fn login(&mut self, account: u64, password: &str, server: &str)
        -> Result<(), TerminalError>;

    /// Detach from the terminal process.
    async fn shutdown(&mut self) -> Result<(), TerminalError>;

    /// Terminal status; an error means there is no usable session.
    async fn terminal_info(&mut self) -> Result<TerminalInfo, TerminalError>;

    async fn account_info(&mut self) -> Result<AccountInfo, TerminalError>;

    /// Every symbol the terminal knows, in terminal order.
    async fn symbols(&mut self) -> Result<Vec<SymbolInfo>, TerminalError>;

    /// `Ok(None)` when the symbol does not exist.
    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, TerminalError>;

    /// Show (or hide) a symbol in Market Watch. Returns whether it succeeded.
    async fn symbol_select(&mut self, symbol: &str, enable: bool) -> Result<bool, TerminalError>;

    /// `Ok(None)` when no quote is available.
    async fn symbol_tick(&mut self, symbol: &str) -> Result<Option<Quote>, TerminalError>;

    /// Field names of the most recent M1 rate record for a symbol.
    /// Empty when no rates are available.
    async fn rate_fields(&mut self, symbol: &str) -> Result<Vec<String>, TerminalError>;

    /// Submit a trade request. An error here is a transport-level failure;
    /// broker rejections come back as a [`TradeResult`] with a non-done retcode.
    async fn order_send(&mut self, request: &TradeRequest) -> Result<TradeResult, TerminalError>;

    async fn positions(&mut self, filter: &PositionFilter) -> Result<Vec<Position>, TerminalError>;
}

#[async_trait]
impl<T: Terminal + ?Sized> Terminal for Box<T> {
    async fn initialize(&mut self, path: Option<&str>) -> Result<(), TerminalError> {
        (**self).initialize(path).await
    }

    async fn login(
        &mut self,
        account: u64,
        password: &str,
        server: &str,
    ) -> Result<(), TerminalError> {
        (**self).login(account, password, server).await
    }

    async fn shutdown(&mut self) -> Result<(), TerminalError> {
        (**self).shutdown().await
    }

    async fn terminal_info(&mut self) -> Result<TerminalInfo, TerminalError> {
        (**self).terminal_info().await
    }

    async fn account_info(&mut self) -> Result<AccountInfo, TerminalError> {
        (**self).account_info().await
    }

    async fn symbols(&mut self) -> Result<Vec<SymbolInfo>, TerminalError> {
        (**self).symbols().await
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, TerminalError> {
        (**self).symbol_info(symbol).await
    }

    async fn symbol_select(&mut self, symbol: &str, enable: bool) -> Result<bool, TerminalError> {
        (**self).symbol_select(symbol, enable).await
    }

    async fn symbol_tick(&mut self, symbol: &str) -> Result<Option<Quote>, TerminalError> {
        (**self).symbol_tick(symbol).await
    }

    async fn rate_fields(&mut self, symbol: &str) -> Result<Vec<String>, TerminalError> {
        (**self).rate_fields(symbol).await
    }

    async fn order_send(&mut self, request: &TradeRequest) -> Result<TradeResult, TerminalError> {
        (**self).order_send(request).await
    }

    async fn positions(&mut self, filter: &PositionFilter) -> Result<Vec<Position>, TerminalError> {
        (**self).positions(filter).await
    }
}
