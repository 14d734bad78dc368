use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tvbridge_core::*;

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A call sent from the Rust client TO the MetaTrader bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub call: TerminalCall,
}

/// The bridge's answer to the request with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(flatten)]
    pub reply: TerminalReply,
}

/// Terminal primitives the bridge executes on our behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalCall {
    /// Attach to the terminal process.
    Initialize { path: Option<String> },
    /// Authenticate against the trade server.
    Login {
        account: u64,
        password: String,
        server: String,
    },
    /// Detach from the terminal process.
    Shutdown,
    TerminalInfo,
    AccountInfo,
    SymbolsGet,
    SymbolInfo { symbol: String },
    SymbolSelect { symbol: String, enable: bool },
    SymbolInfoTick { symbol: String },
    /// Field names of the latest M1 rate record.
    RateFields { symbol: String },
    OrderSend { request: TradeRequest },
    PositionsGet { filter: PositionFilter },
}

impl TerminalCall {
    pub fn name(&self) -> &'static str {
        match self {
            TerminalCall::Initialize { .. } => "initialize",
            TerminalCall::Login { .. } => "login",
            TerminalCall::Shutdown => "shutdown",
            TerminalCall::TerminalInfo => "terminal_info",
            TerminalCall::AccountInfo => "account_info",
            TerminalCall::SymbolsGet => "symbols_get",
            TerminalCall::SymbolInfo { .. } => "symbol_info",
            TerminalCall::SymbolSelect { .. } => "symbol_select",
            TerminalCall::SymbolInfoTick { .. } => "symbol_info_tick",
            TerminalCall::RateFields { .. } => "rate_fields",
            TerminalCall::OrderSend { .. } => "order_send",
            TerminalCall::PositionsGet { .. } => "positions_get",
        }
    }
}

/// Messages received FROM the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalReply {
    /// Sent once, unsolicited, when the bridge accepts a connection.
    Connected { version: String },
    /// The call succeeded and has nothing to return.
    Ack,
    Bool { value: bool },
    TerminalInfo { info: TerminalInfo },
    AccountInfo { info: AccountInfo },
    Symbols { symbols: Vec<SymbolInfo> },
    SymbolInfo { info: Option<SymbolInfo> },
    Tick { tick: Option<Quote> },
    RateFields { fields: Vec<String> },
    OrderResult { result: TradeResult },
    Positions { positions: Vec<Position> },
    /// The terminal reported a failure (its `last_error`).
    Error { code: i32, message: String },
}

impl TerminalReply {
    pub fn name(&self) -> &'static str {
        match self {
            TerminalReply::Connected { .. } => "connected",
            TerminalReply::Ack => "ack",
            TerminalReply::Bool { .. } => "bool",
            TerminalReply::TerminalInfo { .. } => "terminal_info",
            TerminalReply::AccountInfo { .. } => "account_info",
            TerminalReply::Symbols { .. } => "symbols",
            TerminalReply::SymbolInfo { .. } => "symbol_info",
            TerminalReply::Tick { .. } => "tick",
            TerminalReply::RateFields { .. } => "rate_fields",
            TerminalReply::OrderResult { .. } => "order_result",
            TerminalReply::Positions { .. } => "positions",
            TerminalReply::Error { .. } => "error",
        }
    }
}

/// Frame a message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &[u8]) -> Vec<u8> {
    let len = msg.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    framed
}

/// Read one length-prefixed frame body.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TerminalError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TerminalError::Io(format!("Read error: {}", e)))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TerminalError::Protocol(format!(
            "Frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TerminalError::Io(format!("Read error: {}", e)))?;
    Ok(body)
}
