//! Trade server return codes reported by MetaTrader 5 for order submissions.

pub const REQUOTE: u32 = 10004;
pub const REJECT: u32 = 10006;
pub const CANCEL: u32 = 10007;
pub const PLACED: u32 = 10008;
/// Request completed: the only code treated as a fill.
pub const DONE: u32 = 10009;
pub const DONE_PARTIAL: u32 = 10010;
pub const ERROR: u32 = 10011;
pub const TIMEOUT: u32 = 10012;
pub const INVALID: u32 = 10013;
pub const INVALID_VOLUME: u32 = 10014;
pub const INVALID_PRICE: u32 = 10015;
pub const INVALID_STOPS: u32 = 10016;
pub const TRADE_DISABLED: u32 = 10017;
pub const MARKET_CLOSED: u32 = 10018;
pub const NO_MONEY: u32 = 10019;
pub const PRICE_CHANGED: u32 = 10020;
pub const PRICE_OFF: u32 = 10021;
pub const CONNECTION: u32 = 10031;
pub const INVALID_FILL: u32 = 10030;
pub const POSITION_CLOSED: u32 = 10036;

/// Short operator-facing description of a return code.
pub fn describe(code: u32) -> &'static str {
    match code {
        REQUOTE => "requote",
        REJECT => "request rejected",
        CANCEL => "request canceled by trader",
        PLACED => "order placed",
        DONE => "request completed",
        DONE_PARTIAL => "only part of the request was completed",
        ERROR => "request processing error",
        TIMEOUT => "request canceled by timeout",
        INVALID => "invalid request",
        INVALID_VOLUME => "invalid volume",
        INVALID_PRICE => "invalid price",
        INVALID_STOPS => "invalid stops",
        TRADE_DISABLED => "trade is disabled",
        MARKET_CLOSED => "market is closed",
        NO_MONEY => "not enough money",
        PRICE_CHANGED => "prices changed",
        PRICE_OFF => "no quotes to process the request",
        INVALID_FILL => "invalid order filling type",
        CONNECTION => "no connection with the trade server",
        POSITION_CLOSED => "position already closed",
        _ => "unknown return code",
    }
}
