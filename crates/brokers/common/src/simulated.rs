use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::time::Instant;
use tvbridge_core::retcode;
use tvbridge_core::*;

/// Configuration for the simulated terminal (paper trading and tests).
#[derive(Debug, Clone)]
pub struct SimulatedTerminalConfig {
    /// Starting account balance.
    pub initial_balance: Decimal,
    pub currency: String,
    pub leverage: u32,
    /// Units per lot (for PnL calculation).
    pub contract_size: Decimal,
    /// Build number reported by `terminal_info`.
    pub build: u32,
}

impl Default for SimulatedTerminalConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::new(10_000, 0),
            currency: "USD".to_string(),
            leverage: 100,
            contract_size: Decimal::new(100_000, 0), // standard FX lot
            build: 4755,
        }
    }
}

/// One call made against the simulated terminal.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call: &'static str,
    pub symbol: Option<String>,
    pub at: Instant,
}

/// A scripted outcome for the next `order_send`.
#[derive(Debug, Clone)]
enum ScriptedSend {
    Reject(u32),
    Fail(TerminalError),
}

/// An in-memory trading terminal.
///
/// Fills market deals instantly at the request price, keeps positions and a
/// balance, and journals every call so tests can assert on ordering. Failures
/// (attach, login, lost session, rejected or failed submissions) can be
/// scripted.
pub struct SimulatedTerminal {
    config: SimulatedTerminalConfig,
    attached: bool,
    logged_in: bool,
    account: AccountInfo,
    symbols: Vec<SymbolInfo>,
    quotes: HashMap<String, Quote>,
    locked_symbols: HashSet<String>,
    rate_fields: Vec<String>,
    positions: Vec<Position>,
    next_ticket: u64,
    next_request_id: u64,
    sent: Vec<TradeRequest>,
    journal: Vec<CallRecord>,
    scripted_sends: VecDeque<ScriptedSend>,
    fail_initialize: bool,
    fail_login: bool,
}

impl SimulatedTerminal {
    pub fn new(config: SimulatedTerminalConfig) -> Self {
        let account = AccountInfo {
            login: 0,
            server: String::new(),
            name: "Simulated".to_string(),
            currency: config.currency.clone(),
            balance: config.initial_balance,
            equity: config.initial_balance,
            leverage: config.leverage,
        };
        Self {
            config,
            attached: false,
            logged_in: false,
            account,
            symbols: Vec::new(),
            quotes: HashMap::new(),
            locked_symbols: HashSet::new(),
            rate_fields: ["time", "open", "high", "low", "close", "tick_volume", "spread", "real_volume"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            positions: Vec::new(),
            next_ticket: 100_001,
            next_request_id: 1,
            sent: Vec::new(),
            journal: Vec::new(),
            scripted_sends: VecDeque::new(),
            fail_initialize: false,
            fail_login: false,
        }
    }

    /// A terminal quoting the major FX pairs and gold, named with `suffix`.
    pub fn with_majors(suffix: &str) -> Self {
        let majors = [
            ("EURUSD", Decimal::new(110_480, 5), Decimal::new(110_500, 5)),
            ("GBPUSD", Decimal::new(127_150, 5), Decimal::new(127_170, 5)),
            ("USDJPY", Decimal::new(149_510, 3), Decimal::new(149_530, 3)),
            ("XAUUSD", Decimal::new(235_010, 2), Decimal::new(235_040, 2)),
        ];
        majors.into_iter().fold(
            Self::new(SimulatedTerminalConfig::default()),
            |terminal, (name, bid, ask)| terminal.with_symbol(&format!("{name}{suffix}"), bid, ask),
        )
    }

    /// Add a symbol that is visible in Market Watch and quoted at `bid`/`ask`.
    pub fn with_symbol(mut self, name: &str, bid: Decimal, ask: Decimal) -> Self {
        self.add_symbol(name, bid, ask, true);
        self
    }

    /// Add a known symbol that must be selected before it can be traded.
    pub fn with_hidden_symbol(mut self, name: &str, bid: Decimal, ask: Decimal) -> Self {
        self.add_symbol(name, bid, ask, false);
        self
    }

    fn add_symbol(&mut self, name: &str, bid: Decimal, ask: Decimal, visible: bool) {
        self.symbols.push(SymbolInfo {
            name: name.to_string(),
            description: String::new(),
            visible,
            digits: bid.scale(),
            volume_min: Decimal::new(1, 2),
            volume_max: Decimal::new(100, 0),
            volume_step: Decimal::new(1, 2),
        });
        self.set_quote(name, bid, ask);
    }

    pub fn set_quote(&mut self, name: &str, bid: Decimal, ask: Decimal) {
        self.quotes.insert(
            name.to_string(),
            Quote {
                time: Utc::now(),
                bid,
                ask,
                last: bid,
            },
        );
    }

    /// Stop quoting a symbol.
    pub fn clear_quote(&mut self, name: &str) {
        self.quotes.remove(name);
    }

    /// Make selecting `name` in Market Watch fail.
    pub fn lock_symbol(&mut self, name: &str) {
        self.locked_symbols.insert(name.to_string());
    }

    pub fn set_rate_fields(&mut self, fields: &[&str]) {
        self.rate_fields = fields.iter().map(|f| f.to_string()).collect();
    }

    pub fn fail_initialize(&mut self, fail: bool) {
        self.fail_initialize = fail;
    }

    pub fn fail_login(&mut self, fail: bool) {
        self.fail_login = fail;
    }

    /// Simulate the terminal losing its session (crash, restart, network).
    pub fn drop_session(&mut self) {
        self.attached = false;
        self.logged_in = false;
    }

    /// Answer the next submission with `code` instead of filling it.
    pub fn reject_next_order(&mut self, code: u32) {
        self.scripted_sends.push_back(ScriptedSend::Reject(code));
    }

    /// Fail the next submission at the transport level.
    pub fn fail_next_order(&mut self, code: i32, message: &str) {
        self.scripted_sends.push_back(ScriptedSend::Fail(TerminalError::Call {
            code,
            message: message.to_string(),
        }));
    }

    /// Open a position directly, bypassing `order_send`. Returns its ticket.
    pub fn open_position(&mut self, symbol: &str, side: Side, volume: Decimal, price: Decimal) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.positions.push(Position {
            ticket,
            symbol: symbol.to_string(),
            broker_symbol: None,
            side,
            volume,
            price_open: price,
            price_current: price,
            profit: Decimal::ZERO,
            time: Utc::now(),
            magic: 0,
            comment: String::new(),
        });
        ticket
    }

    /// Requests passed to `order_send`, in order.
    pub fn sent_requests(&self) -> &[TradeRequest] {
        &self.sent
    }

    /// Every call made, in order.
    pub fn calls(&self) -> &[CallRecord] {
        &self.journal
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn record(&mut self, call: &'static str, symbol: Option<&str>) {
        self.journal.push(CallRecord {
            call,
            symbol: symbol.map(str::to_string),
            at: Instant::now(),
        });
    }

    fn ensure_session(&self) -> Result<(), TerminalError> {
        if self.attached && self.logged_in {
            Ok(())
        } else {
            Err(TerminalError::NotConnected)
        }
    }

    fn pnl(&self, position: &Position, exit_price: Decimal, volume: Decimal) -> Decimal {
        let price_diff = match position.side {
            Side::Buy => exit_price - position.price_open,
            Side::Sell => position.price_open - exit_price,
        };
        price_diff * volume * self.config.contract_size
    }

    /// Mark a position to the current quote: longs at the bid, shorts at the ask.
    fn mark(&self, position: &mut Position) {
        if let Some(quote) = self.quotes.get(&position.symbol) {
            position.price_current = quote.price_for(position.side.opposite());
            position.profit = self.pnl(position, position.price_current, position.volume);
        }
    }

    fn result(&mut self, request: &TradeRequest, code: u32, comment: &str) -> TradeResult {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let (bid, ask) = self
            .quotes
            .get(&request.symbol)
            .map(|q| (q.bid, q.ask))
            .unwrap_or_default();
        let filled = code == retcode::DONE;
        TradeResult {
            retcode: code,
            deal: if filled { request_id + 500_000 } else { 0 },
            order: if filled { request_id + 900_000 } else { 0 },
            volume: if filled { request.volume } else { Decimal::ZERO },
            price: if filled { request.price } else { Decimal::ZERO },
            bid,
            ask,
            comment: comment.to_string(),
            request_id,
        }
    }

    fn execute(&mut self, request: &TradeRequest) -> TradeResult {
        if !self.symbols.iter().any(|s| s.name == request.symbol) {
            return self.result(request, retcode::INVALID, "Invalid request");
        }
        if !self.quotes.contains_key(&request.symbol) {
            return self.result(request, retcode::PRICE_OFF, "No prices");
        }
        if request.volume <= Decimal::ZERO {
            return self.result(request, retcode::INVALID_VOLUME, "Invalid volume");
        }

        match request.position {
            Some(ticket) => {
                let Some(idx) = self.positions.iter().position(|p| p.ticket == ticket) else {
                    return self.result(request, retcode::POSITION_CLOSED, "Position doesn't exist");
                };
                let position = self.positions[idx].clone();
                if position.side == request.side {
                    return self.result(request, retcode::INVALID, "Invalid request");
                }
                if request.volume > position.volume {
                    return self.result(request, retcode::INVALID_VOLUME, "Invalid volume");
                }

                let pnl = self.pnl(&position, request.price, request.volume);
                self.account.balance += pnl;
                if request.volume == position.volume {
                    self.positions.remove(idx);
                } else {
                    self.positions[idx].volume -= request.volume;
                }
                tracing::debug!(ticket, volume = %request.volume, pnl = %pnl, "Simulated close");
            }
            None => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                self.positions.push(Position {
                    ticket,
                    symbol: request.symbol.clone(),
                    broker_symbol: None,
                    side: request.side,
                    volume: request.volume,
                    price_open: request.price,
                    price_current: request.price,
                    profit: Decimal::ZERO,
                    time: Utc::now(),
                    magic: request.magic,
                    comment: request.comment.clone(),
                });
                tracing::debug!(ticket, symbol = %request.symbol, side = %request.side, "Simulated open");
            }
        }

        self.result(request, retcode::DONE, "Request executed")
    }
}

#[async_trait]
impl Terminal for SimulatedTerminal {
    async fn initialize(&mut self, _path: Option<&str>) -> Result<(), TerminalError> {
        self.record("initialize", None);
        if self.fail_initialize {
            return Err(TerminalError::Call {
                code: -10003,
                message: "IPC initialize failed, MetaTrader 5 x64 not found".to_string(),
            });
        }
        self.attached = true;
        Ok(())
    }

    async fn login(
        &mut self,
        account: u64,
        _password: &str,
        server: &str,
    ) -> Result<(), TerminalError> {
        self.record("login", None);
        if !self.attached {
            return Err(TerminalError::NotConnected);
        }
        if self.fail_login {
            return Err(TerminalError::Call {
                code: -6,
                message: "Terminal: Authorization failed".to_string(),
            });
        }
        self.logged_in = true;
        self.account.login = account;
        self.account.server = server.to_string();
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TerminalError> {
        self.record("shutdown", None);
        self.attached = false;
        self.logged_in = false;
        Ok(())
    }

    async fn terminal_info(&mut self) -> Result<TerminalInfo, TerminalError> {
        self.record("terminal_info", None);
        if !self.attached {
            return Err(TerminalError::NotConnected);
        }
        Ok(TerminalInfo {
            connected: self.logged_in,
            trade_allowed: self.logged_in,
            build: self.config.build,
            name: "Simulated Terminal".to_string(),
        })
    }

    async fn account_info(&mut self) -> Result<AccountInfo, TerminalError> {
        self.record("account_info", None);
        self.ensure_session()?;
        let mut account = self.account.clone();
        let floating: Decimal = self
            .positions
            .iter()
            .cloned()
            .map(|mut p| {
                self.mark(&mut p);
                p.profit
            })
            .sum();
        account.equity = account.balance + floating;
        Ok(account)
    }

    async fn symbols(&mut self) -> Result<Vec<SymbolInfo>, TerminalError> {
        self.record("symbols", None);
        self.ensure_session()?;
        Ok(self.symbols.clone())
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, TerminalError> {
        self.record("symbol_info", Some(symbol));
        self.ensure_session()?;
        Ok(self.symbols.iter().find(|s| s.name == symbol).cloned())
    }

    async fn symbol_select(&mut self, symbol: &str, enable: bool) -> Result<bool, TerminalError> {
        self.record("symbol_select", Some(symbol));
        self.ensure_session()?;
        if self.locked_symbols.contains(symbol) {
            return Ok(false);
        }
        match self.symbols.iter_mut().find(|s| s.name == symbol) {
            Some(info) => {
                info.visible = enable;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn symbol_tick(&mut self, symbol: &str) -> Result<Option<Quote>, TerminalError> {
        self.record("symbol_tick", Some(symbol));
        self.ensure_session()?;
        Ok(self.quotes.get(symbol).cloned())
    }

    async fn rate_fields(&mut self, symbol: &str) -> Result<Vec<String>, TerminalError> {
        self.record("rate_fields", Some(symbol));
        self.ensure_session()?;
        if self.quotes.contains_key(symbol) {
            Ok(self.rate_fields.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn order_send(&mut self, request: &TradeRequest) -> Result<TradeResult, TerminalError> {
        self.record("order_send", Some(request.symbol.as_str()));
        self.ensure_session()?;
        self.sent.push(request.clone());

        match self.scripted_sends.pop_front() {
            Some(ScriptedSend::Fail(err)) => Err(err),
            Some(ScriptedSend::Reject(code)) => Ok(self.result(request, code, retcode::describe(code))),
            None => Ok(self.execute(request)),
        }
    }

    async fn positions(&mut self, filter: &PositionFilter) -> Result<Vec<Position>, TerminalError> {
        let symbol = match filter {
            PositionFilter::Symbol { symbol } => Some(symbol.as_str()),
            _ => None,
        };
        self.record("positions", symbol);
        self.ensure_session()?;

        let mut matches: Vec<Position> = self
            .positions
            .iter()
            .filter(|p| match filter {
                PositionFilter::All => true,
                PositionFilter::Symbol { symbol } => &p.symbol == symbol,
                PositionFilter::Ticket { ticket } => p.ticket == *ticket,
            })
            .cloned()
            .collect();
        for position in &mut matches {
            self.mark(position);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn logged_in() -> SimulatedTerminal {
        let mut terminal = SimulatedTerminal::with_majors("");
        terminal.initialize(None).await.unwrap();
        terminal.login(1234, "secret", "Demo-Server").await.unwrap();
        terminal
    }

    fn stamp() -> RequestStamp {
        RequestStamp { deviation: 30, magic: 234000 }
    }

    #[tokio::test]
    async fn test_calls_require_session() {
        let mut terminal = SimulatedTerminal::with_majors("");
        assert_eq!(terminal.symbols().await.unwrap_err(), TerminalError::NotConnected);
        assert!(terminal.terminal_info().await.is_err());

        terminal.initialize(None).await.unwrap();
        assert!(!terminal.terminal_info().await.unwrap().connected);
        terminal.login(1234, "secret", "Demo-Server").await.unwrap();
        assert!(terminal.terminal_info().await.unwrap().connected);
        assert_eq!(terminal.account_info().await.unwrap().login, 1234);

        terminal.drop_session();
        assert!(terminal.terminal_info().await.is_err());
    }

    #[tokio::test]
    async fn test_market_order_opens_and_closes_position() {
        let mut terminal = logged_in().await;
        let open = TradeRequest::market("EURUSD", Side::Buy, dec!(0.5), dec!(1.1050), stamp(), "test");
        let result = terminal.order_send(&open).await.unwrap();
        assert!(result.is_done());
        assert_eq!(result.volume, dec!(0.5));

        let positions = terminal.positions(&PositionFilter::All).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].price_current, dec!(1.1048));

        let close = TradeRequest::close(&positions[0], dec!(0.2), dec!(1.1048), stamp(), "close");
        assert!(terminal.order_send(&close).await.unwrap().is_done());
        assert_eq!(terminal.open_positions()[0].volume, dec!(0.3));

        // Closing more than is open is refused
        let close = TradeRequest::close(&positions[0], dec!(1), dec!(1.1048), stamp(), "close");
        let result = terminal.order_send(&close).await.unwrap();
        assert_eq!(result.retcode, retcode::INVALID_VOLUME);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let mut terminal = logged_in().await;
        terminal.reject_next_order(retcode::NO_MONEY);
        terminal.fail_next_order(-10004, "No IPC connection");

        let request = TradeRequest::market("EURUSD", Side::Sell, dec!(0.1), dec!(1.1048), stamp(), "test");
        let rejected = terminal.order_send(&request).await.unwrap();
        assert_eq!(rejected.retcode, retcode::NO_MONEY);
        assert!(terminal.order_send(&request).await.is_err());
        assert!(terminal.order_send(&request).await.unwrap().is_done());
        assert_eq!(terminal.sent_requests().len(), 3);
        assert_eq!(terminal.open_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_symbol_selection() {
        let mut terminal = SimulatedTerminal::new(SimulatedTerminalConfig::default())
            .with_hidden_symbol("EURUSD.r", dec!(1.1048), dec!(1.1050));
        terminal.initialize(None).await.unwrap();
        terminal.login(1, "", "").await.unwrap();

        assert!(!terminal.symbol_info("EURUSD.r").await.unwrap().unwrap().visible);
        assert!(terminal.symbol_select("EURUSD.r", true).await.unwrap());
        assert!(terminal.symbol_info("EURUSD.r").await.unwrap().unwrap().visible);
        assert!(!terminal.symbol_select("XYZUSD", true).await.unwrap());

        terminal.lock_symbol("EURUSD.r");
        assert!(!terminal.symbol_select("EURUSD.r", true).await.unwrap());
    }
}
