//! The terminal session adapter.
//!
//! [`TerminalSession`] owns one [`Terminal`] and turns trade intents into
//! terminal requests. Every public operation first checks connectivity and
//! reconnects at most once; failures come back as [`TradeError`] values or
//! empty results, never as panics.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use tvbridge_core::*;

use crate::config::{MetaTraderConfig, TradingConfig};
use crate::symbols::{similar_symbols, SymbolMapper};

/// Pairs whose broker variations are logged after connecting.
const COMMON_PAIRS: [&str; 3] = ["EURUSD", "GBPUSD", "USDJPY"];

/// Connectivity state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A trade the caller wants opened.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    /// Symbol as the alert names it; the broker suffix is added as needed.
    pub symbol: String,
    pub side: Side,
    /// Lots; must be positive.
    pub volume: Decimal,
    /// Accepted for compatibility; orders always execute at market.
    pub price: Option<Decimal>,
    /// Accepted for compatibility; not attached to the order.
    pub stop_loss: Option<Decimal>,
    /// Accepted for compatibility; not attached to the order.
    pub take_profit: Option<Decimal>,
    pub comment: String,
    /// Close every open position on the symbol before opening.
    pub close_existing: bool,
}

impl TradeIntent {
    /// A market order with the default comment that flattens the symbol first.
    pub fn market(symbol: &str, side: Side, volume: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            volume,
            price: None,
            stop_loss: None,
            take_profit: None,
            comment: TradingConfig::default().default_comment,
            close_existing: true,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn keep_existing(mut self) -> Self {
        self.close_existing = false;
        self
    }
}

/// An owned session with a trading terminal.
///
/// Construction ([`TerminalSession::open`]) connects; [`TerminalSession::close`]
/// tears down. Operations take `&mut self` and perform no locking: callers
/// sharing a session must serialize access themselves.
pub struct TerminalSession<T: Terminal> {
    terminal: T,
    config: MetaTraderConfig,
    trading: TradingConfig,
    mapper: SymbolMapper,
    state: ConnectionState,
    volume_field: Option<VolumeField>,
    /// Logical symbol -> broker-qualified symbol.
    symbol_cache: HashMap<String, String>,
}

impl<T: Terminal> TerminalSession<T> {
    /// Create a session and connect it. A failed connect is logged and leaves
    /// the session disconnected; the next operation retries once.
    pub async fn open(terminal: T, config: MetaTraderConfig, trading: TradingConfig) -> Self {
        let mapper = SymbolMapper::new(config.symbol_suffix.clone());
        let mut session = Self {
            terminal,
            config,
            trading,
            mapper,
            state: ConnectionState::Disconnected,
            volume_field: None,
            symbol_cache: HashMap::new(),
        };
        if let Err(e) = session.connect().await {
            error!(error = %e, "Initial terminal connection failed");
        }
        session
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Volume field detected when the session last connected.
    pub fn volume_field(&self) -> Option<VolumeField> {
        self.volume_field
    }

    pub fn trading(&self) -> &TradingConfig {
        &self.trading
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Attach, log in and probe the terminal.
    pub async fn connect(&mut self) -> Result<(), TerminalError> {
        self.state = ConnectionState::Connecting;
        match self.establish().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<(), TerminalError> {
        if let Err(e) = self.terminal.initialize(self.config.path.as_deref()).await {
            error!(error = %e, "Terminal initialize failed");
            return Err(e);
        }

        if let Err(e) = self
            .terminal
            .login(self.config.account, &self.config.password, &self.config.server)
            .await
        {
            error!(account = self.config.account, error = %e, "Terminal login failed");
            if let Err(shutdown_err) = self.terminal.shutdown().await {
                debug!(error = %shutdown_err, "Shutdown after failed login also failed");
            }
            return Err(e);
        }

        match self.terminal.account_info().await {
            Ok(account) => info!(
                account = account.login,
                server = %account.server,
                balance = %account.balance,
                leverage = %format!("1:{}", account.leverage),
                "Connected to terminal"
            ),
            Err(_) => info!("Connected to terminal but couldn't retrieve account info"),
        }

        self.volume_field = match self.detect_volume_field().await {
            Ok(field) => field,
            Err(e) => {
                warn!(error = %e, "Error checking rate fields");
                None
            }
        };

        self.log_symbol_overview().await;
        Ok(())
    }

    /// Probe a liquid instrument to learn which rate field carries volume.
    async fn detect_volume_field(&mut self) -> Result<Option<VolumeField>, TerminalError> {
        let symbols = self.terminal.symbols().await?;
        let Some(first) = symbols.first() else {
            warn!("No symbols found in terminal");
            return Ok(None);
        };

        let mut candidates = vec![self.mapper.to_broker(&self.config.probe_symbol)];
        if !candidates.contains(&self.config.probe_symbol) {
            candidates.push(self.config.probe_symbol.clone());
        }

        let mut probe = None;
        for candidate in candidates {
            if self.terminal.symbol_select(&candidate, true).await? {
                probe = Some(candidate);
                break;
            }
        }
        let probe = match probe {
            Some(symbol) => symbol,
            None => {
                let symbol = first.name.clone();
                self.terminal.symbol_select(&symbol, true).await?;
                symbol
            }
        };

        let fields = self.terminal.rate_fields(&probe).await?;
        if fields.is_empty() {
            warn!(symbol = %probe, "Couldn't retrieve sample data");
            return Ok(None);
        }
        info!(symbol = %probe, fields = ?fields, "Terminal rate fields");

        let field = VolumeField::detect(&fields);
        if field.is_none() {
            warn!("Neither 'volume' nor 'tick_volume' field found in rate data");
        }
        Ok(field)
    }

    async fn log_symbol_overview(&mut self) {
        let Ok(symbols) = self.terminal.symbols().await else {
            return;
        };
        if symbols.is_empty() {
            return;
        }
        info!(total = symbols.len(), "Symbols available");
        for pair in COMMON_PAIRS {
            let matches: Vec<&str> = symbols
                .iter()
                .map(|s| s.name.as_str())
                .filter(|name| name.contains(pair))
                .collect();
            if !matches.is_empty() {
                info!(pair, variations = ?matches, "Found symbol variations");
            }
        }
    }

    /// Verify the session; reconnect once if it was lost.
    async fn ensure_connected(&mut self) -> Result<(), TradeError> {
        if self.state == ConnectionState::Connected {
            match self.terminal.terminal_info().await {
                Ok(info) if info.connected => return Ok(()),
                _ => {}
            }
        }

        warn!("Terminal connection lost, attempting to reconnect");
        self.state = ConnectionState::Disconnected;
        self.connect().await.map_err(|e| TradeError::NotConnected {
            reason: e.to_string(),
        })
    }

    /// Shut the terminal down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Connected {
            if let Err(e) = self.terminal.shutdown().await {
                warn!(error = %e, "Terminal shutdown failed");
            }
            info!("Terminal connection closed");
        }
        self.state = ConnectionState::Disconnected;
        self.symbol_cache.clear();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Names of every symbol the terminal knows. Empty on failure.
    pub async fn list_symbols(&mut self) -> Vec<String> {
        if self.ensure_connected().await.is_err() {
            return Vec::new();
        }
        match self.terminal.symbols().await {
            Ok(symbols) => symbols.into_iter().map(|s| s.name).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list symbols");
                Vec::new()
            }
        }
    }

    /// Account snapshot, or `None` when unavailable.
    pub async fn account_info(&mut self) -> Option<AccountInfo> {
        self.ensure_connected().await.ok()?;
        match self.terminal.account_info().await {
            Ok(account) => Some(account),
            Err(e) => {
                warn!(error = %e, "Failed to get account info");
                None
            }
        }
    }

    /// Terminal status, or `None` when unavailable.
    pub async fn terminal_info(&mut self) -> Option<TerminalInfo> {
        self.ensure_connected().await.ok()?;
        self.terminal.terminal_info().await.ok()
    }

    /// Open positions, optionally for one symbol. Symbols are reported without
    /// the broker suffix; the terminal's name is kept in `broker_symbol`.
    /// Empty on no match or failure.
    pub async fn get_positions(&mut self, symbol: Option<&str>) -> Vec<Position> {
        if self.ensure_connected().await.is_err() {
            return Vec::new();
        }

        let filter = match symbol {
            Some(symbol) => PositionFilter::Symbol {
                symbol: self.broker_symbol(symbol),
            },
            None => PositionFilter::All,
        };

        let positions = match self.terminal.positions(&filter).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Failed to get positions");
                return Vec::new();
            }
        };

        positions
            .into_iter()
            .map(|mut position| {
                if let Some(logical) = self.mapper.to_logical(&position.symbol) {
                    let logical = logical.to_string();
                    position.broker_symbol = Some(std::mem::replace(&mut position.symbol, logical));
                }
                position
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Trading
    // -----------------------------------------------------------------------

    /// Open a market position.
    pub async fn place_trade(&mut self, intent: &TradeIntent) -> Result<OrderFill, TradeError> {
        self.ensure_connected().await?;

        if intent.volume <= Decimal::ZERO {
            return Err(TradeError::InvalidVolume {
                volume: intent.volume,
            });
        }

        if intent.close_existing {
            info!(symbol = %intent.symbol, "Closing existing positions before placing new order");
            match self.close_all_positions(Some(intent.symbol.as_str()), None).await {
                Ok(summary) => info!(result = %summary.message(), "Close result"),
                Err(e) => warn!(error = %e, "Close result"),
            }
            tokio::time::sleep(self.trading.settle_delay()).await;
        }

        if intent.price.is_some() || intent.stop_loss.is_some() || intent.take_profit.is_some() {
            debug!("Price, stop loss and take profit are ignored for market orders");
        }

        let broker_symbol = self.broker_symbol(&intent.symbol);
        if broker_symbol != intent.symbol {
            info!(symbol = %intent.symbol, broker_symbol = %broker_symbol, "Adding suffix");
        }
        self.ensure_tradeable(&intent.symbol, &broker_symbol).await?;

        let quote = self.quote(&broker_symbol).await?;
        info!(symbol = %broker_symbol, bid = %quote.bid, ask = %quote.ask, "Current prices");
        let price = quote.price_for(intent.side);

        let request = TradeRequest::market(
            &broker_symbol,
            intent.side,
            intent.volume,
            price,
            self.trading.stamp(),
            &intent.comment,
        );
        let result = self.submit(&request).await?;

        info!(
            symbol = %intent.symbol,
            side = %intent.side,
            volume = %intent.volume,
            deal = result.deal,
            "Order executed successfully"
        );
        Ok(OrderFill {
            symbol: intent.symbol.clone(),
            broker_symbol,
            side: intent.side,
            volume: intent.volume,
            price,
            result,
        })
    }

    /// Close one position, fully (`volume = None`) or partially. Never closes
    /// more than the position holds.
    pub async fn close_position(
        &mut self,
        ticket: u64,
        volume: Option<Decimal>,
    ) -> Result<CloseFill, TradeError> {
        self.ensure_connected().await?;

        let position = match self.terminal.positions(&PositionFilter::Ticket { ticket }).await {
            Ok(positions) => positions.into_iter().next(),
            Err(e) => {
                warn!(ticket, error = %e, "Failed to look up position");
                None
            }
        }
        .ok_or(TradeError::PositionNotFound { ticket })?;

        let volume_to_close = match volume {
            None => position.volume,
            Some(requested) => requested.min(position.volume),
        };
        if volume_to_close <= Decimal::ZERO {
            return Err(TradeError::InvalidVolume {
                volume: volume_to_close,
            });
        }
        info!(
            ticket,
            total_volume = %position.volume,
            closing_volume = %volume_to_close,
            "Closing position"
        );

        let quote = self.quote(&position.symbol).await?;
        // Closing sells a long at the bid and buys back a short at the ask.
        let price = quote.price_for(position.side.opposite());
        let request = TradeRequest::close(
            &position,
            volume_to_close,
            price,
            self.trading.stamp(),
            &self.trading.close_comment,
        );
        let result = self.submit(&request).await?;

        info!(ticket, volume_closed = %volume_to_close, "Position closed successfully");
        let symbol = self
            .mapper
            .to_logical(&position.symbol)
            .unwrap_or(&position.symbol)
            .to_string();
        Ok(CloseFill {
            ticket,
            symbol,
            volume_closed: volume_to_close,
            result,
        })
    }

    /// Close every open position, optionally for one symbol. A total
    /// `close_volume` is split evenly across the matching positions.
    pub async fn close_all_positions(
        &mut self,
        symbol: Option<&str>,
        close_volume: Option<Decimal>,
    ) -> Result<CloseAllSummary, TradeError> {
        self.ensure_connected().await?;

        let positions = self.get_positions(symbol).await;
        let mut summary = CloseAllSummary {
            symbol: symbol.map(str::to_string),
            attempts: Vec::with_capacity(positions.len()),
        };
        if positions.is_empty() {
            return Ok(summary);
        }

        let per_position = split_close_volume(close_volume, positions.len());
        if let (Some(total), Some(each)) = (close_volume, per_position) {
            if positions.len() > 1 {
                info!(
                    total = %total,
                    positions = positions.len(),
                    each = %each,
                    "Splitting close volume across positions"
                );
            }
        }

        for position in positions {
            let outcome = self.close_position(position.ticket, per_position).await;
            summary.attempts.push(CloseAttempt {
                ticket: position.ticket,
                requested_volume: per_position,
                outcome,
            });
        }

        info!(
            symbol = symbol.unwrap_or("*"),
            closed = summary.closed_count(),
            failed = summary.failed_count(),
            total_volume_closed = %summary.total_volume_closed(),
            "Close all finished"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Broker-qualified name for a logical symbol, cached.
    fn broker_symbol(&mut self, symbol: &str) -> String {
        if let Some(cached) = self.symbol_cache.get(symbol) {
            return cached.clone();
        }
        let broker = self.mapper.to_broker(symbol);
        self.symbol_cache.insert(symbol.to_string(), broker.clone());
        broker
    }

    /// The symbol must exist and be selected in Market Watch.
    async fn ensure_tradeable(&mut self, symbol: &str, broker_symbol: &str) -> Result<(), TradeError> {
        let info = match self.terminal.symbol_info(broker_symbol).await {
            Ok(info) => info,
            Err(e) => {
                warn!(symbol = %broker_symbol, error = %e, "Symbol lookup failed");
                None
            }
        };

        let Some(info) = info else {
            let known = self.terminal.symbols().await.unwrap_or_default();
            let similar = similar_symbols(symbol, known.iter().map(|s| s.name.as_str()));
            error!(symbol = %broker_symbol, similar = ?similar, "Symbol not found");
            self.symbol_cache.remove(symbol);
            return Err(TradeError::SymbolNotFound {
                symbol: broker_symbol.to_string(),
                similar,
            });
        };

        if !info.visible {
            info!(symbol = %broker_symbol, "Symbol is not visible, trying to add it");
            if !self.terminal.symbol_select(broker_symbol, true).await.unwrap_or(false) {
                return Err(TradeError::SymbolUnavailable {
                    symbol: broker_symbol.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn quote(&mut self, broker_symbol: &str) -> Result<Quote, TradeError> {
        match self.terminal.symbol_tick(broker_symbol).await {
            Ok(Some(quote)) => Ok(quote),
            Ok(None) => Err(TradeError::NoMarketData {
                symbol: broker_symbol.to_string(),
            }),
            Err(e) => {
                warn!(symbol = %broker_symbol, error = %e, "Failed to get tick");
                Err(TradeError::NoMarketData {
                    symbol: broker_symbol.to_string(),
                })
            }
        }
    }

    /// Send a request; only a done return code is a success.
    async fn submit(&mut self, request: &TradeRequest) -> Result<TradeResult, TradeError> {
        info!(
            symbol = %request.symbol,
            side = %request.side,
            volume = %request.volume,
            price = %request.price,
            position = ?request.position,
            "Sending order"
        );

        let result = match self.terminal.order_send(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Order failed");
                return Err(TradeError::transport(&e));
            }
        };

        if !result.is_done() {
            error!(retcode = result.retcode, details = ?result, "Order failed");
            return Err(TradeError::Rejected {
                retcode: result.retcode,
                details: result,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tvbridge_brokers_common::SimulatedTerminal;
    use tvbridge_core::retcode;

    fn config(suffix: &str) -> MetaTraderConfig {
        MetaTraderConfig {
            account: 12345678,
            password: "secret".to_string(),
            server: "Demo-Server".to_string(),
            symbol_suffix: suffix.to_string(),
            ..Default::default()
        }
    }

    async fn session_with(terminal: SimulatedTerminal, suffix: &str) -> TerminalSession<SimulatedTerminal> {
        TerminalSession::open(terminal, config(suffix), TradingConfig::default()).await
    }

    /// Majors quoted with EURUSD at 1.1048 / 1.1050.
    fn eurusd_terminal(suffix: &str) -> SimulatedTerminal {
        SimulatedTerminal::with_majors(suffix)
    }

    fn order_sends(session: &TerminalSession<SimulatedTerminal>) -> &[TradeRequest] {
        session.terminal().sent_requests()
    }

    #[tokio::test]
    async fn test_open_connects_and_detects_volume_field() {
        let session = session_with(SimulatedTerminal::with_majors(""), "").await;
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.volume_field(), Some(VolumeField::TickVolume));
    }

    #[tokio::test]
    async fn test_volume_field_prefers_volume_and_tolerates_absence() {
        let mut terminal = SimulatedTerminal::with_majors("");
        terminal.set_rate_fields(&["time", "close", "tick_volume", "volume"]);
        let session = session_with(terminal, "").await;
        assert_eq!(session.volume_field(), Some(VolumeField::Volume));

        let mut terminal = SimulatedTerminal::with_majors("");
        terminal.set_rate_fields(&["time", "close"]);
        let session = session_with(terminal, "").await;
        assert!(session.is_connected());
        assert_eq!(session.volume_field(), None);
    }

    #[tokio::test]
    async fn test_failed_login_shuts_down() {
        let mut terminal = SimulatedTerminal::with_majors("");
        terminal.fail_login(true);
        let session = session_with(terminal, "").await;

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.terminal().is_attached());
        let calls: Vec<&str> = session.terminal().calls().iter().map(|c| c.call).collect();
        assert_eq!(calls, vec!["initialize", "login", "shutdown"]);
    }

    #[tokio::test]
    async fn test_reconnects_once_after_session_loss() {
        let mut session = session_with(SimulatedTerminal::with_majors(""), "").await;
        session.terminal_mut().drop_session();

        assert_eq!(session.list_symbols().await.len(), 4);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_failed_reconnect_returns_structured_failure() {
        let mut session = session_with(SimulatedTerminal::with_majors(""), "").await;
        session.terminal_mut().drop_session();
        session.terminal_mut().fail_initialize(true);

        assert!(session.list_symbols().await.is_empty());
        assert!(session.get_positions(None).await.is_empty());
        let err = session
            .place_trade(&TradeIntent::market("EURUSD", Side::Buy, dec!(0.1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(!err.to_string().is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);

        let err = session.close_position(100_001, None).await.unwrap_err();
        assert!(matches!(err, TradeError::NotConnected { .. }));
        let err = session.close_all_positions(Some("EURUSD"), None).await.unwrap_err();
        assert!(matches!(err, TradeError::NotConnected { .. }));
        assert!(session.terminal().sent_requests().is_empty());

        // One initialize per operation: no retry loop
        let initializes = session
            .terminal()
            .calls()
            .iter()
            .filter(|c| c.call == "initialize")
            .count();
        assert_eq!(initializes, 6);
    }

    #[tokio::test]
    async fn test_get_positions_applies_and_strips_suffix() {
        let mut terminal = eurusd_terminal(".r");
        terminal.open_position("EURUSD.r", Side::Buy, dec!(0.5), dec!(1.1000));
        terminal.open_position("GBPUSD", Side::Sell, dec!(0.2), dec!(1.2700));
        let mut session = session_with(terminal, ".r").await;

        let positions = session.get_positions(Some("EURUSD")).await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "EURUSD");
        assert_eq!(positions[0].broker_symbol.as_deref(), Some("EURUSD.r"));

        let queried = session.terminal().calls().iter().rev().find(|c| c.call == "positions").unwrap();
        assert_eq!(queried.symbol.as_deref(), Some("EURUSD.r"));

        let all = session.get_positions(None).await;
        assert_eq!(all.len(), 2);
        let gbp = all.iter().find(|p| p.symbol == "GBPUSD").unwrap();
        assert_eq!(gbp.broker_symbol, None);

        assert!(session.get_positions(Some("USDJPY")).await.is_empty());
    }

    #[tokio::test]
    async fn test_place_trade_buys_at_ask() {
        let mut session = session_with(eurusd_terminal(""), "").await;
        let fill = session
            .place_trade(&TradeIntent::market("EURUSD", Side::Buy, dec!(0.1)))
            .await
            .unwrap();

        assert_eq!(fill.price, dec!(1.1050));
        assert_eq!(fill.message(), "Order executed: BUY EURUSD");
        let sent = order_sends(&session);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].price, dec!(1.1050));
        assert_eq!(sent[0].side, Side::Buy);
        assert_eq!(sent[0].volume, dec!(0.1));
        assert_eq!(sent[0].deviation, 30);
        assert_eq!(sent[0].magic, 234000);
        assert_eq!(sent[0].comment, "TV Signal");
        assert_eq!(sent[0].type_filling, OrderFilling::Ioc);
        assert_eq!(sent[0].type_time, OrderTime::Gtc);
    }

    #[tokio::test]
    async fn test_place_trade_sells_at_bid_with_suffix() {
        let mut session = session_with(eurusd_terminal(".r"), ".r").await;
        let intent = TradeIntent::market("EURUSD", Side::Sell, dec!(0.2)).keep_existing();
        let fill = session.place_trade(&intent).await.unwrap();

        assert_eq!(fill.broker_symbol, "EURUSD.r");
        assert_eq!(fill.symbol, "EURUSD");
        assert_eq!(order_sends(&session)[0].symbol, "EURUSD.r");
        assert_eq!(order_sends(&session)[0].price, dec!(1.1048));
    }

    #[tokio::test]
    async fn test_unknown_symbol_never_reaches_order_send() {
        let mut session = session_with(eurusd_terminal(""), "").await;
        let err = session
            .place_trade(&TradeIntent::market("XYZUSD", Side::Buy, dec!(0.1)))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not found"));
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(order_sends(&session).is_empty());
    }

    #[tokio::test]
    async fn test_hidden_symbol_is_selected_or_fails() {
        let terminal = SimulatedTerminal::with_majors("")
            .with_hidden_symbol("NZDUSD", dec!(0.6010), dec!(0.6012));
        let mut session = session_with(terminal, "").await;
        let intent = TradeIntent::market("NZDUSD", Side::Buy, dec!(0.1)).keep_existing();
        assert!(session.place_trade(&intent).await.is_ok());

        let mut terminal = SimulatedTerminal::with_majors("")
            .with_hidden_symbol("NZDUSD", dec!(0.6010), dec!(0.6012));
        terminal.lock_symbol("NZDUSD");
        let mut session = session_with(terminal, "").await;
        let err = session.place_trade(&intent).await.unwrap_err();
        assert_eq!(err, TradeError::SymbolUnavailable { symbol: "NZDUSD".to_string() });
        assert!(order_sends(&session).is_empty());
    }

    #[tokio::test]
    async fn test_missing_quote_is_a_failure() {
        let mut session = session_with(eurusd_terminal(""), "").await;
        session.terminal_mut().clear_quote("EURUSD");
        let intent = TradeIntent::market("EURUSD", Side::Buy, dec!(0.1)).keep_existing();

        let err = session.place_trade(&intent).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to get market data for EURUSD");
    }

    #[tokio::test]
    async fn test_non_positive_volume_is_rejected_before_sending() {
        let mut session = session_with(eurusd_terminal(""), "").await;
        let err = session
            .place_trade(&TradeIntent::market("EURUSD", Side::Buy, dec!(0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(order_sends(&session).is_empty());
    }

    #[tokio::test]
    async fn test_broker_rejection_and_transport_failure() {
        let mut session = session_with(eurusd_terminal(""), "").await;
        let intent = TradeIntent::market("EURUSD", Side::Buy, dec!(0.1)).keep_existing();

        session.terminal_mut().reject_next_order(retcode::NO_MONEY);
        let err = session.place_trade(&intent).await.unwrap_err();
        match &err {
            TradeError::Rejected { retcode: code, details } => {
                assert_eq!(*code, retcode::NO_MONEY);
                assert_eq!(details.retcode, retcode::NO_MONEY);
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        session.terminal_mut().fail_next_order(-10004, "No IPC connection");
        let err = session.place_trade(&intent).await.unwrap_err();
        assert!(matches!(err, TradeError::Transport { code: Some(-10004), .. }));
        assert!(err.to_string().contains("No IPC connection"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_existing_settles_before_resolving_symbol() {
        let mut terminal = eurusd_terminal("");
        terminal.open_position("EURUSD", Side::Sell, dec!(0.3), dec!(1.1060));
        let mut session = session_with(terminal, "").await;

        session
            .place_trade(&TradeIntent::market("EURUSD", Side::Buy, dec!(0.1)))
            .await
            .unwrap();

        let sent = order_sends(&session);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].position, Some(100_001));
        assert_eq!(sent[1].position, None);

        let calls = session.terminal().calls();
        let close_at = calls.iter().find(|c| c.call == "order_send").unwrap().at;
        let resolve_at = calls.iter().find(|c| c.call == "symbol_info").unwrap().at;
        assert!(resolve_at >= close_at + Duration::from_millis(500));

        let open = session.terminal().open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].side, Side::Buy);
    }

    #[tokio::test]
    async fn test_close_position_full_and_capped() {
        let mut terminal = eurusd_terminal("");
        let long = terminal.open_position("EURUSD", Side::Buy, dec!(0.5), dec!(1.1000));
        let short = terminal.open_position("EURUSD", Side::Sell, dec!(0.4), dec!(1.1100));
        let mut session = session_with(terminal, "").await;

        let fill = session.close_position(long, Some(dec!(2))).await.unwrap();
        assert_eq!(fill.volume_closed, dec!(0.5));
        let request = order_sends(&session).last().unwrap().clone();
        assert_eq!(request.side, Side::Sell);
        assert_eq!(request.price, dec!(1.1048));
        assert_eq!(request.comment, "Close position");

        let fill = session.close_position(short, None).await.unwrap();
        assert_eq!(fill.volume_closed, dec!(0.4));
        assert_eq!(fill.message(), format!("Position {} closed (Volume: 0.4)", short));
        let request = order_sends(&session).last().unwrap().clone();
        assert_eq!(request.side, Side::Buy);
        assert_eq!(request.price, dec!(1.1050));

        assert!(session.terminal().open_positions().is_empty());
    }

    #[tokio::test]
    async fn test_close_position_partial_and_missing() {
        let mut terminal = eurusd_terminal("");
        let ticket = terminal.open_position("EURUSD", Side::Buy, dec!(0.5), dec!(1.1000));
        let mut session = session_with(terminal, "").await;

        let fill = session.close_position(ticket, Some(dec!(0.2))).await.unwrap();
        assert_eq!(fill.volume_closed, dec!(0.2));
        assert_eq!(session.terminal().open_positions()[0].volume, dec!(0.3));

        let err = session.close_position(999, None).await.unwrap_err();
        assert_eq!(err, TradeError::PositionNotFound { ticket: 999 });
    }

    #[tokio::test]
    async fn test_close_all_splits_volume_evenly() {
        let mut terminal = eurusd_terminal("");
        terminal.open_position("EURUSD", Side::Buy, dec!(0.5), dec!(1.1000));
        terminal.open_position("EURUSD", Side::Buy, dec!(0.5), dec!(1.1010));
        terminal.open_position("GBPUSD", Side::Buy, dec!(1.0), dec!(1.2700));
        let mut session = session_with(terminal, "").await;

        let summary = session
            .close_all_positions(Some("EURUSD"), Some(dec!(0.6)))
            .await
            .unwrap();

        assert!(summary.success());
        assert_eq!(summary.closed_count(), 2);
        assert_eq!(summary.failed_count(), 0);
        assert_eq!(summary.total_volume_closed(), dec!(0.6));
        let volumes: Vec<Decimal> = order_sends(&session).iter().map(|r| r.volume).collect();
        assert_eq!(volumes, vec![dec!(0.3), dec!(0.3)]);
        assert!(summary.attempts.iter().all(|a| a.requested_volume == Some(dec!(0.3))));
    }

    #[tokio::test]
    async fn test_close_all_split_ignores_position_sizes() {
        let mut terminal = eurusd_terminal("");
        terminal.open_position("EURUSD", Side::Buy, dec!(0.1), dec!(1.1000));
        terminal.open_position("EURUSD", Side::Buy, dec!(0.9), dec!(1.1000));
        let mut session = session_with(terminal, "").await;

        let summary = session
            .close_all_positions(Some("EURUSD"), Some(dec!(0.8)))
            .await
            .unwrap();

        // 0.4 each, capped at 0.1 for the small position
        let closed: Vec<Decimal> = summary
            .attempts
            .iter()
            .map(|a| a.outcome.as_ref().unwrap().volume_closed)
            .collect();
        assert_eq!(closed, vec![dec!(0.1), dec!(0.4)]);
        assert_eq!(summary.total_volume_closed(), dec!(0.5));
    }

    #[tokio::test]
    async fn test_close_all_reports_partial_failure() {
        let mut terminal = eurusd_terminal("");
        terminal.open_position("EURUSD", Side::Buy, dec!(0.5), dec!(1.1000));
        terminal.open_position("EURUSD", Side::Buy, dec!(0.5), dec!(1.1010));
        terminal.reject_next_order(retcode::MARKET_CLOSED);
        let mut session = session_with(terminal, "").await;

        let summary = session.close_all_positions(None, None).await.unwrap();
        assert!(!summary.success());
        assert_eq!(summary.closed_count(), 1);
        assert_eq!(summary.failed_count(), 1);
        assert_eq!(summary.closed_count() + summary.failed_count(), summary.attempts.len());
        assert_eq!(summary.total_volume_closed(), dec!(0.5));
        assert_eq!(summary.message(), "Closed 1 positions, 1 failed");
    }

    #[tokio::test]
    async fn test_close_all_with_nothing_open() {
        let mut session = session_with(eurusd_terminal(""), "").await;
        let summary = session.close_all_positions(Some("EURUSD"), None).await.unwrap();
        assert!(summary.success());
        assert_eq!(summary.message(), "No positions to close");
    }

    #[tokio::test]
    async fn test_close_session() {
        let mut session = session_with(eurusd_terminal(""), "").await;
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.terminal().is_attached());

        session.close().await;
        let shutdowns = session
            .terminal()
            .calls()
            .iter()
            .filter(|c| c.call == "shutdown")
            .count();
        assert_eq!(shutdowns, 1);
    }
}
