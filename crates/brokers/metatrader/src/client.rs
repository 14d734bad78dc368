use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tvbridge_core::*;

use crate::config::BridgeConfig;
use crate::protocol::*;

/// A [`Terminal`] reached through a bridge process running beside MT5.
///
/// The bridge (an MQL5 EA or a Python script holding the MetaTrader5
/// package) listens on TCP and executes terminal primitives on request.
/// Messages are length-prefixed JSON; each request carries an id the
/// response must echo. Any I/O failure drops the stream, so the owning
/// session sees the terminal as disconnected on its next check.
pub struct BridgeTerminal {
    config: BridgeConfig,
    stream: Option<TcpStream>,
    next_id: u64,
    bridge_version: Option<String>,
}

impl BridgeTerminal {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            stream: None,
            next_id: 1,
            bridge_version: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Version string announced by the bridge on connect.
    pub fn bridge_version(&self) -> Option<&str> {
        self.bridge_version.as_deref()
    }

    /// Open the TCP stream and wait for the bridge's greeting.
    async fn open_stream(&mut self) -> Result<(), TerminalError> {
        let addr = self.config.addr();
        info!("Connecting to MetaTrader bridge at {}", addr);

        let mut stream = timeout(self.config.request_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| TerminalError::Timeout)?
            .map_err(|e| TerminalError::Io(format!("TCP connect failed: {}", e)))?;

        let body = timeout(self.config.request_timeout(), read_frame(&mut stream))
            .await
            .map_err(|_| TerminalError::Timeout)??;
        let greeting: TerminalReply = serde_json::from_slice(&body)
            .map_err(|e| TerminalError::Protocol(format!("Deserialization error: {}", e)))?;

        match greeting {
            TerminalReply::Connected { version } => {
                info!("Connected to MetaTrader bridge v{}", version);
                self.bridge_version = Some(version);
                self.stream = Some(stream);
                Ok(())
            }
            TerminalReply::Error { code, message } => Err(TerminalError::Call { code, message }),
            other => Err(TerminalError::Protocol(format!(
                "Unexpected initial message: {}",
                other.name()
            ))),
        }
    }

    /// Send one call and wait for its reply. Error replies become
    /// [`TerminalError::Call`]; transport failures drop the stream.
    async fn call(&mut self, call: TerminalCall) -> Result<TerminalReply, TerminalError> {
        let id = self.next_id;
        self.next_id += 1;
        let name = call.name();

        let result = timeout(self.config.request_timeout(), self.round_trip(Request { id, call }))
            .await
            .unwrap_or(Err(TerminalError::Timeout));

        match result {
            Ok(TerminalReply::Error { code, message }) => {
                debug!(call = name, code, %message, "Terminal call failed");
                Err(TerminalError::Call { code, message })
            }
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(call = name, error = %e, "Bridge request failed, dropping connection");
                self.stream = None;
                Err(e)
            }
        }
    }

    async fn round_trip(&mut self, request: Request) -> Result<TerminalReply, TerminalError> {
        let stream = self.stream.as_mut().ok_or(TerminalError::NotConnected)?;

        let json = serde_json::to_vec(&request)
            .map_err(|e| TerminalError::Protocol(format!("Serialization error: {}", e)))?;
        stream
            .write_all(&frame_message(&json))
            .await
            .map_err(|e| TerminalError::Io(format!("Write error: {}", e)))?;

        let body = read_frame(stream).await?;
        let response: Response = serde_json::from_slice(&body)
            .map_err(|e| TerminalError::Protocol(format!("Deserialization error: {}", e)))?;

        if response.id != request.id {
            return Err(TerminalError::Protocol(format!(
                "Response id {} does not match request id {}",
                response.id, request.id
            )));
        }
        Ok(response.reply)
    }
}

fn unexpected(call: &str, reply: TerminalReply) -> TerminalError {
    TerminalError::Protocol(format!("Unexpected reply to {}: {}", call, reply.name()))
}

#[async_trait]
impl Terminal for BridgeTerminal {
    async fn initialize(&mut self, path: Option<&str>) -> Result<(), TerminalError> {
        if self.stream.is_none() {
            self.open_stream().await?;
        }
        match self
            .call(TerminalCall::Initialize {
                path: path.map(str::to_string),
            })
            .await?
        {
            TerminalReply::Ack => Ok(()),
            other => Err(unexpected("initialize", other)),
        }
    }

    async fn login(
        &mut self,
        account: u64,
        password: &str,
        server: &str,
    ) -> Result<(), TerminalError> {
        let call = TerminalCall::Login {
            account,
            password: password.to_string(),
            server: server.to_string(),
        };
        match self.call(call).await? {
            TerminalReply::Ack => Ok(()),
            other => Err(unexpected("login", other)),
        }
    }

    async fn shutdown(&mut self) -> Result<(), TerminalError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let reply = self.call(TerminalCall::Shutdown).await;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Bridge stream shutdown failed");
            }
        }
        info!("Disconnected from MetaTrader bridge");
        match reply? {
            TerminalReply::Ack => Ok(()),
            other => Err(unexpected("shutdown", other)),
        }
    }

    async fn terminal_info(&mut self) -> Result<TerminalInfo, TerminalError> {
        match self.call(TerminalCall::TerminalInfo).await? {
            TerminalReply::TerminalInfo { info } => Ok(info),
            other => Err(unexpected("terminal_info", other)),
        }
    }

    async fn account_info(&mut self) -> Result<AccountInfo, TerminalError> {
        match self.call(TerminalCall::AccountInfo).await? {
            TerminalReply::AccountInfo { info } => Ok(info),
            other => Err(unexpected("account_info", other)),
        }
    }

    async fn symbols(&mut self) -> Result<Vec<SymbolInfo>, TerminalError> {
        match self.call(TerminalCall::SymbolsGet).await? {
            TerminalReply::Symbols { symbols } => Ok(symbols),
            other => Err(unexpected("symbols_get", other)),
        }
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, TerminalError> {
        let call = TerminalCall::SymbolInfo {
            symbol: symbol.to_string(),
        };
        match self.call(call).await? {
            TerminalReply::SymbolInfo { info } => Ok(info),
            other => Err(unexpected("symbol_info", other)),
        }
    }

    async fn symbol_select(&mut self, symbol: &str, enable: bool) -> Result<bool, TerminalError> {
        let call = TerminalCall::SymbolSelect {
            symbol: symbol.to_string(),
            enable,
        };
        match self.call(call).await? {
            TerminalReply::Bool { value } => Ok(value),
            other => Err(unexpected("symbol_select", other)),
        }
    }

    async fn symbol_tick(&mut self, symbol: &str) -> Result<Option<Quote>, TerminalError> {
        let call = TerminalCall::SymbolInfoTick {
            symbol: symbol.to_string(),
        };
        match self.call(call).await? {
            TerminalReply::Tick { tick } => Ok(tick),
            other => Err(unexpected("symbol_info_tick", other)),
        }
    }

    async fn rate_fields(&mut self, symbol: &str) -> Result<Vec<String>, TerminalError> {
        let call = TerminalCall::RateFields {
            symbol: symbol.to_string(),
        };
        match self.call(call).await? {
            TerminalReply::RateFields { fields } => Ok(fields),
            other => Err(unexpected("rate_fields", other)),
        }
    }

    async fn order_send(&mut self, request: &TradeRequest) -> Result<TradeResult, TerminalError> {
        let call = TerminalCall::OrderSend {
            request: request.clone(),
        };
        match self.call(call).await? {
            TerminalReply::OrderResult { result } => Ok(result),
            other => Err(unexpected("order_send", other)),
        }
    }

    async fn positions(&mut self, filter: &PositionFilter) -> Result<Vec<Position>, TerminalError> {
        let call = TerminalCall::PositionsGet {
            filter: filter.clone(),
        };
        match self.call(call).await? {
            TerminalReply::Positions { positions } => Ok(positions),
            other => Err(unexpected("positions_get", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection, greet it, then answer each request with the
    /// next scripted reply (echoing the request id). Returns the requests seen.
    async fn fake_bridge(replies: Vec<TerminalReply>) -> (BridgeConfig, tokio::task::JoinHandle<Vec<Request>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = serde_json::to_vec(&TerminalReply::Connected {
                version: "1.2.0".to_string(),
            })
            .unwrap();
            socket.write_all(&frame_message(&hello)).await.unwrap();

            let mut seen = Vec::new();
            for reply in replies {
                let body = match read_frame(&mut socket).await {
                    Ok(body) => body,
                    Err(_) => break,
                };
                let request: Request = serde_json::from_slice(&body).unwrap();
                let response = serde_json::to_vec(&Response { id: request.id, reply }).unwrap();
                seen.push(request);
                socket.write_all(&frame_message(&response)).await.unwrap();
            }
            seen
        });
        let config = BridgeConfig {
            host: "127.0.0.1".to_string(),
            port,
            request_timeout_secs: 5,
        };
        (config, handle)
    }

    #[tokio::test]
    async fn test_initialize_and_query() {
        let info = TerminalInfo {
            connected: true,
            trade_allowed: true,
            build: 4755,
            name: "MetaTrader 5".to_string(),
        };
        let (config, bridge) = fake_bridge(vec![
            TerminalReply::Ack,
            TerminalReply::TerminalInfo { info: info.clone() },
            TerminalReply::Bool { value: false },
        ])
        .await;

        let mut terminal = BridgeTerminal::new(config);
        terminal.initialize(Some("C:\\MT5\\terminal64.exe")).await.unwrap();
        assert_eq!(terminal.bridge_version(), Some("1.2.0"));
        assert!(terminal.terminal_info().await.unwrap().connected);
        assert!(!terminal.symbol_select("XYZUSD", true).await.unwrap());

        let seen = bridge.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[0].call,
            TerminalCall::Initialize {
                path: Some("C:\\MT5\\terminal64.exe".to_string())
            }
        );
        assert_eq!(seen[1].call, TerminalCall::TerminalInfo);
        assert!(seen[0].id < seen[1].id);
    }

    #[tokio::test]
    async fn test_error_reply_keeps_connection() {
        let (config, bridge) = fake_bridge(vec![
            TerminalReply::Ack,
            TerminalReply::Error {
                code: -6,
                message: "Terminal: Authorization failed".to_string(),
            },
            TerminalReply::Ack,
        ])
        .await;

        let mut terminal = BridgeTerminal::new(config);
        terminal.initialize(None).await.unwrap();
        let err = terminal.login(1234, "wrong", "Demo").await.unwrap_err();
        assert_eq!(err.code(), Some(-6));
        assert!(terminal.is_connected());

        terminal.shutdown().await.unwrap();
        assert!(!terminal.is_connected());
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_bridge_drops_stream() {
        let (config, bridge) = fake_bridge(vec![TerminalReply::Ack]).await;

        let mut terminal = BridgeTerminal::new(config);
        terminal.initialize(None).await.unwrap();
        bridge.await.unwrap();

        assert!(terminal.terminal_info().await.is_err());
        assert!(!terminal.is_connected());
        assert_eq!(terminal.terminal_info().await.unwrap_err(), TerminalError::NotConnected);
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_protocol_error() {
        let (config, _bridge) = fake_bridge(vec![TerminalReply::Ack, TerminalReply::Ack]).await;

        let mut terminal = BridgeTerminal::new(config);
        terminal.initialize(None).await.unwrap();
        let err = terminal.symbols().await.unwrap_err();
        assert!(matches!(err, TerminalError::Protocol(_)));
    }
}
