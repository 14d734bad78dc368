use tokio::sync::Mutex;
use tvbridge_brokers_metatrader::{TerminalSession, TradingConfig};
use tvbridge_core::Terminal;

/// The session type every handler works with.
pub type SharedSession = TerminalSession<Box<dyn Terminal>>;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// One terminal session; the lock serializes requests against it.
    pub session: Mutex<SharedSession>,
    /// Order defaults applied to alerts that leave them out.
    pub trading: TradingConfig,
}

impl AppState {
    pub fn new(session: SharedSession) -> Self {
        let trading = session.trading().clone();
        Self {
            session: Mutex::new(session),
            trading,
        }
    }
}
