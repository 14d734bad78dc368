pub mod simulated;

pub use simulated::{CallRecord, SimulatedTerminal, SimulatedTerminalConfig};
