mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, ConfigOverrides};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use tvbridge_api::envelope::Envelope;
use tvbridge_api::{AppState, SharedSession};
use tvbridge_brokers_common::SimulatedTerminal;
use tvbridge_brokers_metatrader::{BridgeTerminal, TerminalSession, TradeIntent};
use tvbridge_core::{Side, Terminal};

#[derive(Parser)]
#[command(name = "tvbridge")]
#[command(about = "Forward charting alerts to a MetaTrader 5 terminal")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Trade against an in-memory simulated terminal
    #[arg(long, global = true)]
    paper: bool,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server
    Serve {
        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Connect, print terminal and account details, then exit
    Check,

    /// List the symbols the terminal offers
    Symbols,

    /// List open positions
    Positions {
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Open a market position
    Trade {
        #[arg(short, long)]
        symbol: String,

        /// buy, sell, long or short
        #[arg(long)]
        side: Side,

        /// Lots (defaults to the configured default volume)
        #[arg(long)]
        volume: Option<Decimal>,

        #[arg(long)]
        comment: Option<String>,

        /// Do not close existing positions on the symbol first
        #[arg(long)]
        keep_existing: bool,
    },

    /// Close one position, fully or partially
    Close {
        #[arg(short, long)]
        ticket: u64,

        #[arg(long)]
        volume: Option<Decimal>,
    },

    /// Close every position, optionally for one symbol
    CloseAll {
        #[arg(short, long)]
        symbol: Option<String>,

        /// Total lots, split evenly across the positions
        #[arg(long)]
        volume: Option<Decimal>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref(), &cli.overrides)?;

    // Initialize tracing
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    config.validate(cli.paper)?;
    tracing::debug!(config = ?config, paper = cli.paper, "Loaded configuration");

    let terminal = build_terminal(&config, cli.paper);
    let mut session = TerminalSession::open(
        terminal,
        config.metatrader.clone(),
        config.trading.clone(),
    )
    .await;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            serve(session, &bind).await?;
        }
        Commands::Check => check(&mut session).await?,
        Commands::Symbols => {
            let symbols = session.list_symbols().await;
            let envelope = if session.is_connected() {
                Envelope::ok(format!("{} symbols", symbols.len())).with("symbols", &symbols)
            } else {
                Envelope::failure("Terminal not connected")
            };
            finish(session, envelope).await?;
        }
        Commands::Positions { symbol } => {
            let positions = session.get_positions(symbol.as_deref()).await;
            let envelope = if session.is_connected() {
                Envelope::ok(format!("{} open positions", positions.len()))
                    .with("positions", &positions)
            } else {
                Envelope::failure("Terminal not connected")
            };
            finish(session, envelope).await?;
        }
        Commands::Trade {
            symbol,
            side,
            volume,
            comment,
            keep_existing,
        } => {
            let volume = volume.unwrap_or(config.trading.default_volume);
            let mut intent = TradeIntent::market(&symbol, side, volume)
                .with_comment(comment.unwrap_or_else(|| config.trading.default_comment.clone()));
            intent.close_existing = config.trading.close_existing && !keep_existing;

            let result = session.place_trade(&intent).await;
            let (_, envelope) = Envelope::from_order(&result);
            finish(session, envelope).await?;
        }
        Commands::Close { ticket, volume } => {
            let result = session.close_position(ticket, volume).await;
            let (_, envelope) = Envelope::from_close(&result);
            finish(session, envelope).await?;
        }
        Commands::CloseAll { symbol, volume } => {
            let result = session.close_all_positions(symbol.as_deref(), volume).await;
            let (_, envelope) = Envelope::from_close_all(&result);
            finish(session, envelope).await?;
        }
    }

    Ok(())
}

fn build_terminal(config: &AppConfig, paper: bool) -> Box<dyn Terminal> {
    if paper {
        tracing::info!("Paper mode: using simulated terminal");
        Box::new(SimulatedTerminal::with_majors(&config.metatrader.symbol_suffix))
    } else {
        tracing::info!(bridge = %config.metatrader.bridge.addr(), "Using terminal bridge");
        Box::new(BridgeTerminal::new(config.metatrader.bridge.clone()))
    }
}

async fn serve(session: SharedSession, bind: &str) -> Result<()> {
    if !session.is_connected() {
        tracing::warn!("Terminal not connected; requests will retry the connection");
    }

    let state = Arc::new(AppState::new(session));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
    };

    let served = tvbridge_api::start_server(state.clone(), bind, shutdown).await;
    state.session.lock().await.close().await;
    served
}

async fn check(session: &mut SharedSession) -> Result<()> {
    let Some(terminal) = session.terminal_info().await else {
        session.close().await;
        anyhow::bail!("Failed to connect to terminal");
    };
    let account = session
        .account_info()
        .await
        .context("Connected but couldn't retrieve account info")?;
    let symbols = session.list_symbols().await;

    let sep = "=".repeat(60);
    println!("\n{sep}");
    println!("  TERMINAL CHECK");
    println!("{sep}");
    println!("  Terminal:        {} (build {})", terminal.name, terminal.build);
    println!("  Trade Allowed:   {}", terminal.trade_allowed);
    println!("  Account:         {} @ {}", account.login, account.server);
    println!("  Name:            {}", account.name);
    println!("  Balance:         {} {}", account.balance, account.currency);
    println!("  Equity:          {} {}", account.equity, account.currency);
    println!("  Leverage:        1:{}", account.leverage);
    println!("  Symbols:         {}", symbols.len());
    println!(
        "  Volume Field:    {}",
        session.volume_field().map(|f| f.as_str()).unwrap_or("not found")
    );
    println!("{sep}\n");

    session.close().await;
    Ok(())
}

/// Print the envelope, close the session and fail the process if the
/// operation failed.
async fn finish(mut session: SharedSession, envelope: Envelope) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    session.close().await;
    if !envelope.success {
        anyhow::bail!(envelope.message);
    }
    Ok(())
}
