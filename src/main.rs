/// main.rs – Entry point for the cTrader live PnL client.
///
/// Wires the broker transport, the interactive menu and the main loop
/// together. Logs go to a file so they never fight the dashboard for the
/// terminal.
mod app;
mod broker;
mod codec;
mod config;
mod dashboard;
mod event_loop;
mod handlers;
mod input;
mod keys;
mod menu;
mod models;
mod pnl;
mod render;
mod session;
mod shutdown;
mod stop_loss;
mod store;
mod viewport;

use std::fs::OpenOptions;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use app::App;
use config::{HostType, Settings};
use event_loop::{LoopHandle, LoopTask};
use menu::MenuReader;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ctrader-live-pnl",
    about = "Interactive cTrader Open API client with a live unrealized-PnL dashboard",
    version
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Broker environment, overriding config and CTRADER_HOST.
    #[arg(long, value_name = "live|demo")]
    host: Option<HostType>,

    /// Open the live PnL dashboard as soon as an account is ready.
    #[arg(long, default_value_t = false)]
    live: bool,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config, cli.host)?;
    init_logging(&settings);

    if !settings.has_credentials() {
        bail!("CLIENT_ID, CLIENT_SECRET and ACCESS_TOKEN must be set (environment or .env)");
    }
    info!(
        "Starting against {:?} ({}) for accounts {:?}",
        settings.broker.host,
        settings.broker.endpoint(),
        settings.account_ids
    );

    let (handle, rx) = LoopHandle::channel();
    let (broker, transport) = broker::spawn(&settings.broker, handle.clone());
    let mut app = App::new(settings, broker, handle.clone());
    app.attach_menu(MenuReader::spawn(handle.clone()).context("starting menu")?);
    if cli.live {
        app.launch_when_ready();
    }

    tokio::spawn(forward_signals(handle));

    let result = app.run(rx).await;
    if let Err(e) = &result {
        println!("Fatal: {e:#}");
    }

    // The transport was told to stop during shutdown; don't hang on it.
    if tokio::time::timeout(Duration::from_secs(2), transport)
        .await
        .is_err()
    {
        warn!("Broker transport did not stop in time");
    }
    info!("Bye");
    result
}

/// Append-mode file logging; stderr when the file can't be opened.
fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.log.file)
    {
        Ok(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        Err(e) => {
            builder.with_writer(std::io::stderr).init();
            warn!("Cannot open log file {}: {e}; logging to stderr", settings.log.file);
        }
    }
}

/// Turn SIGINT / SIGTERM into a loop shutdown. In raw mode Ctrl-C arrives as
/// a key instead, see `input::map_key`.
async fn forward_signals(handle: LoopHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("SIGTERM handler not installed: {e}");
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.send(LoopTask::Shutdown("SIGINT"));
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => handle.send(LoopTask::Shutdown("SIGINT")),
            _ = term.recv() => handle.send(LoopTask::Shutdown("SIGTERM")),
        };
    }
    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_ok() {
        handle.send(LoopTask::Shutdown("SIGINT"));
    }
}
