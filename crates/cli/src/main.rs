//! autologin: hosts the presence auto-login manager against an in-memory
//! presence service.
//!
//! Status-change notifications are read from stdin, one JSON object per
//! line. When input closes the final session snapshot is printed to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use autologin_core::config::{self, Config};
use autologin_core::event::{BroadcastEventBus, Event, EventBus, EventSource, StatusChangeEvent};
use autologin_notifications::{DesktopNotifier, LogNotifier, Notifier};
use autologin_presence::{
    AutoLoginManager, AvailableStatus, EVENT_PATTERN, InMemoryPresenceClient, PresenceClient,
    SessionMarker,
};

const SYSTEM_COMPONENT: &str = "autologin-cli";

/// Presence auto-login for an agent session
#[derive(Debug, Parser)]
#[command(name = "autologin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show toasts as desktop notifications instead of log lines
    #[arg(long)]
    desktop: bool,

    /// Statuses offered by the presence service, as ID=NAME, comma-separated
    #[arg(short, long, value_delimiter = ',', default_value = "0N58c000000092H=Available")]
    statuses: Vec<String>,

    /// Status the agent already holds at startup
    #[arg(long)]
    current_status: Option<String>,

    /// Default away status advertised by the presence service
    #[arg(long)]
    default_away: Option<String>,

    /// Forget the previous session so this launch is not treated as a reload
    #[arg(long)]
    fresh_session: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_tracing(&config.logging.level);
    config.auto_login.log_active_overrides();

    if cli.fresh_session {
        let marker = SessionMarker::new(config.auto_login.marker_path());
        marker
            .clear()
            .with_context(|| format!("failed to clear {}", marker.path().display()))?;
    }

    let client = build_client(&cli)?;
    let notifier: Arc<dyn Notifier> = if cli.desktop {
        Arc::new(DesktopNotifier)
    } else {
        Arc::new(LogNotifier)
    };
    let event_bus: Arc<dyn EventBus> =
        Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));

    let manager = Arc::new(AutoLoginManager::new(
        config.auto_login.clone(),
        Some(client),
        Some(notifier),
    ));
    let subscription = event_bus.subscribe(EVENT_PATTERN)?;
    let listener = tokio::spawn(manager.clone().listen(subscription));

    let initialization = manager.initialize().await;
    info!(?initialization, "auto-login initialized");

    let source = EventSource::System(SYSTEM_COMPONENT.to_string());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let change = match StatusChangeEvent::from_json(line) {
            Ok(change) => Some(change),
            Err(error) => {
                warn!(error = %error, "unparseable status change, delivering without payload");
                None
            }
        };
        event_bus.publish(Event::status_changed(source.clone(), change))?;
    }

    if let Some(outcome) = manager.wait_for_scheduled().await {
        info!(?outcome, "initial auto-login finished");
    }
    event_bus.publish(Event::shutdown_requested(source, "input closed"))?;
    listener.await.context("auto-login listener panicked")??;

    println!("{}", serde_json::to_string_pretty(&manager.snapshot())?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    config.context("failed to load configuration")
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(cli: &Cli) -> Result<Arc<dyn PresenceClient>> {
    let statuses = cli
        .statuses
        .iter()
        .map(|raw| parse_status(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut client = InMemoryPresenceClient::new(statuses);
    if let Some(status_id) = &cli.default_away {
        client = client.with_default_away(status_id);
    }
    if let Some(status_id) = &cli.current_status {
        client = client.with_current_status(status_id);
    }
    Ok(Arc::new(client))
}

fn parse_status(raw: &str) -> Result<AvailableStatus> {
    let (id, name) = raw.split_once('=').unwrap_or((raw, raw));
    let id = id.trim();
    if id.is_empty() {
        bail!("status {raw:?} has an empty id");
    }
    Ok(AvailableStatus::new(id, name.trim()))
}
