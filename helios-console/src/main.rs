//! Helios Console - operator command line for the energy management backend
//!
//! Thin shell over `helios-sync`:
//! - login / logout with the token kept in the OS keyring
//! - site catalogue and persisted site selection
//! - live watch of telemetry, alerts and RL suggestions
//! - optimistic suggestion resolution and strategy weight updates

mod config;
mod secure_store;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::ConsoleConfig;
use helios_sync::models::{RlStrategy, SuggestionAction};
use helios_sync::{FileStateStore, HttpBackend, Resolution, StoreView, SyncSession, WsTransport};
use secure_store::ConsoleStateStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "helios-console", version, about = "Helios EMS operator console")]
struct Args {
    /// Override the REST base url (e.g. http://127.0.0.1:8000/api/v1)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Override the live channel base url (e.g. ws://127.0.0.1:8000)
    #[arg(long, global = true)]
    live_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange credentials for a session token
    Login {
        username: String,
        /// Falls back to HELIOS_PASSWORD
        #[arg(long, env = "HELIOS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the session token and the selected site
    Logout,
    /// List the sites of the current session
    Sites,
    /// Select a site (omit the id to clear the selection)
    Select { site_id: Option<String> },
    /// Stream live state of the selected site
    Watch {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Accept or reject an RL suggestion of the selected site
    Resolve {
        suggestion_id: String,
        #[arg(value_enum)]
        action: ActionArg,
    },
    /// Update the RL strategy weights (0-100 each)
    Strategy {
        #[arg(long)]
        cost: u8,
        #[arg(long)]
        grid: u8,
        #[arg(long)]
        battery: u8,
    },
    /// Print the sync health report as JSON
    Health,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActionArg {
    Accept,
    Reject,
}

impl From<ActionArg> for SuggestionAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Accept => SuggestionAction::Accept,
            ActionArg::Reject => SuggestionAction::Reject,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let session = build_session(&args).await?;

    let result = run(&session, args.command).await;
    session.shutdown().await;
    result
}

async fn build_session(args: &Args) -> Result<SyncSession> {
    let console = ConsoleConfig::load().await?;
    let mut sync = helios_sync::load_config().await;
    console.apply_to(&mut sync);
    if let Some(url) = &args.api_url {
        sync.api.base_url = url.clone();
    }
    if let Some(url) = &args.live_url {
        sync.live.base_url = url.clone();
    }

    let state_path = console.state_file_path()?;
    let file = FileStateStore::open(&state_path).with_context(|| format!("opening {}", state_path.display()))?;
    let persisted = ConsoleStateStore::new(file, console.storage.use_keyring);

    let backend = HttpBackend::new(&sync.api)?;
    let transport = WsTransport::new(sync.live.base_url.clone()).with_connect_timeout(sync.connect_timeout());
    let session = SyncSession::new(sync, Arc::new(backend), Arc::new(transport), Arc::new(persisted))?;
    Ok(session)
}

/// Resume the persisted session or fail with a hint to log in
async fn require_session(session: &SyncSession) -> Result<()> {
    if !session.restore().await? {
        bail!("not logged in, run `helios-console login <username>` first");
    }
    Ok(())
}

async fn run(session: &SyncSession, command: Command) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            session.login(&username, &password).await.context("login failed")?;
            println!("Logged in, {} sites available", session.view().catalogue.len());
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Command::Sites => {
            require_session(session).await?;
            let view = session.view();
            let selected = view.selected_site.as_ref().map(|s| s.id.clone());
            for site in view.catalogue.values() {
                let marker = if Some(&site.id) == selected.as_ref() { "*" } else { " " };
                println!("{marker} {:>6}  {}", site.id, site.name);
            }
        }
        Command::Select { site_id } => {
            require_session(session).await?;
            session.select_site(site_id.as_deref()).await?;
            match session.view().selected_site {
                Some(site) => println!("Selected {} ({})", site.name, site.id),
                None => println!("Selection cleared"),
            }
        }
        Command::Watch { seconds } => {
            require_session(session).await?;
            if session.view().selected_site.is_none() {
                bail!("no site selected, run `helios-console select <site-id>` first");
            }
            watch(session, seconds.map(Duration::from_secs)).await?;
        }
        Command::Resolve { suggestion_id, action } => {
            require_session(session).await?;
            session.refresh_suggestions().await?;
            match session.resolve_suggestion(&suggestion_id, action.into()).await? {
                Resolution::Confirmed => println!("Suggestion {suggestion_id} resolved"),
                Resolution::NoSiteSelected => bail!("no site selected"),
                Resolution::AlreadyResolved => println!("Suggestion {suggestion_id} is not pending"),
            }
        }
        Command::Strategy { cost, grid, battery } => {
            require_session(session).await?;
            let strategy = RlStrategy {
                cost_priority: cost,
                grid_stability_priority: grid,
                battery_longevity_priority: battery,
            };
            match session.update_strategy(strategy).await? {
                Resolution::Confirmed => println!("Strategy updated: cost {cost}, grid {grid}, battery {battery}"),
                Resolution::NoSiteSelected => bail!("no site selected"),
                Resolution::AlreadyResolved => bail!("session changed before the update was sent"),
            }
        }
        Command::Health => {
            require_session(session).await?;
            // give the first pull and the live handshake time to land
            tokio::time::sleep(Duration::from_secs(2)).await;
            println!("{}", serde_json::to_string_pretty(&session.health())?);
        }
    }
    Ok(())
}

async fn watch(session: &SyncSession, limit: Option<Duration>) -> Result<()> {
    let mut views = session.subscribe();
    let mut status = session.watch_connection();
    let deadline = limit.map(|d| tokio::time::Instant::now() + d);
    info!("watching, Ctrl-C to stop");

    loop {
        let sleep = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if !view.session.authenticated {
                    warn!("session ended by backend, please log in again");
                    break;
                }
                println!("{}", render_view(&view));
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("[live] {}", status.borrow_and_update().as_str());
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep => break,
        }
    }
    Ok(())
}

fn render_view(view: &StoreView) -> String {
    let site = view
        .selected_site
        .as_ref()
        .map(|s| s.name.as_str())
        .unwrap_or("-");
    let health = view
        .site
        .health
        .as_ref()
        .map(|h| format!("{:.0}% soc {:.0}%", h.site_health, h.battery_soc))
        .unwrap_or_else(|| "n/a".into());
    let pv = view
        .site
        .telemetry
        .as_ref()
        .map(|t| format!("{:.1} kW", t.metrics.pv_generation))
        .unwrap_or_else(|| "n/a".into());
    let latest_alert = view
        .site
        .alerts
        .first()
        .map(|a| format!(" | last alert [{}] {}", a.severity, a.message))
        .unwrap_or_default();
    let pending = view
        .latest_pending_suggestion()
        .map(|s| format!(" | suggestion {}", s.id))
        .unwrap_or_default();
    format!(
        "{site} | health {health} | pv {pv} | alerts {} | suggestions {}{latest_alert}{pending}",
        view.site.alerts.len(),
        view.site.suggestions.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use helios_sync::models::{HealthStatus, Site, Suggestion, SuggestionStatus};

    #[test]
    fn test_render_view_summarizes_site() {
        let mut view = StoreView::default();
        view.selected_site = Some(Site {
            id: "1".into(),
            name: "Pune Plant".into(),
            config: Default::default(),
        });
        view.site.health = Some(HealthStatus {
            site_health: 96.4,
            battery_soc: 71.0,
            ..Default::default()
        });
        view.site.suggestions.push(Suggestion {
            id: "s1".into(),
            status: SuggestionStatus::Pending,
            strategy: Default::default(),
        });

        let line = render_view(&view);
        assert!(line.starts_with("Pune Plant | health 96% soc 71%"));
        assert!(line.contains("pv n/a"));
        assert!(line.ends_with("| suggestion s1"));
    }

    #[test]
    fn test_cli_parses_resolve() {
        let args = Args::parse_from(["helios-console", "resolve", "s1", "reject"]);
        assert!(matches!(
            args.command,
            Command::Resolve { action: ActionArg::Reject, .. }
        ));
    }
}
