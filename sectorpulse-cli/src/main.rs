//! SectorPulse CLI: leaderboards, sector edits, preferences and cache management.
//!
//! Commands:
//! - `sectors` / `tickers` / `ralph` - print a leaderboard (optionally export CSV)
//! - `health` - report the server's snapshot freshness
//! - `add` / `remove` / `create` - edit sector membership and wait for the server task
//! - `universe` - list (or export) the local sector definitions
//! - `prefs show|reset` - inspect or reset saved view preferences
//! - `cache clear` - drop mirrored responses from local storage

mod export;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sectorpulse_client::cache::MIRROR_PREFIX;
use sectorpulse_client::{
    CacheConfig, ClientConfig, Clock, Dashboard, DashboardEvent, DurableStore, FileStore,
    Freshness, MutationEvent, MutationTask, PreferenceStore, ResponseCache, SystemClock, View,
    ViewState,
};
use sectorpulse_core::{SortDirection, SortKey, Universe, VolumeFloor};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(
    name = "sectorpulse",
    about = "SectorPulse CLI: sector market dashboard"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL (overrides config and SECTORPULSE_API_URL).
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sector leaderboard.
    Sectors(BoardArgs),
    /// Ticker leaderboard across every sector.
    Tickers(BoardArgs),
    /// Ranked YTD leaders.
    Ralph(BoardArgs),
    /// Snapshot freshness reported by the server.
    Health {
        /// Skip the response cache.
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },
    /// Add a ticker to a sector.
    Add { sector: String, symbol: String },
    /// Remove a ticker from a sector.
    Remove { sector: String, symbol: String },
    /// Create a new sector.
    Create {
        id: String,
        name: String,
        #[arg(required = true)]
        tickers: Vec<String>,
    },
    /// List the local sector definitions.
    Universe {
        /// Write the definitions as TOML to this path.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Saved view preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// Response cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print the saved view state.
    Show,
    /// Restore default preferences.
    Reset,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every mirrored response.
    Clear,
}

/// Filter and sort flags. Any flag given is saved as the new preference.
#[derive(Args)]
struct BoardArgs {
    /// Case-insensitive search over names, ids and member tickers.
    #[arg(long)]
    query: Option<String>,

    /// Sort column: change_1d, change_5d, rel_volume, dollar_volume, score, pct_off_high, name.
    #[arg(long, value_parser = parse_sort_key)]
    sort: Option<SortKey>,

    /// Sort ascending (default is descending).
    #[arg(long, default_value_t = false)]
    asc: bool,

    /// Minimum dollar volume: off, 10m, 25m, 50m, 100m.
    #[arg(long, value_parser = parse_volume_floor)]
    floor: Option<VolumeFloor>,

    /// Only rows near their high with a strong score.
    #[arg(long)]
    near_high: Option<bool>,

    /// Hide inactive tickers.
    #[arg(long)]
    hide_inactive: Option<bool>,

    /// Skip the response cache.
    #[arg(long, default_value_t = false)]
    no_cache: bool,

    /// Maximum rows to print.
    #[arg(long, default_value_t = 25)]
    limit: usize,

    /// Also write the full leaderboard to this CSV file.
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl BoardArgs {
    fn apply(&self, view: &mut ViewState, board: View) {
        view.active = board;
        if let Some(query) = &self.query {
            view.query = query.trim().to_string();
        }
        if let Some(key) = self.sort {
            let direction = if self.asc {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            };
            let slot = match board {
                View::Sectors => &mut view.sectors,
                View::Tickers => &mut view.tickers,
                View::Ralph => &mut view.ralph,
            };
            slot.key = key;
            slot.direction = direction;
        }
        if let Some(floor) = self.floor {
            view.volume_floor = floor;
        }
        if let Some(near_high) = self.near_high {
            view.near_high_only = near_high;
        }
        if let Some(hide) = self.hide_inactive {
            view.hide_inactive = hide;
        }
    }

    fn freshness(&self) -> Freshness {
        if self.no_cache {
            Freshness::NoCache
        } else {
            Freshness::Cached
        }
    }
}

fn parse_sort_key(s: &str) -> Result<SortKey, String> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "change_1d" | "1d" => Ok(SortKey::Change1d),
        "change_5d" | "5d" => Ok(SortKey::Change5d),
        "rel_volume" | "relvol" => Ok(SortKey::RelVolume),
        "dollar_volume" | "volume" => Ok(SortKey::DollarVolume),
        "score" => Ok(SortKey::Score),
        "pct_off_high" | "off_high" => Ok(SortKey::PctOffHigh),
        "name" => Ok(SortKey::Name),
        other => Err(format!("unknown sort column '{other}'")),
    }
}

fn parse_volume_floor(s: &str) -> Result<VolumeFloor, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "off" | "any" | "0" => Ok(VolumeFloor::Off),
        "10m" => Ok(VolumeFloor::M10),
        "25m" => Ok(VolumeFloor::M25),
        "50m" => Ok(VolumeFloor::M50),
        "100m" => Ok(VolumeFloor::M100),
        other => Err(format!("unknown volume floor '{other}' (off, 10m, 25m, 50m, 100m)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.base_url)?;

    match cli.command {
        Commands::Sectors(args) => run_board(&config, View::Sectors, &args).await,
        Commands::Tickers(args) => run_board(&config, View::Tickers, &args).await,
        Commands::Ralph(args) => run_board(&config, View::Ralph, &args).await,
        Commands::Health { no_cache } => run_health(&config, no_cache).await,
        Commands::Add { sector, symbol } => {
            let dashboard = Dashboard::from_config(&config)?;
            let events = dashboard.subscribe();
            let task = dashboard.add_ticker(&sector, &symbol).await?;
            finish_mutation(&dashboard, events, task).await
        }
        Commands::Remove { sector, symbol } => {
            let dashboard = Dashboard::from_config(&config)?;
            let events = dashboard.subscribe();
            let task = dashboard.remove_ticker(&sector, &symbol).await?;
            finish_mutation(&dashboard, events, task).await
        }
        Commands::Create { id, name, tickers } => {
            let dashboard = Dashboard::from_config(&config)?;
            let events = dashboard.subscribe();
            let refs: Vec<&str> = tickers.iter().map(String::as_str).collect();
            let task = dashboard.create_sector(&id, &name, &refs).await?;
            finish_mutation(&dashboard, events, task).await
        }
        Commands::Universe { export } => run_universe(&config, export.as_deref()),
        Commands::Prefs { action } => run_prefs(&config, action),
        Commands::Cache { action } => match action {
            CacheAction::Clear => run_cache_clear(&config),
        },
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, base_url: Option<String>) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(path).context("loading configuration")?;
    if let Some(url) = base_url {
        config.base_url = url.trim().trim_end_matches('/').to_string();
        config.validate()?;
    }
    tracing::debug!(base_url = %config.base_url, "configuration loaded");
    Ok(config)
}

async fn run_board(config: &ClientConfig, board: View, args: &BoardArgs) -> Result<()> {
    let dashboard = Dashboard::from_config(config)?;
    let view = dashboard.update_view(|v| args.apply(v, board));

    let rows = match board {
        View::Sectors => {
            fetch_sectors(&dashboard, args.freshness()).await?;
            dashboard.sector_leaderboard()
        }
        View::Tickers => {
            fetch_sectors(&dashboard, args.freshness()).await?;
            dashboard.ticker_leaderboard()
        }
        View::Ralph => dashboard.ralph_leaderboard(args.freshness()).await?,
    };

    let sort = view.sort_for(board);
    println!(
        "{} rows, sorted by {} {}, volume {}{}",
        rows.len(),
        sort.key.label(),
        if sort.direction == SortDirection::Asc { "asc" } else { "desc" },
        view.volume_floor.label(),
        if view.query.is_empty() {
            String::new()
        } else {
            format!(", matching '{}'", view.query)
        }
    );
    println!();
    render::print_leaderboard(board, &rows, args.limit);

    if let Some(path) = &args.csv {
        export::write_leaderboard_csv(&rows, path)?;
        println!("Leaderboard written to: {}", path.display());
    }
    Ok(())
}

async fn fetch_sectors(dashboard: &Dashboard, freshness: Freshness) -> Result<()> {
    if freshness == Freshness::NoCache {
        dashboard.request_refresh();
    }
    dashboard
        .refresh_sectors()
        .await
        .context("fetching sector metrics")?;
    Ok(())
}

async fn run_health(config: &ClientConfig, no_cache: bool) -> Result<()> {
    let dashboard = Dashboard::from_config(config)?;
    let freshness = if no_cache {
        Freshness::NoCache
    } else {
        Freshness::Cached
    };
    let health = dashboard.health(freshness).await?;
    render::print_health(&health);
    let checked = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    println!("Checked:  {checked}");
    Ok(())
}

/// Wait for the task to finish; local definitions only change on success.
async fn finish_mutation(
    dashboard: &Dashboard,
    mut events: broadcast::Receiver<DashboardEvent>,
    task: MutationTask,
) -> Result<()> {
    println!(
        "Task {} queued for '{}', waiting...",
        task.task_id.as_deref().unwrap_or("-"),
        task.entity_id
    );
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                bail!("dashboard stopped before the task finished")
            }
        };
        match event {
            DashboardEvent::Task(MutationEvent::Succeeded(done))
                if done.entity_id == task.entity_id =>
            {
                render::print_task(&done);
            }
            DashboardEvent::Task(MutationEvent::Failed(failed))
                if failed.entity_id == task.entity_id =>
            {
                render::print_task(&failed);
                bail!(
                    "{}",
                    failed.message.unwrap_or_else(|| "task failed".to_string())
                );
            }
            DashboardEvent::DefinitionsChanged { sector_id } if sector_id == task.entity_id => {
                if let Some(def) = dashboard.definition(&sector_id) {
                    render::print_definitions(&[def]);
                }
            }
            DashboardEvent::Task(MutationEvent::RefreshRequested { entity_id })
                if entity_id == task.entity_id =>
            {
                return Ok(());
            }
            _ => {}
        }
    }
}

fn run_universe(config: &ClientConfig, export: Option<&Path>) -> Result<()> {
    let dashboard = Dashboard::from_config(config)?;
    let universe = Universe::new(dashboard.definitions())?;
    render::print_definitions(&universe.sectors);
    println!();
    println!(
        "{} sectors, {} distinct tickers",
        universe.sectors.len(),
        universe.ticker_count()
    );
    if let Some(path) = export {
        std::fs::write(path, universe.to_toml()?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Definitions written to: {}", path.display());
    }
    Ok(())
}

fn run_prefs(config: &ClientConfig, action: PrefsAction) -> Result<()> {
    let store = Arc::new(FileStore::new(config.resolved_storage_dir()));
    let prefs = PreferenceStore::new(store);
    match action {
        PrefsAction::Show => {
            let view = prefs.load();
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        PrefsAction::Reset => {
            if !prefs.save(&ViewState::default()) {
                bail!("could not write preferences");
            }
            println!("Preferences reset.");
        }
    }
    Ok(())
}

fn run_cache_clear(config: &ClientConfig) -> Result<()> {
    let dir = config.resolved_storage_dir();
    let cleared = clear_mirrored_responses(Arc::new(FileStore::new(&dir)), &config.cache)?;
    if cleared == 0 {
        println!("No cached responses in {}", dir.display());
    } else {
        println!("Cleared {cleared} cached responses in {}", dir.display());
    }
    Ok(())
}

/// Drop every mirrored response in `store`, whether or not mirroring is currently
/// enabled. Returns how many were stored.
fn clear_mirrored_responses(store: Arc<dyn DurableStore>, cache: &CacheConfig) -> Result<usize> {
    let stored = store
        .keys(MIRROR_PREFIX)
        .context("listing cached responses")?
        .len();
    let config = CacheConfig {
        mirror: true,
        ..cache.clone()
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    ResponseCache::new(config, clock, Some(store)).clear();
    Ok(stored)
}
