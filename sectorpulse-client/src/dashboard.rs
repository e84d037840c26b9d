//! Dashboard state hub.
//!
//! Owns the sector definitions, the last decorated snapshot and the view state, and
//! wires the response cache, remote API and mutation orchestrator together:
//! - a sector fetch decorates the current definitions and publishes the result
//! - mutations are validated locally, then handed to the orchestrator
//! - when a remote task succeeds the definition change is applied and persisted,
//!   sector responses are invalidated and the next fetch skips the cache
//!
//! Everything observable is broadcast as a [`DashboardEvent`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use sectorpulse_core::leaderboard::{rows_from_members, rows_from_ralph, rows_from_sectors};
use sectorpulse_core::{
    build_leaderboard, normalize_sector_id, normalize_symbol, DailyPoint, DecoratedSector,
    LeaderboardRow, RankedTicker, SectorAggregator, SectorDefinition, Universe, ValidationError,
};

use crate::api::{metric_map, Freshness, HealthSnapshot, HttpTransport, MarketApi, Transport};
use crate::cache::{CacheStats, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::orchestrator::{
    MutationAction, MutationError, MutationEvent, MutationMeta, MutationTask, Orchestrator,
};
use crate::storage::{DurableStore, FileStore};
use crate::store::{DefinitionStore, PreferenceStore, TrendCache, View, ViewState};

const EVENT_CAPACITY: usize = 64;

/// Responses under this path depend on sector membership.
const SECTOR_METRICS_PREFIX: &str = "/metrics/sectors";

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    SectorsUpdated { count: usize },
    DefinitionsChanged { sector_id: String },
    Task(MutationEvent),
    ViewChanged(ViewState),
}

struct State {
    definitions: Universe,
    sectors: Vec<DecoratedSector>,
    /// Price history per symbol from the last sector snapshot.
    histories: HashMap<String, Vec<DailyPoint>>,
    view: ViewState,
}

struct Shared {
    api: MarketApi,
    orchestrator: Orchestrator,
    aggregator: SectorAggregator,
    clock: Arc<dyn Clock>,
    prefs: PreferenceStore,
    definition_store: DefinitionStore,
    trend: TrendCache,
    state: Mutex<State>,
    /// Set when a mutation succeeded; the next sector fetch bypasses the cache.
    refresh_pending: AtomicBool,
    events: broadcast::Sender<DashboardEvent>,
}

pub struct Dashboard {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl Dashboard {
    /// Build over HTTP with file storage, as described by `config`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.base_url, config.request_timeout())?;
        let store = FileStore::new(config.resolved_storage_dir());
        let seed = match &config.universe_file {
            Some(path) => Universe::from_file(path)
                .map_err(|e| ClientError::InvalidRequest(e.to_string()))?,
            None => Universe::default_us(),
        };
        Ok(Self::with_seed(
            Arc::new(transport),
            Arc::new(store),
            Arc::new(SystemClock),
            config,
            seed,
        ))
    }

    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        config: &ClientConfig,
    ) -> Self {
        Self::with_seed(transport, store, clock, config, Universe::default_us())
    }

    /// `seed` is used only when storage holds no usable definitions.
    pub fn with_seed(
        transport: Arc<dyn Transport>,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        config: &ClientConfig,
        seed: Universe,
    ) -> Self {
        let mirror = config.cache.mirror.then(|| Arc::clone(&store));
        let cache = ResponseCache::new(config.cache.clone(), Arc::clone(&clock), mirror);
        let api = MarketApi::new(transport, cache);
        let orchestrator = Orchestrator::new(Arc::new(api.clone()), config.poll.clone());

        let prefs = PreferenceStore::new(Arc::clone(&store));
        let definition_store = DefinitionStore::new(Arc::clone(&store));
        let trend = TrendCache::new(store);

        let definitions = definition_store.load().unwrap_or(seed);
        let view = prefs.load();
        tracing::info!(
            sectors = definitions.sectors.len(),
            tickers = definitions.ticker_count(),
            base_url = api.base_url(),
            "dashboard ready"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mutation_events = orchestrator.subscribe();
        let shared = Arc::new(Shared {
            api,
            orchestrator,
            aggregator: SectorAggregator::default(),
            clock,
            prefs,
            definition_store,
            trend,
            state: Mutex::new(State {
                definitions,
                sectors: Vec::new(),
                histories: HashMap::new(),
                view,
            }),
            refresh_pending: AtomicBool::new(false),
            events,
        });
        let listener = tokio::spawn(listen(Arc::clone(&shared), mutation_events));
        Self { shared, listener }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.shared.events.subscribe()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn definitions(&self) -> Vec<SectorDefinition> {
        self.shared.state.lock().definitions.sectors.clone()
    }

    pub fn definition(&self, sector_id: &str) -> Option<SectorDefinition> {
        self.shared.state.lock().definitions.get(sector_id).cloned()
    }

    /// The last decorated snapshot.
    pub fn sectors(&self) -> Vec<DecoratedSector> {
        self.shared.state.lock().sectors.clone()
    }

    pub fn view(&self) -> ViewState {
        self.shared.state.lock().view.clone()
    }

    pub fn tasks(&self) -> Vec<MutationTask> {
        self.shared.orchestrator.tasks()
    }

    pub fn task(&self, sector_id: &str) -> Option<MutationTask> {
        self.shared.orchestrator.task(sector_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.api.cache().stats()
    }

    /// Forget cached sector responses; the next sector fetch goes to the network.
    pub fn request_refresh(&self) {
        self.shared.request_refresh("requested");
    }

    /// Whether the next sector fetch will skip the cache.
    pub fn needs_refresh(&self) -> bool {
        self.shared.refresh_pending.load(Ordering::SeqCst)
    }

    // ── Fetching ─────────────────────────────────────────────────────

    /// Fetch and decorate the current definitions.
    ///
    /// An aborted fetch leaves the previous snapshot in place and returns it.
    pub async fn refresh_sectors(&self) -> Result<Vec<DecoratedSector>, ClientError> {
        let definitions = self.definitions();
        let freshness = if self.shared.refresh_pending.swap(false, Ordering::SeqCst) {
            Freshness::NoCache
        } else {
            Freshness::Cached
        };

        let dtos = match self.shared.api.sectors_volume(&definitions, freshness).await {
            Ok(dtos) => dtos,
            Err(ClientError::Aborted) => {
                if freshness == Freshness::NoCache {
                    self.shared.refresh_pending.store(true, Ordering::SeqCst);
                }
                return Ok(self.sectors());
            }
            Err(e) => {
                if freshness == Freshness::NoCache {
                    self.shared.refresh_pending.store(true, Ordering::SeqCst);
                }
                tracing::warn!(error = %e, "sector refresh failed");
                return Err(e);
            }
        };

        let metrics = metric_map(&dtos);
        let decorated = self.shared.aggregator.decorate_all(&definitions, &metrics);
        let count = decorated.len();
        {
            let mut state = self.shared.state.lock();
            state.sectors = decorated.clone();
            state.histories = metrics
                .into_iter()
                .filter(|(_, m)| !m.history.is_empty())
                .map(|(symbol, m)| (symbol, m.history))
                .collect();
        }
        tracing::debug!(count, ?freshness, "sectors refreshed");
        self.shared.emit(DashboardEvent::SectorsUpdated { count });
        Ok(decorated)
    }

    pub fn sector_leaderboard(&self) -> Vec<LeaderboardRow> {
        let state = self.shared.state.lock();
        let sort = state.view.sort_for(View::Sectors);
        build_leaderboard(
            rows_from_sectors(&state.sectors),
            &state.view.filter(),
            sort.key,
            sort.direction,
        )
    }

    pub fn ticker_leaderboard(&self) -> Vec<LeaderboardRow> {
        let state = self.shared.state.lock();
        let sort = state.view.sort_for(View::Tickers);
        build_leaderboard(
            rows_from_members(&state.sectors),
            &state.view.filter(),
            sort.key,
            sort.direction,
        )
    }

    /// YTD leaders, served from today's trend cache when allowed. Fields the server
    /// left empty are computed from the last sector snapshot's price history.
    pub async fn ralph_leaderboard(
        &self,
        freshness: Freshness,
    ) -> Result<Vec<LeaderboardRow>, ClientError> {
        let mut tickers = self.ralph_tickers(freshness).await?;
        let filled = {
            let state = self.shared.state.lock();
            tickers
                .iter_mut()
                .filter_map(|t| state.histories.get(&t.symbol).map(|h| t.fill_from_history(h)))
                .filter(|filled| *filled)
                .count()
        };
        if filled > 0 {
            tracing::debug!(filled, "ranked rows completed from history");
        }
        let view = self.view();
        let sort = view.sort_for(View::Ralph);
        Ok(build_leaderboard(
            rows_from_ralph(&tickers),
            &view.filter(),
            sort.key,
            sort.direction,
        ))
    }

    async fn ralph_tickers(&self, freshness: Freshness) -> Result<Vec<RankedTicker>, ClientError> {
        let today = self.shared.clock.today();
        if freshness == Freshness::Cached {
            if let Some(tickers) = self.shared.trend.load_for(today) {
                tracing::debug!(%today, count = tickers.len(), "trend cache hit");
                return Ok(tickers);
            }
        }
        match self.shared.api.ralph(freshness).await {
            Ok(tickers) => {
                self.shared.trend.save(today, &tickers);
                Ok(tickers)
            }
            Err(ClientError::Aborted) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn health(&self, freshness: Freshness) -> Result<HealthSnapshot, ClientError> {
        self.shared.api.health(freshness).await
    }

    // ── Mutations ────────────────────────────────────────────────────

    pub async fn add_ticker(
        &self,
        sector_id: &str,
        symbol: &str,
    ) -> Result<MutationTask, MutationError> {
        let sector_id = normalize_sector_id(sector_id)?;
        let symbol = normalize_symbol(symbol)?;
        self.require_sector(&sector_id)?.with_ticker(&symbol)?;

        let api = self.shared.api.clone();
        let (id, sym) = (sector_id.clone(), symbol.clone());
        let meta = MutationMeta {
            symbol: Some(symbol),
            ..MutationMeta::default()
        };
        self.shared
            .orchestrator
            .enqueue(&sector_id, MutationAction::Add, meta, move || async move {
                api.add_ticker(&id, &sym).await
            })
            .await
    }

    pub async fn remove_ticker(
        &self,
        sector_id: &str,
        symbol: &str,
    ) -> Result<MutationTask, MutationError> {
        let sector_id = normalize_sector_id(sector_id)?;
        let symbol = normalize_symbol(symbol)?;
        let remaining = self.require_sector(&sector_id)?.without_ticker(&symbol)?;
        // A sector keeps at least one member
        if remaining.tickers.is_empty() {
            return Err(ValidationError::EmptySector(sector_id).into());
        }

        let api = self.shared.api.clone();
        let (id, sym) = (sector_id.clone(), symbol.clone());
        let meta = MutationMeta {
            symbol: Some(symbol),
            ..MutationMeta::default()
        };
        self.shared
            .orchestrator
            .enqueue(&sector_id, MutationAction::Remove, meta, move || async move {
                api.remove_ticker(&id, &sym).await
            })
            .await
    }

    pub async fn create_sector(
        &self,
        sector_id: &str,
        name: &str,
        tickers: &[&str],
    ) -> Result<MutationTask, MutationError> {
        let definition = SectorDefinition::new(sector_id, name, tickers.iter().copied())?;
        if definition.tickers.is_empty() {
            return Err(ValidationError::EmptySector(definition.id).into());
        }
        if self.shared.state.lock().definitions.contains(&definition.id) {
            return Err(ValidationError::DuplicateSector(definition.id).into());
        }

        let api = self.shared.api.clone();
        let entity_id = definition.id.clone();
        let meta = MutationMeta {
            symbol: None,
            name: Some(definition.name.clone()),
            tickers: definition.tickers.clone(),
        };
        self.shared
            .orchestrator
            .enqueue(&entity_id, MutationAction::Create, meta, move || async move {
                api.create_sector(&definition).await
            })
            .await
    }

    /// Forget a finished task for a sector.
    pub fn dismiss(&self, sector_id: &str) -> bool {
        let id = normalize_sector_id(sector_id).unwrap_or_else(|_| sector_id.to_string());
        self.shared.orchestrator.dismiss(&id)
    }

    // ── View ─────────────────────────────────────────────────────────

    /// Replace the view state and persist it.
    pub fn set_view(&self, view: ViewState) {
        self.shared.state.lock().view = view.clone();
        self.shared.prefs.save(&view);
        self.shared.emit(DashboardEvent::ViewChanged(view));
    }

    /// Edit the view state in place and persist it.
    pub fn update_view(&self, edit: impl FnOnce(&mut ViewState)) -> ViewState {
        let mut view = self.view();
        edit(&mut view);
        self.set_view(view.clone());
        view
    }

    /// Stop background work. Pending tasks are marked failed.
    pub fn shutdown(&self) {
        self.shared.orchestrator.shutdown();
        self.listener.abort();
    }

    fn require_sector(&self, sector_id: &str) -> Result<SectorDefinition, ValidationError> {
        self.definition(sector_id)
            .ok_or_else(|| ValidationError::UnknownSector(sector_id.to_string()))
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Shared {
    fn emit(&self, event: DashboardEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn on_mutation_event(&self, event: MutationEvent) {
        match &event {
            MutationEvent::Succeeded(task) => {
                if let Some(sector_id) = self.apply_mutation(task) {
                    self.emit(DashboardEvent::DefinitionsChanged { sector_id });
                }
            }
            MutationEvent::RefreshRequested { entity_id } => self.request_refresh(entity_id),
            _ => {}
        }
        self.emit(DashboardEvent::Task(event));
    }

    /// Drop sector responses and make the next sector fetch skip the cache.
    fn request_refresh(&self, reason: &str) {
        let prefix = self.api.cache_key(SECTOR_METRICS_PREFIX);
        let dropped = self.api.cache().invalidate_prefix(&prefix);
        self.trend.clear();
        self.refresh_pending.store(true, Ordering::SeqCst);
        tracing::debug!(reason, dropped, "sector responses invalidated");
    }

    /// Apply a confirmed remote change to the local definitions and persist them.
    fn apply_mutation(&self, task: &MutationTask) -> Option<String> {
        let mut state = self.state.lock();
        let current = state.definitions.get(&task.entity_id).cloned();
        let updated = match (task.action, current, task.meta.symbol.as_deref()) {
            (MutationAction::Add, Some(def), Some(symbol)) => def.with_ticker(symbol),
            (MutationAction::Remove, Some(def), Some(symbol)) => def.without_ticker(symbol),
            (MutationAction::Create, _, _) => SectorDefinition::new(
                &task.entity_id,
                task.meta.name.as_deref().unwrap_or(&task.entity_id),
                task.meta.tickers.iter().map(String::as_str),
            ),
            _ => {
                tracing::warn!(entity_id = %task.entity_id, action = ?task.action, "nothing to apply for task");
                return None;
            }
        };
        let updated = updated.and_then(|definition| {
            if definition.tickers.is_empty() {
                Err(ValidationError::EmptySector(definition.id))
            } else {
                Ok(definition)
            }
        });
        match updated {
            Ok(definition) => {
                let id = definition.id.clone();
                state.definitions.upsert(definition);
                self.definition_store.save(&state.definitions);
                tracing::info!(sector_id = %id, action = ?task.action, "definitions updated");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(entity_id = %task.entity_id, error = %e, "could not apply task result");
                None
            }
        }
    }
}

async fn listen(shared: Arc<Shared>, mut events: broadcast::Receiver<MutationEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => shared.on_mutation_event(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "dashboard missed mutation events");
                shared.request_refresh("lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
