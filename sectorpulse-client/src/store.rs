//! Preference and definition persistence: versioned JSON envelopes across restarts.
//!
//! Each value lives under its own storage key as `{"version": N, "data": ...}`.
//! Loading never fails: a missing key, unreadable JSON, a shape mismatch or a
//! version mismatch all fall back to defaults (logged at warn). Saving never
//! fails either; write errors are logged and dropped.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sectorpulse_core::{
    RankedTicker, RowFilter, SectorDefinition, SortDirection, SortKey, Universe, VolumeFloor,
};

use crate::storage::DurableStore;

pub const VIEW_KEY: &str = "sectorpulse.view.v1";
pub const SECTORS_KEY: &str = "sectorpulse.sectors.v1";
pub const TREND_KEY: &str = "sectorpulse.trend.v1";

const VIEW_VERSION: u32 = 1;
const SECTORS_VERSION: u32 = 1;
const TREND_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// A typed value under one storage key.
pub struct Persisted<T> {
    store: Arc<dyn DurableStore>,
    key: &'static str,
    version: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Persisted<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn DurableStore>, key: &'static str, version: u32) -> Self {
        Self {
            store,
            key,
            version,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// The stored value, or `None` when absent or unusable.
    pub fn load(&self) -> Option<T> {
        let raw = match self.store.get(self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = self.key, error = %e, "storage read failed, using defaults");
                return None;
            }
        };
        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(env) if env.version == self.version => Some(env.data),
            Ok(env) => {
                tracing::warn!(
                    key = self.key,
                    found = env.version,
                    expected = self.version,
                    "stored version mismatch, using defaults"
                );
                None
            }
            Err(e) => {
                tracing::warn!(key = self.key, error = %e, "stored value unreadable, using defaults");
                None
            }
        }
    }

    /// Write `value`. Returns whether it was stored.
    pub fn save(&self, value: &T) -> bool {
        let envelope = Envelope {
            version: self.version,
            data: value,
        };
        let written = serde_json::to_string(&envelope)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set(self.key, &json).map_err(|e| e.to_string()));
        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = self.key, error = %e, "storage write failed");
                false
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(self.key) {
            tracing::warn!(key = self.key, error = %e, "storage remove failed");
        }
    }
}

// ── View preferences ─────────────────────────────────────────────────

/// Which leaderboard is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Sectors,
    Tickers,
    Ralph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPrefs {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortPrefs {
    pub const fn desc(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewState {
    pub active: View,
    pub sectors: SortPrefs,
    pub tickers: SortPrefs,
    pub ralph: SortPrefs,
    pub query: String,
    pub volume_floor: VolumeFloor,
    pub near_high_only: bool,
    pub hide_inactive: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            active: View::Sectors,
            sectors: SortPrefs::desc(SortKey::Change1d),
            tickers: SortPrefs::desc(SortKey::Change1d),
            ralph: SortPrefs::desc(SortKey::Score),
            query: String::new(),
            volume_floor: VolumeFloor::Off,
            near_high_only: false,
            hide_inactive: false,
        }
    }
}

impl ViewState {
    pub fn sort_for(&self, view: View) -> SortPrefs {
        match view {
            View::Sectors => self.sectors,
            View::Tickers => self.tickers,
            View::Ralph => self.ralph,
        }
    }

    /// Column-header click: same key flips direction, a new key starts descending
    /// (ascending for names).
    pub fn select_sort(&mut self, view: View, key: SortKey) {
        let slot = match view {
            View::Sectors => &mut self.sectors,
            View::Tickers => &mut self.tickers,
            View::Ralph => &mut self.ralph,
        };
        if slot.key == key {
            slot.direction = slot.direction.toggled();
        } else {
            slot.key = key;
            slot.direction = if key == SortKey::Name {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            };
        }
    }

    pub fn filter(&self) -> RowFilter {
        RowFilter {
            query: self.query.clone(),
            volume_floor: self.volume_floor,
            near_high_only: self.near_high_only,
            hide_inactive: self.hide_inactive,
            ..RowFilter::default()
        }
    }
}

pub struct PreferenceStore {
    cell: Persisted<ViewState>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            cell: Persisted::new(store, VIEW_KEY, VIEW_VERSION),
        }
    }

    pub fn load(&self) -> ViewState {
        self.cell.load().unwrap_or_default()
    }

    pub fn save(&self, view: &ViewState) -> bool {
        self.cell.save(view)
    }
}

// ── Sector definitions ───────────────────────────────────────────────

pub struct DefinitionStore {
    cell: Persisted<Vec<SectorDefinition>>,
}

impl DefinitionStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            cell: Persisted::new(store, SECTORS_KEY, SECTORS_VERSION),
        }
    }

    /// Stored definitions, re-validated. `None` when nothing usable is stored.
    pub fn load(&self) -> Option<Universe> {
        let raw = self.cell.load()?;
        let normalized = raw
            .iter()
            .map(|d| SectorDefinition::new(&d.id, &d.name, d.tickers.iter().map(String::as_str)))
            .collect::<Result<Vec<_>, _>>()
            .and_then(Universe::new);
        match normalized {
            Ok(universe) => Some(universe),
            Err(e) => {
                tracing::warn!(key = SECTORS_KEY, error = %e, "stored sectors invalid, using defaults");
                None
            }
        }
    }

    pub fn save(&self, universe: &Universe) -> bool {
        self.cell.save(&universe.sectors)
    }
}

// ── Trend cache ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TrendSnapshot {
    date: Option<NaiveDate>,
    tickers: Vec<RankedTicker>,
}

/// Ranked YTD rows for one calendar date. Anything stored for another date is stale.
pub struct TrendCache {
    cell: Persisted<TrendSnapshot>,
}

impl TrendCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            cell: Persisted::new(store, TREND_KEY, TREND_VERSION),
        }
    }

    pub fn load_for(&self, date: NaiveDate) -> Option<Vec<RankedTicker>> {
        let snapshot = self.cell.load()?;
        if snapshot.date == Some(date) {
            Some(snapshot.tickers)
        } else {
            tracing::debug!(stored = ?snapshot.date, %date, "trend cache from another day");
            None
        }
    }

    pub fn save(&self, date: NaiveDate, tickers: &[RankedTicker]) -> bool {
        self.cell.save(&TrendSnapshot {
            date: Some(date),
            tickers: tickers.to_vec(),
        })
    }

    pub fn clear(&self) {
        self.cell.clear();
    }
}
