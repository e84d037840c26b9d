//! Domain types shared by the aggregator, the leaderboard and the client.
//!
//! `TickerMetric` snapshots are immutable: a refresh replaces the whole map.
//! `DecoratedSector` is always derived and never persisted.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::symbol::{normalize_sector_id, normalize_symbol, normalize_symbols, ValidationError};

/// One daily observation in a ticker's price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub dollar_volume: Option<f64>,
}

/// Point-in-time metrics for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMetric {
    pub symbol: String,
    /// One-day change in percent.
    pub change_1d: Option<f64>,
    /// Today's volume relative to the 10-session average.
    pub rel_vol_10: Option<f64>,
    pub dollar_vol_today: Option<f64>,
    pub avg_dollar_vol_10: Option<f64>,
    pub last_updated: Option<String>,
    /// Server-side flag for tickers with repeated recent fetch failures.
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub history: Vec<DailyPoint>,
}

impl TickerMetric {
    /// A metric with no data, used for members the server knows nothing about.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            change_1d: None,
            rel_vol_10: None,
            dollar_vol_today: None,
            avg_dollar_vol_10: None,
            last_updated: None,
            inactive: false,
            history: Vec::new(),
        }
    }
}

/// Symbol → metric lookup for one snapshot.
pub type MetricMap = HashMap<String, TickerMetric>;

/// A user-defined or seeded sector: an id, a display name and a set of tickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorDefinition {
    pub id: String,
    pub name: String,
    pub tickers: Vec<String>,
}

impl SectorDefinition {
    /// Build a definition, normalizing the id and every ticker.
    ///
    /// Duplicate tickers (after normalization) are rejected.
    pub fn new<'a>(
        id: &str,
        name: &str,
        tickers: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ValidationError> {
        let id = normalize_sector_id(id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptySectorName);
        }
        let tickers = normalize_symbols(&id, tickers)?;
        Ok(Self {
            id,
            name: name.to_string(),
            tickers,
        })
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.tickers.iter().any(|t| t == symbol)
    }

    /// Copy of this definition with `raw` appended.
    pub fn with_ticker(&self, raw: &str) -> Result<Self, ValidationError> {
        let symbol = normalize_symbol(raw)?;
        if self.contains(&symbol) {
            return Err(ValidationError::DuplicateMember {
                sector_id: self.id.clone(),
                symbol,
            });
        }
        let mut next = self.clone();
        next.tickers.push(symbol);
        Ok(next)
    }

    /// Copy of this definition with `raw` removed.
    pub fn without_ticker(&self, raw: &str) -> Result<Self, ValidationError> {
        let symbol = normalize_symbol(raw)?;
        if !self.contains(&symbol) {
            return Err(ValidationError::NotAMember {
                sector_id: self.id.clone(),
                symbol,
            });
        }
        let mut next = self.clone();
        next.tickers.retain(|t| *t != symbol);
        Ok(next)
    }
}

/// A member's move, used in leader/laggard lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberMove {
    pub symbol: String,
    pub change_1d: f64,
    pub rel_vol_10: Option<f64>,
}

/// Per-member detail row carried by a decorated sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDetail {
    pub symbol: String,
    pub change_1d: Option<f64>,
    pub change_5d: Option<f64>,
    pub rel_vol_10: Option<f64>,
    pub dollar_vol_today: Option<f64>,
    pub avg_dollar_vol_10: Option<f64>,
    pub last_updated: Option<String>,
    pub inactive: bool,
    /// False when the snapshot had no metric for this member.
    pub has_data: bool,
    /// Chronological closes, for sparklines.
    pub closes: Vec<f64>,
}

/// A sector definition plus the aggregates derived from one metric snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoratedSector {
    pub definition: SectorDefinition,
    pub change_1d_median: Option<f64>,
    pub change_1d_weighted: Option<f64>,
    pub change_5d_median: Option<f64>,
    pub rel_vol_median: Option<f64>,
    /// sum(dollar volume today) / sum(10-session average dollar volume).
    pub rel_vol_sum_ratio: Option<f64>,
    pub dollar_vol_today_sum: Option<f64>,
    pub avg_dollar_vol_10_sum: Option<f64>,
    pub leaders: Vec<MemberMove>,
    pub laggards: Vec<MemberMove>,
    pub members_detail: Vec<MemberDetail>,
    pub last_updated: Option<String>,
}

impl DecoratedSector {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// A ticker row from the ranked YTD endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTicker {
    pub symbol: String,
    pub sector_id: Option<String>,
    pub sector_name: Option<String>,
    pub score: Option<f64>,
    pub pct_off_high: Option<f64>,
    pub gain_to_high: Option<f64>,
    pub pct_gain_ytd: Option<f64>,
    pub change_1d: Option<f64>,
    pub rel_vol_10: Option<f64>,
    pub dollar_volume: Option<f64>,
    pub sparkline: Vec<f64>,
}
