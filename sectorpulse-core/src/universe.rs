//! Sector universe: the seeded sector definitions plus TOML import/export.
//!
//! The seeded set is what a fresh install shows before the user defines any
//! sectors of their own. A universe file looks like:
//!
//! ```toml
//! [[sectors]]
//! id = "semis"
//! name = "Semiconductors"
//! tickers = ["NVDA", "AMD"]
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SectorDefinition;
use crate::symbol::{normalize_sector_id, ValidationError};

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse universe TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize universe: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Deserialize)]
struct RawSector {
    id: String,
    name: String,
    #[serde(default)]
    tickers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawUniverse {
    #[serde(default)]
    sectors: Vec<RawSector>,
}

/// An ordered, validated list of sector definitions with unique ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Universe {
    pub sectors: Vec<SectorDefinition>,
}

impl Universe {
    /// Validate a list of definitions: ids unique, every definition non-empty.
    pub fn new(sectors: Vec<SectorDefinition>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        for sector in &sectors {
            if !seen.insert(sector.id.as_str()) {
                return Err(ValidationError::DuplicateSector(sector.id.clone()));
            }
            if sector.tickers.is_empty() {
                return Err(ValidationError::EmptySector(sector.id.clone()));
            }
        }
        Ok(Self { sectors })
    }

    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = std::fs::read_to_string(path).map_err(|source| UniverseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and normalize every sector in a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, UniverseError> {
        let raw: RawUniverse = toml::from_str(content)?;
        let sectors = raw
            .sectors
            .iter()
            .map(|s| SectorDefinition::new(&s.id, &s.name, s.tickers.iter().map(String::as_str)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(sectors)?)
    }

    pub fn to_toml(&self) -> Result<String, UniverseError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn get(&self, id: &str) -> Option<&SectorDefinition> {
        let id = normalize_sector_id(id).ok()?;
        self.sectors.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Replace the definition with the same id, or append it.
    pub fn upsert(&mut self, definition: SectorDefinition) {
        match self.sectors.iter_mut().find(|s| s.id == definition.id) {
            Some(slot) => *slot = definition,
            None => self.sectors.push(definition),
        }
    }

    pub fn all_tickers(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.sectors
            .iter()
            .flat_map(|s| s.tickers.iter().map(String::as_str))
            .filter(|t| seen.insert(*t))
            .collect()
    }

    pub fn ticker_count(&self) -> usize {
        self.all_tickers().len()
    }

    /// The seeded US sector set.
    pub fn default_us() -> Self {
        let seed: [(&str, &str, &[&str]); 8] = [
            (
                "tech",
                "Technology",
                &["AAPL", "MSFT", "GOOGL", "META", "CRM", "ADBE", "ORCL"],
            ),
            (
                "semis",
                "Semiconductors",
                &["NVDA", "AMD", "AVGO", "TSM", "MU", "INTC", "QCOM"],
            ),
            (
                "healthcare",
                "Healthcare",
                &["JNJ", "UNH", "PFE", "ABBV", "MRK", "LLY", "TMO", "ABT"],
            ),
            (
                "financials",
                "Financials",
                &["JPM", "BAC", "WFC", "GS", "MS", "BLK", "SCHW", "C"],
            ),
            (
                "energy",
                "Energy",
                &["XOM", "CVX", "COP", "SLB", "EOG", "MPC", "PSX", "VLO"],
            ),
            (
                "staples",
                "Consumer Staples",
                &["WMT", "PG", "KO", "PEP", "COST"],
            ),
            (
                "discretionary",
                "Consumer Discretionary",
                &["AMZN", "HD", "MCD", "NKE", "SBUX", "TGT"],
            ),
            (
                "index-etfs",
                "Index ETFs",
                &["SPY", "QQQ", "IWM", "DIA"],
            ),
        ];

        let sectors = seed
            .iter()
            .filter_map(|(id, name, tickers)| {
                SectorDefinition::new(id, name, tickers.iter().copied()).ok()
            })
            .collect();
        Self { sectors }
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::default_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_universe_has_sectors() {
        let u = Universe::default_us();
        assert_eq!(u.sectors.len(), 8);
        assert!(u.contains("semis"));
        assert!(u.contains(" Tech "));
        assert!(u.ticker_count() > 40);
    }

    #[test]
    fn toml_roundtrip() {
        let u = Universe::default_us();
        let toml_str = u.to_toml().unwrap();
        let parsed = Universe::from_toml(&toml_str).unwrap();
        assert_eq!(u, parsed);
    }

    #[test]
    fn toml_input_is_normalized() {
        let text = r#"
            [[sectors]]
            id = " AI-Infra "
            name = "AI Infrastructure"
            tickers = ["nvda", " vrt "]
        "#;
        let u = Universe::from_toml(text).unwrap();
        let s = u.get("ai-infra").unwrap();
        assert_eq!(s.tickers, vec!["NVDA", "VRT"]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let text = r#"
            [[sectors]]
            id = "tech"
            name = "Tech"
            tickers = ["AAPL"]

            [[sectors]]
            id = "TECH"
            name = "Tech again"
            tickers = ["MSFT"]
        "#;
        let err = Universe::from_toml(text).unwrap_err();
        assert!(matches!(
            err,
            UniverseError::Invalid(ValidationError::DuplicateSector(_))
        ));
    }

    #[test]
    fn empty_sector_rejected() {
        let text = r#"
            [[sectors]]
            id = "empty"
            name = "Nothing"
        "#;
        assert!(Universe::from_toml(text).is_err());
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut u = Universe::default_us();
        let first_id = u.sectors[0].id.clone();
        let replacement = SectorDefinition::new(&first_id, "Renamed", ["AAPL"]).unwrap();
        u.upsert(replacement);
        assert_eq!(u.sectors[0].name, "Renamed");
        assert_eq!(u.sectors.len(), 8);
    }

    #[test]
    fn all_tickers_deduplicates() {
        let a = SectorDefinition::new("a", "A", ["AAPL", "MSFT"]).unwrap();
        let b = SectorDefinition::new("b", "B", ["AAPL"]).unwrap();
        let u = Universe::new(vec![a, b]).unwrap();
        assert_eq!(u.all_tickers(), vec!["AAPL", "MSFT"]);
    }
}
