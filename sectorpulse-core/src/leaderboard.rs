//! Leaderboards: rankable rows built from sectors or tickers, filtered then sorted.
//!
//! Sorting is a total order for every key and direction:
//! - rows with no value for the key always go last, in both directions
//! - equal values (including all-null) fall back to name, then id, then sector id,
//!   all ascending
//!
//! Filtering runs first and composes by conjunction.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::domain::{DecoratedSector, MemberMove, RankedTicker};

/// What a row ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Sector,
    Ticker,
}

/// A display-ready, sortable projection of a sector or a ticker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardRow {
    pub id: String,
    pub name: String,
    pub kind: RowKind,
    pub sector_id: Option<String>,
    pub sector_name: Option<String>,
    pub members: Vec<String>,
    pub change_1d: Option<f64>,
    pub change_5d: Option<f64>,
    pub rel_volume: Option<f64>,
    pub dollar_volume: Option<f64>,
    pub score: Option<f64>,
    pub pct_off_high: Option<f64>,
    pub gain_to_high: Option<f64>,
    pub leaders: Vec<MemberMove>,
    pub laggards: Vec<MemberMove>,
    pub sparkline: Vec<f64>,
    pub inactive: bool,
}

impl LeaderboardRow {
    fn blank(id: String, name: String, kind: RowKind) -> Self {
        Self {
            id,
            name,
            kind,
            sector_id: None,
            sector_name: None,
            members: Vec::new(),
            change_1d: None,
            change_5d: None,
            rel_volume: None,
            dollar_volume: None,
            score: None,
            pct_off_high: None,
            gain_to_high: None,
            leaders: Vec::new(),
            laggards: Vec::new(),
            sparkline: Vec::new(),
            inactive: false,
        }
    }
}

// ── Builders ─────────────────────────────────────────────────────────

/// One row per sector.
pub fn rows_from_sectors(sectors: &[DecoratedSector]) -> Vec<LeaderboardRow> {
    sectors
        .iter()
        .map(|s| LeaderboardRow {
            members: s.definition.tickers.clone(),
            change_1d: s.change_1d_weighted.or(s.change_1d_median),
            change_5d: s.change_5d_median,
            rel_volume: s.rel_vol_median,
            dollar_volume: s.dollar_vol_today_sum,
            leaders: s.leaders.clone(),
            laggards: s.laggards.clone(),
            ..LeaderboardRow::blank(s.id().to_string(), s.name().to_string(), RowKind::Sector)
        })
        .collect()
}

/// One row per (sector, member) pair. A ticker in two sectors yields two rows.
pub fn rows_from_members(sectors: &[DecoratedSector]) -> Vec<LeaderboardRow> {
    sectors
        .iter()
        .flat_map(|s| {
            s.members_detail.iter().map(move |m| LeaderboardRow {
                sector_id: Some(s.id().to_string()),
                sector_name: Some(s.name().to_string()),
                members: vec![m.symbol.clone()],
                change_1d: m.change_1d,
                change_5d: m.change_5d,
                rel_volume: m.rel_vol_10,
                dollar_volume: m.dollar_vol_today,
                sparkline: m.closes.clone(),
                inactive: m.inactive,
                ..LeaderboardRow::blank(m.symbol.clone(), m.symbol.clone(), RowKind::Ticker)
            })
        })
        .collect()
}

/// One row per ranked ticker from the YTD endpoint.
pub fn rows_from_ralph(tickers: &[RankedTicker]) -> Vec<LeaderboardRow> {
    tickers
        .iter()
        .map(|t| LeaderboardRow {
            sector_id: t.sector_id.clone(),
            sector_name: t.sector_name.clone(),
            members: vec![t.symbol.clone()],
            change_1d: t.change_1d,
            rel_volume: t.rel_vol_10,
            dollar_volume: t.dollar_volume,
            score: t.score,
            pct_off_high: t.pct_off_high,
            gain_to_high: t.gain_to_high,
            sparkline: t.sparkline.clone(),
            ..LeaderboardRow::blank(t.symbol.clone(), t.symbol.clone(), RowKind::Ticker)
        })
        .collect()
}

// ── Sorting ──────────────────────────────────────────────────────────

/// Column a leaderboard can be ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Change1d,
    Change5d,
    RelVolume,
    DollarVolume,
    Score,
    PctOffHigh,
    Name,
}

impl SortKey {
    pub const ALL: [SortKey; 7] = [
        SortKey::Change1d,
        SortKey::Change5d,
        SortKey::RelVolume,
        SortKey::DollarVolume,
        SortKey::Score,
        SortKey::PctOffHigh,
        SortKey::Name,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Change1d => "1D %",
            SortKey::Change5d => "5D %",
            SortKey::RelVolume => "RelVol",
            SortKey::DollarVolume => "$Vol",
            SortKey::Score => "Score",
            SortKey::PctOffHigh => "% Off High",
            SortKey::Name => "Name",
        }
    }

    /// Numeric comparison value. Non-finite values count as missing.
    /// `Name` has no numeric value; it is compared on the name itself.
    pub fn value(&self, row: &LeaderboardRow) -> Option<f64> {
        let v = match self {
            SortKey::Change1d => row.change_1d,
            SortKey::Change5d => row.change_5d,
            SortKey::RelVolume => row.rel_volume,
            SortKey::DollarVolume => row.dollar_volume,
            SortKey::Score => row.score,
            SortKey::PctOffHigh => row.pct_off_high,
            SortKey::Name => None,
        };
        v.filter(|x| x.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

/// Total order over rows for `key` and `direction`.
pub fn compare_rows(
    a: &LeaderboardRow,
    b: &LeaderboardRow,
    key: SortKey,
    direction: SortDirection,
) -> Ordering {
    let primary = match key {
        SortKey::Name => direction.apply(a.name.cmp(&b.name)),
        _ => match (key.value(a), key.value(b)) {
            (Some(x), Some(y)) => direction.apply(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            // Missing values go last regardless of direction
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    };
    primary
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.sector_id.cmp(&b.sector_id))
}

/// Sort in place. Stable, so fully identical rows keep their input order.
pub fn sort_rows(rows: &mut [LeaderboardRow], key: SortKey, direction: SortDirection) {
    rows.sort_by(|a, b| compare_rows(a, b, key, direction));
}

// ── Filtering ────────────────────────────────────────────────────────

/// Dollar-volume floor presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VolumeFloor {
    #[default]
    Off,
    M10,
    M25,
    M50,
    M100,
}

impl VolumeFloor {
    pub const ALL: [VolumeFloor; 5] = [
        VolumeFloor::Off,
        VolumeFloor::M10,
        VolumeFloor::M25,
        VolumeFloor::M50,
        VolumeFloor::M100,
    ];

    pub fn threshold(&self) -> Option<f64> {
        match self {
            VolumeFloor::Off => None,
            VolumeFloor::M10 => Some(10_000_000.0),
            VolumeFloor::M25 => Some(25_000_000.0),
            VolumeFloor::M50 => Some(50_000_000.0),
            VolumeFloor::M100 => Some(100_000_000.0),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VolumeFloor::Off => "any",
            VolumeFloor::M10 => "$10M+",
            VolumeFloor::M25 => "$25M+",
            VolumeFloor::M50 => "$50M+",
            VolumeFloor::M100 => "$100M+",
        }
    }
}

/// Filter stage applied before sorting. Every active criterion must pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowFilter {
    /// Case-insensitive substring over name, id, sector name and member symbols.
    pub query: String,
    pub volume_floor: VolumeFloor,
    /// Keep only rows near their high with a minimum score.
    pub near_high_only: bool,
    pub near_high_pct: f64,
    pub min_score: f64,
    pub hide_inactive: bool,
}

impl Default for RowFilter {
    fn default() -> Self {
        Self {
            query: String::new(),
            volume_floor: VolumeFloor::Off,
            near_high_only: false,
            near_high_pct: 10.0,
            min_score: 2.0,
            hide_inactive: false,
        }
    }
}

impl RowFilter {
    pub fn matches(&self, row: &LeaderboardRow) -> bool {
        self.matches_query(row)
            && self.matches_volume(row)
            && self.matches_near_high(row)
            && !(self.hide_inactive && row.inactive)
    }

    fn matches_query(&self, row: &LeaderboardRow) -> bool {
        let needle = self.query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        row.name.to_lowercase().contains(&needle)
            || row.id.to_lowercase().contains(&needle)
            || row
                .sector_name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&needle))
            || row.members.iter().any(|m| m.to_lowercase().contains(&needle))
    }

    fn matches_volume(&self, row: &LeaderboardRow) -> bool {
        match self.volume_floor.threshold() {
            None => true,
            Some(floor) => row.dollar_volume.is_some_and(|v| v >= floor),
        }
    }

    fn matches_near_high(&self, row: &LeaderboardRow) -> bool {
        if !self.near_high_only {
            return true;
        }
        let near = row.pct_off_high.is_some_and(|p| p <= self.near_high_pct);
        let scored = row.score.is_some_and(|s| s >= self.min_score);
        near && scored
    }
}

/// Filter, then sort.
pub fn build_leaderboard(
    rows: Vec<LeaderboardRow>,
    filter: &RowFilter,
    key: SortKey,
    direction: SortDirection,
) -> Vec<LeaderboardRow> {
    let mut kept: Vec<LeaderboardRow> = rows.into_iter().filter(|r| filter.matches(r)).collect();
    sort_rows(&mut kept, key, direction);
    kept
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::decorate_sector;
    use crate::domain::{MetricMap, SectorDefinition, TickerMetric};

    fn row(name: &str, change: Option<f64>) -> LeaderboardRow {
        LeaderboardRow {
            change_1d: change,
            ..LeaderboardRow::blank(name.to_lowercase(), name.to_string(), RowKind::Sector)
        }
    }

    fn names(rows: &[LeaderboardRow]) -> Vec<&str> {
        rows.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn nulls_last_descending() {
        let mut rows = vec![
            row("Energy", None),
            row("Tech", Some(1.0)),
            row("Banks", Some(3.0)),
            row("Retail", None),
        ];
        sort_rows(&mut rows, SortKey::Change1d, SortDirection::Desc);
        assert_eq!(names(&rows), vec!["Banks", "Tech", "Energy", "Retail"]);
    }

    #[test]
    fn nulls_last_ascending() {
        let mut rows = vec![
            row("Energy", None),
            row("Tech", Some(1.0)),
            row("Banks", Some(3.0)),
            row("Retail", None),
        ];
        sort_rows(&mut rows, SortKey::Change1d, SortDirection::Asc);
        assert_eq!(names(&rows), vec!["Tech", "Banks", "Energy", "Retail"]);
    }

    #[test]
    fn ties_break_by_name_ascending_in_both_directions() {
        for dir in [SortDirection::Asc, SortDirection::Desc] {
            let mut rows = vec![row("Zeta", Some(2.0)), row("Alpha", Some(2.0)), row("Mid", Some(2.0))];
            sort_rows(&mut rows, SortKey::Change1d, dir);
            assert_eq!(names(&rows), vec!["Alpha", "Mid", "Zeta"]);
        }
    }

    #[test]
    fn nan_is_treated_as_missing() {
        let mut rows = vec![row("B", Some(f64::NAN)), row("A", Some(-5.0))];
        sort_rows(&mut rows, SortKey::Change1d, SortDirection::Desc);
        assert_eq!(names(&rows), vec!["A", "B"]);
    }

    #[test]
    fn name_key_sorts_by_name() {
        let mut rows = vec![row("b", None), row("a", None), row("c", None)];
        sort_rows(&mut rows, SortKey::Name, SortDirection::Desc);
        assert_eq!(names(&rows), vec!["c", "b", "a"]);
    }

    #[test]
    fn query_matches_members_case_insensitive() {
        let mut r = row("Semis", Some(1.0));
        r.members = vec!["NVDA".into(), "AMD".into()];
        let filter = RowFilter {
            query: "nvd".into(),
            ..RowFilter::default()
        };
        assert!(filter.matches(&r));
        let miss = RowFilter {
            query: "intc".into(),
            ..RowFilter::default()
        };
        assert!(!miss.matches(&r));
    }

    #[test]
    fn volume_floor_rejects_missing_volume() {
        let mut big = row("Big", None);
        big.dollar_volume = Some(60_000_000.0);
        let mut small = row("Small", None);
        small.dollar_volume = Some(20_000_000.0);
        let unknown = row("Unknown", None);

        let filter = RowFilter {
            volume_floor: VolumeFloor::M50,
            ..RowFilter::default()
        };
        let kept = build_leaderboard(
            vec![big, small, unknown],
            &filter,
            SortKey::Name,
            SortDirection::Asc,
        );
        assert_eq!(names(&kept), vec!["Big"]);
    }

    #[test]
    fn near_high_toggle_requires_both_conditions() {
        let mut strong = row("Strong", None);
        strong.pct_off_high = Some(2.0);
        strong.score = Some(5.0);
        let mut weak = row("Weak", None);
        weak.pct_off_high = Some(2.0);
        weak.score = Some(0.5);
        let mut far = row("Far", None);
        far.pct_off_high = Some(30.0);
        far.score = Some(9.0);

        let filter = RowFilter {
            near_high_only: true,
            ..RowFilter::default()
        };
        let kept = build_leaderboard(vec![strong, weak, far], &filter, SortKey::Score, SortDirection::Desc);
        assert_eq!(names(&kept), vec!["Strong"]);
    }

    #[test]
    fn member_rows_flatten_sector_pairs() {
        let tech = SectorDefinition::new("tech", "Tech", ["AAPL", "MSFT"]).unwrap();
        let mega = SectorDefinition::new("mega", "Mega", ["AAPL"]).unwrap();
        let mut metrics = MetricMap::new();
        metrics.insert(
            "AAPL".into(),
            TickerMetric {
                change_1d: Some(1.0),
                ..TickerMetric::empty("AAPL")
            },
        );
        let sectors = vec![decorate_sector(&tech, &metrics), decorate_sector(&mega, &metrics)];

        let mut rows = rows_from_members(&sectors);
        assert_eq!(rows.len(), 3);

        sort_rows(&mut rows, SortKey::Change1d, SortDirection::Desc);
        let order: Vec<(&str, Option<&str>)> = rows
            .iter()
            .map(|r| (r.id.as_str(), r.sector_id.as_deref()))
            .collect();
        assert_eq!(
            order,
            vec![("AAPL", Some("mega")), ("AAPL", Some("tech")), ("MSFT", Some("tech"))]
        );
    }

    #[test]
    fn sector_rows_carry_aggregates() {
        let tech = SectorDefinition::new("tech", "Tech", ["AAPL"]).unwrap();
        let mut metrics = MetricMap::new();
        metrics.insert(
            "AAPL".into(),
            TickerMetric {
                change_1d: Some(1.5),
                rel_vol_10: Some(2.0),
                dollar_vol_today: Some(5.0e9),
                ..TickerMetric::empty("AAPL")
            },
        );
        let rows = rows_from_sectors(&[decorate_sector(&tech, &metrics)]);
        assert_eq!(rows[0].change_1d, Some(1.5));
        assert_eq!(rows[0].rel_volume, Some(2.0));
        assert_eq!(rows[0].dollar_volume, Some(5.0e9));
        assert_eq!(rows[0].leaders.len(), 1);
        assert_eq!(rows[0].kind, RowKind::Sector);
    }
}
