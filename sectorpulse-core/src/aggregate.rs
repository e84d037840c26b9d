//! Sector metrics aggregation.
//!
//! Turns a sector definition plus a snapshot of member metrics into a
//! `DecoratedSector`. Every aggregate is null-safe: a member with a missing figure
//! is skipped for that figure, never counted as zero. Inactive members are listed in
//! the detail rows but excluded from every aggregate.

use std::cmp::Ordering;

use crate::domain::{
    DailyPoint, DecoratedSector, MemberDetail, MemberMove, MetricMap, SectorDefinition,
    TickerMetric,
};

/// Number of members kept in the leader and laggard lists.
pub const MOVERS_LEN: usize = 3;

/// Lookback for the derived multi-day change.
pub const FIVE_DAY_PERIODS: usize = 5;

/// Median of the present, finite values. `None` when nothing is left.
///
/// Odd count → middle value; even count → mean of the two middle values.
pub fn median<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut clean: Vec<f64> = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect();
    if clean.is_empty() {
        return None;
    }
    clean.sort_by(|a, b| a.total_cmp(b));
    let mid = clean.len() / 2;
    if clean.len() % 2 == 1 {
        Some(clean[mid])
    } else {
        Some((clean[mid - 1] + clean[mid]) / 2.0)
    }
}

/// Percent change between the last close and the close `periods` observations
/// earlier, over the chronologically sorted history.
///
/// Only finite closes count as observations. Needs `periods + 1` of them and a
/// positive base close.
pub fn history_change(history: &[DailyPoint], periods: usize) -> Option<f64> {
    if periods == 0 {
        return None;
    }
    let closes = chronological_closes(history);
    if closes.len() <= periods {
        return None;
    }
    let end = closes[closes.len() - 1];
    let start = closes[closes.len() - 1 - periods];
    if start <= 0.0 {
        return None;
    }
    Some((end / start - 1.0) * 100.0)
}

/// `(close[n-1] / close[n-6] − 1) × 100`, or `None` with fewer than six closes.
pub fn five_day_change(history: &[DailyPoint]) -> Option<f64> {
    history_change(history, FIVE_DAY_PERIODS)
}

/// Finite closes ordered by date.
pub fn chronological_closes(history: &[DailyPoint]) -> Vec<f64> {
    let mut points: Vec<&DailyPoint> = history.iter().collect();
    points.sort_by_key(|p| p.date);
    points
        .into_iter()
        .filter_map(|p| p.close)
        .filter(|c| c.is_finite())
        .collect()
}

/// Strategy for the sector's weighted one-day change.
///
/// No weighting formula is assumed; implementors decide how members count.
pub trait ChangeWeighting: Send + Sync {
    fn weighted_change(&self, members: &[&TickerMetric]) -> Option<f64>;
}

/// Default weighting: the plain median of member one-day changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianFallback;

impl ChangeWeighting for MedianFallback {
    fn weighted_change(&self, members: &[&TickerMetric]) -> Option<f64> {
        median(members.iter().map(|m| m.change_1d))
    }
}

/// Decorates sector definitions with snapshot aggregates.
pub struct SectorAggregator {
    weighting: Box<dyn ChangeWeighting>,
}

impl Default for SectorAggregator {
    fn default() -> Self {
        Self::new(Box::new(MedianFallback))
    }
}

impl SectorAggregator {
    pub fn new(weighting: Box<dyn ChangeWeighting>) -> Self {
        Self { weighting }
    }

    /// Decorate every definition against the same snapshot, preserving order.
    pub fn decorate_all(
        &self,
        definitions: &[SectorDefinition],
        metrics: &MetricMap,
    ) -> Vec<DecoratedSector> {
        definitions
            .iter()
            .map(|def| self.decorate(def, metrics))
            .collect()
    }

    pub fn decorate(&self, definition: &SectorDefinition, metrics: &MetricMap) -> DecoratedSector {
        let mut active: Vec<&TickerMetric> = Vec::with_capacity(definition.tickers.len());
        let mut members_detail = Vec::with_capacity(definition.tickers.len());

        for symbol in &definition.tickers {
            match metrics.get(symbol) {
                Some(metric) => {
                    if !metric.inactive {
                        active.push(metric);
                    }
                    members_detail.push(detail_for(symbol, metric));
                }
                None => members_detail.push(MemberDetail {
                    symbol: symbol.clone(),
                    change_1d: None,
                    change_5d: None,
                    rel_vol_10: None,
                    dollar_vol_today: None,
                    avg_dollar_vol_10: None,
                    last_updated: None,
                    inactive: false,
                    has_data: false,
                    closes: Vec::new(),
                }),
            }
        }

        let dollar_vol_today_sum = partial_sum(active.iter().map(|m| m.dollar_vol_today));
        let avg_dollar_vol_10_sum = partial_sum(active.iter().map(|m| m.avg_dollar_vol_10));
        let rel_vol_sum_ratio = match (dollar_vol_today_sum, avg_dollar_vol_10_sum) {
            (Some(today), Some(avg)) if avg != 0.0 => Some(today / avg),
            _ => None,
        };

        let last_updated = active
            .iter()
            .filter_map(|m| m.last_updated.as_deref())
            .max()
            .map(str::to_string);

        DecoratedSector {
            definition: definition.clone(),
            change_1d_median: median(active.iter().map(|m| m.change_1d)),
            change_1d_weighted: self.weighting.weighted_change(&active),
            change_5d_median: median(active.iter().map(|m| five_day_change(&m.history))),
            rel_vol_median: median(active.iter().map(|m| m.rel_vol_10)),
            rel_vol_sum_ratio,
            dollar_vol_today_sum,
            avg_dollar_vol_10_sum,
            leaders: movers(&active, Ordering::Greater),
            laggards: movers(&active, Ordering::Less),
            members_detail,
            last_updated,
        }
    }
}

/// Decorate with the default (median) weighting.
pub fn decorate_sector(definition: &SectorDefinition, metrics: &MetricMap) -> DecoratedSector {
    SectorAggregator::default().decorate(definition, metrics)
}

fn detail_for(symbol: &str, metric: &TickerMetric) -> MemberDetail {
    MemberDetail {
        symbol: symbol.to_string(),
        change_1d: metric.change_1d,
        change_5d: five_day_change(&metric.history),
        rel_vol_10: metric.rel_vol_10,
        dollar_vol_today: metric.dollar_vol_today,
        avg_dollar_vol_10: metric.avg_dollar_vol_10,
        last_updated: metric.last_updated.clone(),
        inactive: metric.inactive,
        has_data: true,
        closes: chronological_closes(&metric.history),
    }
}

/// Sum of the present figures; `None` if no member reports one.
fn partial_sum(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values
        .flatten()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Top movers by one-day change. `Ordering::Greater` → leaders (descending),
/// `Ordering::Less` → laggards (ascending). Ties go to the lower symbol.
fn movers(active: &[&TickerMetric], direction: Ordering) -> Vec<MemberMove> {
    let mut moves: Vec<MemberMove> = active
        .iter()
        .filter_map(|m| {
            m.change_1d.filter(|c| c.is_finite()).map(|change| MemberMove {
                symbol: m.symbol.clone(),
                change_1d: change,
                rel_vol_10: m.rel_vol_10,
            })
        })
        .collect();
    moves.sort_by(|a, b| {
        let by_change = match direction {
            Ordering::Less => a.change_1d.total_cmp(&b.change_1d),
            _ => b.change_1d.total_cmp(&a.change_1d),
        };
        by_change.then_with(|| a.symbol.cmp(&b.symbol))
    });
    moves.truncate(MOVERS_LEN);
    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn metric(symbol: &str, change: Option<f64>, rel: Option<f64>) -> TickerMetric {
        TickerMetric {
            change_1d: change,
            rel_vol_10: rel,
            ..TickerMetric::empty(symbol)
        }
    }

    fn closes_history(closes: &[f64]) -> Vec<DailyPoint> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| DailyPoint {
                date: start + chrono::Duration::days(i as i64),
                close: Some(*c),
                volume: None,
                dollar_volume: None,
            })
            .collect()
    }

    fn snapshot(metrics: Vec<TickerMetric>) -> MetricMap {
        metrics.into_iter().map(|m| (m.symbol.clone(), m)).collect()
    }

    #[test]
    fn median_odd_even_and_empty() {
        assert_eq!(median([Some(3.0), Some(1.0), Some(2.0)]), Some(2.0));
        assert_eq!(median([Some(4.0), None, Some(1.0), Some(2.0), Some(3.0)]), Some(2.5));
        assert_eq!(median([None, None]), None);
        assert_eq!(median(std::iter::empty::<Option<f64>>()), None);
    }

    #[test]
    fn median_ignores_non_finite() {
        assert_eq!(median([Some(f64::NAN), Some(5.0)]), Some(5.0));
    }

    #[test]
    fn five_day_change_uses_sixth_from_last() {
        let h = closes_history(&[90.0, 100.0, 101.0, 102.0, 103.0, 104.0, 110.0]);
        let change = five_day_change(&h).unwrap();
        assert!((change - 10.0).abs() < 1e-9);
    }

    #[test]
    fn five_day_change_needs_six_closes() {
        let h = closes_history(&[100.0, 101.0, 102.0, 103.0, 104.0]);
        assert_eq!(five_day_change(&h), None);
    }

    #[test]
    fn five_day_change_sorts_by_date() {
        let mut h = closes_history(&[100.0, 1.0, 1.0, 1.0, 1.0, 120.0]);
        h.reverse();
        let change = five_day_change(&h).unwrap();
        assert!((change - 20.0).abs() < 1e-9);
    }

    #[test]
    fn five_day_change_skips_missing_closes() {
        let mut h = closes_history(&[100.0, 0.0, 1.0, 1.0, 1.0, 1.0, 150.0]);
        h[1].close = None;
        // Only six valid closes remain, base is 100.
        let change = five_day_change(&h).unwrap();
        assert!((change - 50.0).abs() < 1e-9);
    }

    #[test]
    fn scenario_null_members_are_skipped() {
        let def = SectorDefinition::new("s1", "Sector One", ["A", "B", "C"]).unwrap();
        let metrics = snapshot(vec![
            metric("A", Some(2.0), Some(1.5)),
            metric("B", Some(-1.0), None),
            metric("C", None, Some(2.0)),
        ]);

        let d = decorate_sector(&def, &metrics);

        assert_eq!(d.change_1d_median, Some(0.5));
        assert_eq!(d.rel_vol_median, Some(1.75));
        let leaders: Vec<&str> = d.leaders.iter().map(|l| l.symbol.as_str()).collect();
        assert_eq!(leaders, vec!["A", "B"]);
    }

    #[test]
    fn weighted_change_falls_back_to_median() {
        let def = SectorDefinition::new("s1", "S1", ["A", "B", "C"]).unwrap();
        let metrics = snapshot(vec![
            metric("A", Some(1.0), None),
            metric("B", Some(3.0), None),
            metric("C", Some(8.0), None),
        ]);
        let d = decorate_sector(&def, &metrics);
        assert_eq!(d.change_1d_weighted, d.change_1d_median);
        assert_eq!(d.change_1d_weighted, Some(3.0));
    }

    #[test]
    fn custom_weighting_is_used() {
        struct Max;
        impl ChangeWeighting for Max {
            fn weighted_change(&self, members: &[&TickerMetric]) -> Option<f64> {
                members.iter().filter_map(|m| m.change_1d).reduce(f64::max)
            }
        }
        let def = SectorDefinition::new("s1", "S1", ["A", "B"]).unwrap();
        let metrics = snapshot(vec![metric("A", Some(1.0), None), metric("B", Some(3.0), None)]);
        let d = SectorAggregator::new(Box::new(Max)).decorate(&def, &metrics);
        assert_eq!(d.change_1d_weighted, Some(3.0));
        assert_eq!(d.change_1d_median, Some(2.0));
    }

    #[test]
    fn leaders_top_three_with_symbol_tiebreak() {
        let def = SectorDefinition::new("s1", "S1", ["D", "C", "B", "A", "E"]).unwrap();
        let metrics = snapshot(vec![
            metric("A", Some(1.0), None),
            metric("B", Some(5.0), None),
            metric("C", Some(1.0), None),
            metric("D", Some(-2.0), None),
            metric("E", None, None),
        ]);
        let d = decorate_sector(&def, &metrics);
        let leaders: Vec<&str> = d.leaders.iter().map(|l| l.symbol.as_str()).collect();
        assert_eq!(leaders, vec!["B", "A", "C"]);
        let laggards: Vec<&str> = d.laggards.iter().map(|l| l.symbol.as_str()).collect();
        assert_eq!(laggards, vec!["D", "A", "C"]);
    }

    #[test]
    fn volume_sums_are_partial() {
        let def = SectorDefinition::new("s1", "S1", ["A", "B", "C"]).unwrap();
        let mut a = metric("A", None, None);
        a.dollar_vol_today = Some(300.0);
        a.avg_dollar_vol_10 = Some(100.0);
        let mut b = metric("B", None, None);
        b.dollar_vol_today = Some(100.0);
        let mut c = metric("C", None, None);
        c.avg_dollar_vol_10 = Some(100.0);

        let d = decorate_sector(&def, &snapshot(vec![a, b, c]));

        assert_eq!(d.dollar_vol_today_sum, Some(400.0));
        assert_eq!(d.avg_dollar_vol_10_sum, Some(200.0));
        assert_eq!(d.rel_vol_sum_ratio, Some(2.0));
    }

    #[test]
    fn volume_ratio_null_without_denominator() {
        let def = SectorDefinition::new("s1", "S1", ["A"]).unwrap();
        let mut a = metric("A", None, None);
        a.dollar_vol_today = Some(300.0);
        a.avg_dollar_vol_10 = Some(0.0);
        let d = decorate_sector(&def, &snapshot(vec![a]));
        assert_eq!(d.rel_vol_sum_ratio, None);

        let empty = decorate_sector(&def, &MetricMap::new());
        assert_eq!(empty.dollar_vol_today_sum, None);
        assert_eq!(empty.rel_vol_sum_ratio, None);
    }

    #[test]
    fn inactive_and_missing_members_listed_but_not_aggregated() {
        let def = SectorDefinition::new("s1", "S1", ["A", "B", "C"]).unwrap();
        let mut b = metric("B", Some(50.0), Some(9.0));
        b.inactive = true;
        let metrics = snapshot(vec![metric("A", Some(1.0), Some(1.0)), b]);

        let d = decorate_sector(&def, &metrics);

        assert_eq!(d.change_1d_median, Some(1.0));
        assert_eq!(d.rel_vol_median, Some(1.0));
        assert_eq!(d.leaders.len(), 1);
        assert_eq!(d.members_detail.len(), 3);
        assert!(d.members_detail[1].inactive);
        assert!(!d.members_detail[2].has_data);
    }

    #[test]
    fn sector_five_day_median_excludes_short_histories() {
        let def = SectorDefinition::new("s1", "S1", ["A", "B", "C"]).unwrap();
        let mut a = metric("A", None, None);
        a.history = closes_history(&[100.0, 1.0, 1.0, 1.0, 1.0, 110.0]);
        let mut b = metric("B", None, None);
        b.history = closes_history(&[100.0, 1.0, 1.0, 1.0, 1.0, 130.0]);
        let mut c = metric("C", None, None);
        c.history = closes_history(&[100.0, 500.0]);

        let d = decorate_sector(&def, &snapshot(vec![a, b, c]));

        let m = d.change_5d_median.unwrap();
        assert!((m - 20.0).abs() < 1e-9);
        assert_eq!(d.members_detail[2].change_5d, None);
    }

    #[test]
    fn last_updated_is_latest_member() {
        let def = SectorDefinition::new("s1", "S1", ["A", "B"]).unwrap();
        let mut a = metric("A", None, None);
        a.last_updated = Some("2024-05-01".into());
        let mut b = metric("B", None, None);
        b.last_updated = Some("2024-05-03".into());
        let d = decorate_sector(&def, &snapshot(vec![a, b]));
        assert_eq!(d.last_updated.as_deref(), Some("2024-05-03"));
    }
}
