//! Year-to-date "ralph" metrics: how far a ticker has run this year and how close
//! it still trades to its YTD high.
//!
//! The score divides the YTD gain by the gain needed to get back to the high,
//! floored at one percent so names sitting at the high don't divide by zero.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::domain::{DailyPoint, RankedTicker};

/// Floor applied to the distance-from-high denominator.
pub const MIN_GAIN_TO_HIGH_PCT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RalphMetrics {
    /// Percent gain from the first close of the year to the YTD high close.
    pub pct_gain_ytd: f64,
    /// Percent the last close sits below the YTD high.
    pub pct_off_high: f64,
    /// Percent gain needed from the last close to regain the YTD high.
    pub gain_to_high: f64,
    pub score: f64,
}

/// Compute YTD metrics for the calendar year of the latest observation.
///
/// Returns `None` when the year has no valid closes or the base close is not positive.
pub fn ralph_metrics(history: &[DailyPoint]) -> Option<RalphMetrics> {
    let mut points: Vec<(chrono::NaiveDate, f64)> = history
        .iter()
        .filter_map(|p| p.close.filter(|c| c.is_finite()).map(|c| (p.date, c)))
        .collect();
    points.sort_by_key(|(date, _)| *date);

    let (last_date, last) = *points.last()?;
    let year = last_date.year();
    let ytd: Vec<f64> = points
        .iter()
        .filter(|(date, _)| date.year() == year)
        .map(|(_, close)| *close)
        .collect();

    let base = *ytd.first()?;
    if base <= 0.0 || last <= 0.0 {
        return None;
    }
    let high = ytd.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let pct_gain_ytd = (high / base - 1.0) * 100.0;
    let pct_off_high = ((1.0 - last / high) * 100.0).max(0.0);
    let gain_to_high = ((high / last - 1.0) * 100.0).max(0.0);
    let score = pct_gain_ytd / gain_to_high.max(MIN_GAIN_TO_HIGH_PCT);

    Some(RalphMetrics {
        pct_gain_ytd,
        pct_off_high,
        gain_to_high,
        score,
    })
}

impl RankedTicker {
    /// Fill YTD fields the server left empty from the ticker's price history.
    /// Server values are kept. Returns whether anything was filled.
    pub fn fill_from_history(&mut self, history: &[DailyPoint]) -> bool {
        let missing = self.score.is_none()
            || self.pct_off_high.is_none()
            || self.gain_to_high.is_none()
            || self.pct_gain_ytd.is_none();
        if !missing {
            return false;
        }
        let Some(m) = ralph_metrics(history) else {
            return false;
        };
        self.score.get_or_insert(m.score);
        self.pct_off_high.get_or_insert(m.pct_off_high);
        self.gain_to_high.get_or_insert(m.gain_to_high);
        self.pct_gain_ytd.get_or_insert(m.pct_gain_ytd);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn point(y: i32, m: u32, d: u32, close: f64) -> DailyPoint {
        DailyPoint {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            close: Some(close),
            volume: None,
            dollar_volume: None,
        }
    }

    #[test]
    fn basic_ytd_metrics() {
        let history = vec![
            point(2023, 12, 29, 95.0),
            point(2024, 1, 2, 100.0),
            point(2024, 2, 1, 120.0),
            point(2024, 3, 1, 108.0),
        ];

        let m = ralph_metrics(&history).unwrap();

        assert!((m.pct_gain_ytd - 20.0).abs() < 1e-9);
        assert!((m.gain_to_high - 11.111).abs() < 1e-3);
        assert!((m.pct_off_high - 10.0).abs() < 1e-9);
        assert!((m.score - 1.8).abs() < 1e-9);
    }

    #[test]
    fn at_the_high_uses_floor() {
        let history = vec![point(2024, 1, 2, 50.0), point(2024, 4, 1, 55.0)];

        let m = ralph_metrics(&history).unwrap();

        assert!((m.pct_gain_ytd - 10.0).abs() < 1e-9);
        assert_eq!(m.gain_to_high, 0.0);
        assert!((m.score - 10.0).abs() < 1e-9);
    }

    fn ranked(score: Option<f64>) -> RankedTicker {
        RankedTicker {
            symbol: "NVDA".into(),
            sector_id: None,
            sector_name: None,
            score,
            pct_off_high: None,
            gain_to_high: None,
            pct_gain_ytd: None,
            change_1d: None,
            rel_vol_10: None,
            dollar_volume: None,
            sparkline: vec![],
        }
    }

    #[test]
    fn fills_only_missing_fields() {
        let history = vec![
            point(2024, 1, 2, 100.0),
            point(2024, 2, 1, 120.0),
            point(2024, 3, 1, 108.0),
        ];

        let mut blank = ranked(None);
        assert!(blank.fill_from_history(&history));
        assert!((blank.score.unwrap() - 1.8).abs() < 1e-9);
        assert!((blank.pct_off_high.unwrap() - 10.0).abs() < 1e-9);
        assert!((blank.pct_gain_ytd.unwrap() - 20.0).abs() < 1e-9);

        let mut served = ranked(Some(7.0));
        served.fill_from_history(&history);
        assert_eq!(served.score, Some(7.0));
        assert!(served.gain_to_high.is_some());

        let mut no_history = ranked(None);
        assert!(!no_history.fill_from_history(&[]));
        assert_eq!(no_history.score, None);
    }

    #[test]
    fn empty_history_has_no_metrics() {
        assert_eq!(ralph_metrics(&[]), None);
    }
}
