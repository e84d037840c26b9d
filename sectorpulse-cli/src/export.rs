//! CSV export of leaderboard rows.

use std::path::Path;

use anyhow::{Context, Result};
use sectorpulse_core::LeaderboardRow;

/// Columns: rank, id, name, kind, sector_id, sector_name, change_1d, change_5d,
/// rel_volume, dollar_volume, score, pct_off_high, gain_to_high, inactive, members
pub fn leaderboard_csv(rows: &[LeaderboardRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "rank",
        "id",
        "name",
        "kind",
        "sector_id",
        "sector_name",
        "change_1d",
        "change_5d",
        "rel_volume",
        "dollar_volume",
        "score",
        "pct_off_high",
        "gain_to_high",
        "inactive",
        "members",
    ])?;

    for (i, r) in rows.iter().enumerate() {
        wtr.write_record([
            &(i + 1).to_string(),
            &r.id,
            &r.name,
            &format!("{:?}", r.kind).to_lowercase(),
            r.sector_id.as_deref().unwrap_or(""),
            r.sector_name.as_deref().unwrap_or(""),
            &num(r.change_1d, 4),
            &num(r.change_5d, 4),
            &num(r.rel_volume, 4),
            &num(r.dollar_volume, 0),
            &num(r.score, 4),
            &num(r.pct_off_high, 4),
            &num(r.gain_to_high, 4),
            &r.inactive.to_string(),
            &r.members.join(" "),
        ])?;
    }

    let bytes = wtr.into_inner().context("flushing CSV buffer")?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_leaderboard_csv(rows: &[LeaderboardRow], path: &Path) -> Result<()> {
    let content = leaderboard_csv(rows)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Missing and non-finite values export as empty cells.
fn num(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => String::new(),
    }
}
