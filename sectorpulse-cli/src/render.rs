//! Plain-text tables for the terminal.

use sectorpulse_client::{HealthSnapshot, MutationTask, View};
use sectorpulse_core::{LeaderboardRow, SectorDefinition};

pub fn pct(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:+.2}%"),
        _ => "n/a".into(),
    }
}

pub fn ratio(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.2}x"),
        _ => "n/a".into(),
    }
}

pub fn dollars(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let abs = v.abs();
            if abs >= 1e9 {
                format!("${:.2}B", v / 1e9)
            } else if abs >= 1e6 {
                format!("${:.1}M", v / 1e6)
            } else if abs >= 1e3 {
                format!("${:.1}K", v / 1e3)
            } else {
                format!("${v:.0}")
            }
        }
        _ => "n/a".into(),
    }
}

fn score(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.2}"),
        _ => "n/a".into(),
    }
}

pub fn print_leaderboard(view: View, rows: &[LeaderboardRow], limit: usize) {
    if rows.is_empty() {
        println!("No rows match the current filters.");
        return;
    }
    match view {
        View::Sectors => {
            println!(
                "{:>4} {:<14} {:<26} {:>9} {:>9} {:>8} {:>10}  Leaders",
                "#", "Id", "Name", "1D", "5D", "RelVol", "$Vol"
            );
            println!("{}", "-".repeat(100));
            for (i, r) in rows.iter().take(limit).enumerate() {
                let leaders: Vec<&str> = r.leaders.iter().map(|m| m.symbol.as_str()).collect();
                println!(
                    "{:>4} {:<14} {:<26} {:>9} {:>9} {:>8} {:>10}  {}",
                    i + 1,
                    r.id,
                    truncate(&r.name, 26),
                    pct(r.change_1d),
                    pct(r.change_5d),
                    ratio(r.rel_volume),
                    dollars(r.dollar_volume),
                    leaders.join(" ")
                );
            }
        }
        View::Tickers => {
            println!(
                "{:>4} {:<8} {:<22} {:>9} {:>9} {:>8} {:>10}",
                "#", "Ticker", "Sector", "1D", "5D", "RelVol", "$Vol"
            );
            println!("{}", "-".repeat(76));
            for (i, r) in rows.iter().take(limit).enumerate() {
                let marker = if r.inactive { " (inactive)" } else { "" };
                println!(
                    "{:>4} {:<8} {:<22} {:>9} {:>9} {:>8} {:>10}{}",
                    i + 1,
                    r.name,
                    truncate(r.sector_name.as_deref().unwrap_or(""), 22),
                    pct(r.change_1d),
                    pct(r.change_5d),
                    ratio(r.rel_volume),
                    dollars(r.dollar_volume),
                    marker
                );
            }
        }
        View::Ralph => {
            println!(
                "{:>4} {:<8} {:<22} {:>7} {:>10} {:>10} {:>9} {:>10}",
                "#", "Ticker", "Sector", "Score", "Off High", "To High", "1D", "$Vol"
            );
            println!("{}", "-".repeat(86));
            for (i, r) in rows.iter().take(limit).enumerate() {
                let sector = r.sector_name.as_deref().or(r.sector_id.as_deref()).unwrap_or("");
                println!(
                    "{:>4} {:<8} {:<22} {:>7} {:>10} {:>10} {:>9} {:>10}",
                    i + 1,
                    r.name,
                    truncate(sector, 22),
                    score(r.score),
                    pct(r.pct_off_high),
                    pct(r.gain_to_high),
                    pct(r.change_1d),
                    dollars(r.dollar_volume)
                );
            }
        }
    }
    if rows.len() > limit {
        println!("... {} more (use --limit)", rows.len() - limit);
    }
}

pub fn print_health(health: &HealthSnapshot) {
    println!("=== Snapshot ===");
    println!("As of:    {}", health.as_of_date.as_deref().unwrap_or("unknown"));
    if let Some(time) = &health.as_of_time {
        println!("Time:     {time}");
    }
    println!("Sectors:  {}", health.sector_count);
    println!("Tickers:  {}", health.ticker_count);
    println!("Stale:    {}", if health.stale { "yes" } else { "no" });
}

pub fn print_definitions(definitions: &[SectorDefinition]) {
    println!("{:<16} {:<28} {:>7}  Tickers", "Id", "Name", "Members");
    println!("{}", "-".repeat(80));
    for d in definitions {
        println!(
            "{:<16} {:<28} {:>7}  {}",
            d.id,
            truncate(&d.name, 28),
            d.tickers.len(),
            d.tickers.join(" ")
        );
    }
}

pub fn print_task(task: &MutationTask) {
    let symbol = task.meta.symbol.as_deref().unwrap_or("");
    println!(
        "{:?} {} {} -> {:?} (task {}, {} polls){}",
        task.action,
        task.entity_id,
        symbol,
        task.state,
        task.task_id.as_deref().unwrap_or("-"),
        task.attempts,
        task.message
            .as_deref()
            .map(|m| format!(": {m}"))
            .unwrap_or_default()
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_missing_values() {
        assert_eq!(pct(None), "n/a");
        assert_eq!(pct(Some(f64::INFINITY)), "n/a");
        assert_eq!(pct(Some(1.234)), "+1.23%");
        assert_eq!(pct(Some(-0.5)), "-0.50%");
        assert_eq!(ratio(Some(1.5)), "1.50x");
    }

    #[test]
    fn formats_dollar_magnitudes() {
        assert_eq!(dollars(Some(2_500_000_000.0)), "$2.50B");
        assert_eq!(dollars(Some(42_000_000.0)), "$42.0M");
        assert_eq!(dollars(Some(1_500.0)), "$1.5K");
        assert_eq!(dollars(Some(12.0)), "$12");
        assert_eq!(dollars(None), "n/a");
    }

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate("Technology", 26), "Technology");
        assert_eq!(truncate("Semiconductors", 6), "Semic…");
    }
}
