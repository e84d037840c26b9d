//! SectorPulse Core: domain types, sector aggregation, leaderboards, symbol validation.
//!
//! Everything in this crate is pure and synchronous:
//! - Domain types (ticker metrics, sector definitions, decorated sectors)
//! - Symbol and sector-id normalization
//! - Sector Metrics Aggregator with a pluggable change weighting
//! - YTD "ralph" metrics
//! - Leaderboard builders, filters and a deterministic total sort order
//! - The seeded sector universe

pub mod aggregate;
pub mod domain;
pub mod leaderboard;
pub mod ralph;
pub mod symbol;
pub mod universe;

pub use aggregate::{decorate_sector, median, ChangeWeighting, MedianFallback, SectorAggregator};
pub use domain::{
    DailyPoint, DecoratedSector, MemberDetail, MemberMove, MetricMap, RankedTicker,
    SectorDefinition, TickerMetric,
};
pub use leaderboard::{
    build_leaderboard, LeaderboardRow, RowFilter, RowKind, SortDirection, SortKey, VolumeFloor,
};
pub use ralph::{ralph_metrics, RalphMetrics};
pub use symbol::{normalize_sector_id, normalize_symbol, ValidationError};
pub use universe::{Universe, UniverseError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: domain types cross thread and task boundaries.
    ///
    /// The client shares snapshots between the cache, the dashboard and spawned
    /// poll loops, so every type here must stay Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TickerMetric>();
        require_sync::<TickerMetric>();
        require_send::<SectorDefinition>();
        require_sync::<SectorDefinition>();
        require_send::<DecoratedSector>();
        require_sync::<DecoratedSector>();
        require_send::<RankedTicker>();
        require_sync::<RankedTicker>();
        require_send::<LeaderboardRow>();
        require_sync::<LeaderboardRow>();
        require_send::<RowFilter>();
        require_sync::<RowFilter>();
        require_send::<Universe>();
        require_sync::<Universe>();
        require_send::<ValidationError>();
        require_sync::<ValidationError>();

        require_send::<SectorAggregator>();
        require_sync::<SectorAggregator>();
    }

    /// Weightings are used behind `Box<dyn _>`, so the trait must stay object safe.
    #[test]
    fn change_weighting_is_object_safe() {
        fn _build(w: Box<dyn ChangeWeighting>) -> SectorAggregator {
            SectorAggregator::new(w)
        }
        let agg = SectorAggregator::new(Box::new(MedianFallback));
        let def = SectorDefinition::new("x", "X", ["AAPL"]).unwrap();
        let decorated = agg.decorate(&def, &MetricMap::new());
        assert_eq!(decorated.change_1d_weighted, None);
    }
}
