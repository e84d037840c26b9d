//! SectorPulse Client: response caching, remote API, mutation tasks, persistence.
//!
//! This crate builds on `sectorpulse-core` to provide:
//! - Response cache with TTL, in-flight coalescing and a durable mirror
//! - Typed remote API over a pluggable transport (reqwest by default)
//! - Mutation task orchestrator: single-flight per sector, polling with backoff
//! - Versioned preference, definition and trend persistence
//! - `Dashboard` state hub with broadcast events
//! - TOML configuration with environment override

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod orchestrator;
pub mod storage;
pub mod store;

pub use api::{
    metric_map, Freshness, HealthSnapshot, HttpTransport, MarketApi, SectorVolumeDto, TaskRecord,
    TaskStatus, Transport,
};
pub use cache::{CacheConfig, CacheError, CacheStats, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, ConfigError};
pub use dashboard::{Dashboard, DashboardEvent};
pub use error::ClientError;
pub use orchestrator::{
    MutationAction, MutationError, MutationEvent, MutationMeta, MutationTask, Orchestrator,
    PollPolicy, TaskSource, TaskState,
};
pub use storage::{DurableStore, FileStore, MemoryStore, StorageError};
pub use store::{DefinitionStore, PreferenceStore, SortPrefs, TrendCache, View, ViewState};
