//! Remote market API: transport abstraction, wire DTOs and typed calls.
//!
//! Every payload is validated against its DTO before it is cached, so a
//! malformed response surfaces as `ClientError::Schema` and never poisons the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use sectorpulse_core::{
    normalize_sector_id, normalize_symbol, DailyPoint, MetricMap, RankedTicker, SectorDefinition,
    TickerMetric,
};

use crate::cache::ResponseCache;
use crate::error::ClientError;
use crate::orchestrator::TaskSource;

pub const SECTORS_VOLUME_PATH: &str = "/metrics/sectors/volume";
pub const SECTORS_RALPH_PATH: &str = "/metrics/sectors/ralph";
pub const HEALTH_SNAPSHOT_PATH: &str = "/health/snapshot";

/// Longest error body echoed back in `ClientError::Http`.
const MAX_ERROR_BODY: usize = 300;

// ── Transport ────────────────────────────────────────────────────────

/// Raw JSON over HTTP. Paths include any query string.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Base URL without a trailing slash. Cache keys are `base_url + path`.
    fn base_url(&self) -> &str;
    async fn get_json(&self, path: &str) -> Result<Value, ClientError>;
    async fn post_json(&self, path: &str, body: Value) -> Result<Value, ClientError>;
    async fn delete_json(&self, path: &str) -> Result<Value, ClientError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("base url '{base_url}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sectorpulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: error_detail(&body),
            });
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        tracing::debug!(path, "GET");
        self.send(self.client.get(self.url(path))).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        tracing::debug!(path, "POST");
        self.send(self.client.post(self.url(path)).json(&body)).await
    }

    async fn delete_json(&self, path: &str) -> Result<Value, ClientError> {
        tracing::debug!(path, "DELETE");
        self.send(self.client.delete(self.url(path))).await
    }
}

/// Human-readable message from an error body: `{"detail": ...}` when present,
/// otherwise the (truncated) raw text.
fn error_detail(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        match map.get("detail") {
            Some(Value::String(s)) => return s.clone(),
            Some(other) => return other.to_string(),
            None => {}
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

// ── Wire DTOs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricDto {
    pub date: NaiveDate,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default, rename = "dollarVolume", alias = "dollar_volume")]
    pub dollar_volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMetricDto {
    #[serde(alias = "symbol")]
    pub ticker: String,
    #[serde(default, rename = "change1d")]
    pub change_1d: Option<f64>,
    #[serde(default, rename = "relVol10")]
    pub rel_vol_10: Option<f64>,
    #[serde(default, rename = "dollarVolToday")]
    pub dollar_vol_today: Option<f64>,
    #[serde(default, rename = "avgDollarVol10")]
    pub avg_dollar_vol_10: Option<f64>,
    #[serde(default, rename = "lastUpdated")]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub history: Vec<DailyMetricDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderDto {
    pub ticker: String,
    #[serde(default, rename = "relVol10")]
    pub rel_vol_10: Option<f64>,
    #[serde(default, rename = "change1d")]
    pub change_1d: Option<f64>,
}

/// One sector from the volume snapshot. Server aggregates are informational; the
/// client recomputes its own from `members_detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorVolumeDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, rename = "relVol10_median")]
    pub rel_vol_10_median: Option<f64>,
    #[serde(default, rename = "dollarVol_today_sum")]
    pub dollar_vol_today_sum: Option<f64>,
    #[serde(default, rename = "avgDollarVol10_sum")]
    pub avg_dollar_vol_10_sum: Option<f64>,
    #[serde(default, rename = "change1d_median")]
    pub change_1d_median: Option<f64>,
    #[serde(default)]
    pub leaders: Vec<LeaderDto>,
    #[serde(default, rename = "lastUpdated")]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub members_detail: Vec<TickerMetricDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RalphRowDto {
    #[serde(alias = "symbol")]
    pub ticker: String,
    #[serde(default, rename = "sectorId")]
    pub sector_id: Option<String>,
    #[serde(default, rename = "sectorName", alias = "sector")]
    pub sector_name: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, rename = "pctOffHigh")]
    pub pct_off_high: Option<f64>,
    #[serde(default, rename = "gainToHigh")]
    pub gain_to_high: Option<f64>,
    #[serde(default, rename = "pctGainYtd")]
    pub pct_gain_ytd: Option<f64>,
    #[serde(default, rename = "change1d")]
    pub change_1d: Option<f64>,
    #[serde(default, rename = "relVol10")]
    pub rel_vol_10: Option<f64>,
    #[serde(default, rename = "dollarVolume")]
    pub dollar_volume: Option<f64>,
    #[serde(default, alias = "spark")]
    pub sparkline: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    #[serde(default, rename = "asOfDate")]
    pub as_of_date: Option<String>,
    #[serde(default, rename = "asOfTime")]
    pub as_of_time: Option<String>,
    #[serde(default, rename = "sectors_count")]
    pub sector_count: usize,
    #[serde(default, rename = "members_count")]
    pub ticker_count: usize,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<DailyMetricDto> for DailyPoint {
    fn from(d: DailyMetricDto) -> Self {
        DailyPoint {
            date: d.date,
            close: d.close,
            volume: d.volume,
            dollar_volume: d.dollar_volume,
        }
    }
}

impl TickerMetricDto {
    /// Convert to a domain metric, normalizing the symbol.
    pub fn into_metric(self) -> Result<TickerMetric, ClientError> {
        Ok(TickerMetric {
            symbol: normalize_symbol(&self.ticker)?,
            change_1d: self.change_1d,
            rel_vol_10: self.rel_vol_10,
            dollar_vol_today: self.dollar_vol_today,
            avg_dollar_vol_10: self.avg_dollar_vol_10,
            last_updated: self.last_updated,
            inactive: self.inactive,
            history: self.history.into_iter().map(DailyPoint::from).collect(),
        })
    }
}

impl From<RalphRowDto> for RankedTicker {
    fn from(r: RalphRowDto) -> Self {
        RankedTicker {
            symbol: r.ticker.trim().to_ascii_uppercase(),
            sector_id: r.sector_id,
            sector_name: r.sector_name,
            score: r.score,
            pct_off_high: r.pct_off_high,
            gain_to_high: r.gain_to_high,
            pct_gain_ytd: r.pct_gain_ytd,
            change_1d: r.change_1d,
            rel_vol_10: r.rel_vol_10,
            dollar_volume: r.dollar_volume,
            sparkline: r.sparkline,
        }
    }
}

/// Symbol → metric map across every sector's member detail. Members with an
/// unusable symbol are skipped.
pub fn metric_map(sectors: &[SectorVolumeDto]) -> MetricMap {
    let mut map = MetricMap::new();
    for detail in sectors.iter().flat_map(|s| s.members_detail.iter()) {
        match detail.clone().into_metric() {
            Ok(metric) => {
                map.entry(metric.symbol.clone()).or_insert(metric);
            }
            Err(e) => tracing::warn!(ticker = %detail.ticker, error = %e, "skipping member metric"),
        }
    }
    map
}

// ── Typed API ────────────────────────────────────────────────────────

/// Whether a GET may be served from the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    #[default]
    Cached,
    NoCache,
}

/// Typed calls over a `Transport`, with GETs routed through the response cache.
#[derive(Clone)]
pub struct MarketApi {
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
}

impl MarketApi {
    pub fn new(transport: Arc<dyn Transport>, cache: ResponseCache) -> Self {
        Self { transport, cache }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub fn cache_key(&self, path: &str) -> String {
        format!("{}{}", self.transport.base_url(), path)
    }

    /// Path for the volume snapshot, carrying the client's definitions when given.
    pub fn sectors_volume_path(definitions: &[SectorDefinition]) -> Result<String, ClientError> {
        if definitions.is_empty() {
            return Ok(SECTORS_VOLUME_PATH.to_string());
        }
        let payload = serde_json::to_string(&json!({ "sectors": definitions }))?;
        let encoded: String = url::form_urlencoded::byte_serialize(payload.as_bytes()).collect();
        Ok(format!("{SECTORS_VOLUME_PATH}?payload={encoded}"))
    }

    async fn fetch<T>(&self, path: String, freshness: Freshness) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = self.cache_key(&path);
        let transport = Arc::clone(&self.transport);
        let fetcher = move || async move {
            let value = transport.get_json(&path).await?;
            serde_json::from_value::<T>(value.clone())?;
            Ok::<Value, ClientError>(value)
        };
        let value = match freshness {
            Freshness::Cached => self.cache.get(&key, fetcher).await?,
            Freshness::NoCache => self.cache.get_fresh(&key, fetcher).await?,
        };
        Ok(serde_json::from_value(value)?)
    }

    pub async fn sectors_volume(
        &self,
        definitions: &[SectorDefinition],
        freshness: Freshness,
    ) -> Result<Vec<SectorVolumeDto>, ClientError> {
        let path = Self::sectors_volume_path(definitions)?;
        self.fetch(path, freshness).await
    }

    pub async fn ralph(&self, freshness: Freshness) -> Result<Vec<RankedTicker>, ClientError> {
        let rows: Vec<RalphRowDto> = self.fetch(SECTORS_RALPH_PATH.to_string(), freshness).await?;
        Ok(rows.into_iter().map(RankedTicker::from).collect())
    }

    pub async fn health(&self, freshness: Freshness) -> Result<HealthSnapshot, ClientError> {
        self.fetch(HEALTH_SNAPSHOT_PATH.to_string(), freshness).await
    }

    /// Start adding `symbol` to a sector. Returns the server task id.
    pub async fn add_ticker(&self, sector_id: &str, symbol: &str) -> Result<String, ClientError> {
        let sector_id = normalize_sector_id(sector_id)?;
        let symbol = normalize_symbol(symbol)?;
        let body = self
            .transport
            .post_json(&format!("/sectors/{sector_id}/tickers"), json!({ "symbol": symbol }))
            .await?;
        accepted(body)
    }

    pub async fn remove_ticker(&self, sector_id: &str, symbol: &str) -> Result<String, ClientError> {
        let sector_id = normalize_sector_id(sector_id)?;
        let symbol = normalize_symbol(symbol)?;
        let body = self
            .transport
            .delete_json(&format!(
                "/sectors/{sector_id}/tickers/{}",
                encode_segment(&symbol)
            ))
            .await?;
        accepted(body)
    }

    pub async fn create_sector(&self, definition: &SectorDefinition) -> Result<String, ClientError> {
        let body = self
            .transport
            .post_json(
                "/sectors",
                json!({
                    "id": definition.id,
                    "name": definition.name,
                    "tickers": definition.tickers,
                }),
            )
            .await?;
        accepted(body)
    }

    /// Current state of a server task. Never cached.
    pub async fn task(&self, task_id: &str) -> Result<TaskRecord, ClientError> {
        let body = self
            .transport
            .get_json(&format!("/tasks/{}", encode_segment(task_id)))
            .await?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl TaskSource for MarketApi {
    async fn task_status(&self, task_id: &str) -> Result<TaskRecord, ClientError> {
        self.task(task_id).await
    }
}

fn accepted(body: Value) -> Result<String, ClientError> {
    let accepted: TaskAccepted = serde_json::from_value(body)?;
    Ok(accepted.task_id)
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
