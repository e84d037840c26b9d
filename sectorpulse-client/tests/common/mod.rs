//! Shared fixtures: a scripted in-memory transport and payload builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use sectorpulse_client::{ClientError, Transport};

pub const BASE_URL: &str = "http://fake.test";

type Response = Result<Value, ClientError>;

/// Routes are keyed by `"METHOD path"` with any query string stripped. Each route
/// replays its queued responses in order and repeats the last one forever.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: &str, path: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .entry(format!("{method} {path}"))
            .or_default()
            .push_back(response);
        self
    }

    /// Drop whatever is queued for the route and serve `response` from now on.
    pub fn replace(&self, method: &str, path: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .insert(format!("{method} {path}"), VecDeque::from([response]));
        self
    }

    /// Every GET sleeps this long first (tokio time, so paused clocks apply).
    pub fn set_get_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Full request lines, query strings included.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        let route = format!("{method} {path}");
        self.calls
            .lock()
            .iter()
            .filter(|c| route_of(c) == route)
            .count()
    }

    fn respond(&self, method: &str, path: &str) -> Response {
        let line = format!("{method} {path}");
        let route = route_of(&line).to_string();
        self.calls.lock().push(line);
        let mut routes = self.routes.lock();
        match routes.get_mut(&route) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Ok(Value::Null)),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(Value::Null)),
            None => Err(ClientError::Http {
                status: 404,
                message: format!("no route for {route}"),
            }),
        }
    }
}

fn route_of(line: &str) -> &str {
    line.split('?').next().unwrap_or(line)
}

#[async_trait]
impl Transport for FakeTransport {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.respond("GET", path)
    }

    async fn post_json(&self, path: &str, _body: Value) -> Result<Value, ClientError> {
        self.respond("POST", path)
    }

    async fn delete_json(&self, path: &str) -> Result<Value, ClientError> {
        self.respond("DELETE", path)
    }
}

/// A member row as served in `members_detail`.
pub fn member(ticker: &str, change_1d: f64, rel_vol: f64, dollar_vol: f64) -> Value {
    json!({
        "ticker": ticker,
        "change1d": change_1d,
        "relVol10": rel_vol,
        "dollarVolToday": dollar_vol,
        "avgDollarVol10": dollar_vol,
        "inactive": false,
        "history": [],
    })
}

pub fn sector(id: &str, name: &str, members: Vec<Value>) -> Value {
    let tickers: Vec<Value> = members.iter().map(|m| m["ticker"].clone()).collect();
    json!({
        "id": id,
        "name": name,
        "members": tickers,
        "leaders": [],
        "members_detail": members,
    })
}

pub fn task_status(id: &str, status: &str) -> Value {
    json!({ "id": id, "status": status, "message": null, "meta": {} })
}

pub fn health(stale: bool) -> Value {
    json!({
        "asOfDate": "2024-03-01",
        "sectors_count": 2,
        "members_count": 5,
        "stale": stale,
    })
}
