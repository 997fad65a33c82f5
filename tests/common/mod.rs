//! In-memory stand-in for a Graphite installation.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use graphite_adapter::clock::MockClock;
use graphite_adapter::metrics_input::MetricsInput;
use graphite_adapter::metrics_output::MetricOutput;
use graphite_adapter::model::{QueryRequest, RawSeries};
use graphite_adapter::write::Record;
use graphite_adapter::{AdapterError, GraphiteAdapter, GraphiteConfig, Result};

/// Accepts plaintext payloads like Carbon and serves them like the render
/// API. Like Graphite, a later sample for the same name and second replaces
/// the earlier one, and queries return buckets from `from` inclusive.
#[derive(Default)]
pub struct MemoryStore {
    series: Mutex<BTreeMap<String, BTreeMap<i64, f64>>>,
    payloads: Mutex<Vec<String>>,
    queries: Mutex<Vec<QueryRequest>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<QueryRequest> {
        self.queries.lock().unwrap().clone()
    }

    pub fn sample_count(&self) -> usize {
        self.series.lock().unwrap().values().map(BTreeMap::len).sum()
    }
}

impl MetricOutput for MemoryStore {
    type Error = AdapterError;

    async fn send_payload(&self, payload: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AdapterError::Transport("connection refused".into()));
        }
        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let mut series = self.series.lock().unwrap();
        for line in text.lines() {
            let fields: Vec<&str> = line.split(' ').collect();
            let &[name, value, timestamp] = fields.as_slice() else {
                return Err(AdapterError::Transport(format!("bad line {line:?}")));
            };
            let value: f64 = value.parse().unwrap();
            let timestamp: i64 = timestamp.parse().unwrap();
            series
                .entry(name.to_string())
                .or_default()
                .insert(timestamp, value);
        }
        self.payloads.lock().unwrap().push(text);
        Ok(())
    }
}

impl MetricsInput for MemoryStore {
    type Error = AdapterError;

    async fn load_series(&self, request: &QueryRequest) -> Result<Vec<RawSeries>> {
        self.queries.lock().unwrap().push(request.clone());

        let from = request.interval.from.map(|from| from.timestamp());
        let until = request.interval.until.timestamp();

        let series = self.series.lock().unwrap();
        Ok(series
            .iter()
            .filter(|(name, _)| glob_matches(request.target.as_str(), name))
            .map(|(name, samples)| RawSeries {
                target: name.clone(),
                datapoints: samples
                    .range(from.unwrap_or(i64::MIN)..=until)
                    .map(|(timestamp, value)| (Some(*value), *timestamp as f64))
                    .collect(),
            })
            .collect())
    }
}

/// Graphite globbing: `.` separates segments, `*` and `?` stay within one,
/// `{a,b}` picks alternatives.
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let name: Vec<&str> = name.split('.').collect();
    pattern.len() == name.len()
        && pattern.iter().zip(&name).all(|(pattern, segment)| {
            let pattern: Vec<char> = pattern.chars().collect();
            let segment: Vec<char> = segment.chars().collect();
            segment_matches(&pattern, &segment)
        })
}

fn segment_matches(pattern: &[char], segment: &[char]) -> bool {
    match pattern.first() {
        None => segment.is_empty(),
        Some('*') => (0..=segment.len()).any(|i| segment_matches(&pattern[1..], &segment[i..])),
        Some('?') => !segment.is_empty() && segment_matches(&pattern[1..], &segment[1..]),
        Some('{') => {
            let Some(close) = pattern.iter().position(|c| *c == '}') else {
                return false;
            };
            let rest = &pattern[close + 1..];
            pattern[1..close].split(|c| *c == ',').any(|alternative| {
                let mut candidate = alternative.to_vec();
                candidate.extend_from_slice(rest);
                segment_matches(&candidate, segment)
            })
        }
        Some(c) => segment.first() == Some(c) && segment_matches(&pattern[1..], &segment[1..]),
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// A fixed, whole-second "now" for tests.
pub const NOW: i64 = 1_700_000_000;

pub fn setup() -> (
    GraphiteAdapter<MemoryStore, MemoryStore>,
    Arc<MemoryStore>,
    Arc<MockClock>,
) {
    let store = Arc::new(MemoryStore::default());
    let clock = Arc::new(MockClock::with_time(at(NOW)));
    let adapter = GraphiteAdapter::new(
        GraphiteConfig::default(),
        store.clone(),
        store.clone(),
        clock.clone(),
    );
    (adapter, store, clock)
}

pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}
