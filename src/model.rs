use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single metric sample, as read from or written to Graphite.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Point {
    pub time: DateTime<Utc>,
    pub name: String,
    pub value: f64,
}

impl Point {
    pub fn new(name: impl Into<String>, time: DateTime<Utc>, value: f64) -> Self {
        Self {
            time,
            name: name.into(),
            value,
        }
    }
}

/// Store-facing metric name or wildcard pattern, passed to the render API verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetPattern(String);

impl TargetPattern {
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query window `(from, until]`, at one-second resolution.
///
/// A `None` lower bound leaves the start to the store's default lookback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub from: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

impl Interval {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| time > from) && time <= self.until
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_some_and(|from| from >= self.until)
    }
}

/// Compiled query against the render endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub target: TargetPattern,
    pub interval: Interval,
}

/// One series of a render API response: `{"target": .., "datapoints": [[value, ts], ..]}`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub target: String,
    #[serde(default)]
    pub datapoints: Vec<(Option<f64>, f64)>,
}

/// Warnings and errors surfaced by a single write invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl WriteOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
