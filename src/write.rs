//! Write path: per-record validation followed by one batched transmission.
//!
//! Records that lack a usable `name` or `value` are dropped with a warning
//! and never reach Carbon. Everything that passes is encoded as
//! `<name> <value> <epoch-seconds>` lines and sent as a single payload.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::AdapterError;
use crate::metrics_output::MetricOutput;
use crate::model::{Point, WriteOutcome};

/// A record handed to a write statement.
pub type Record = Map<String, Value>;

pub const NAME_FIELD: &str = "name";
pub const VALUE_FIELD: &str = "value";
pub const TIME_FIELD: &str = "time";

/// Why a record was not written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingField(&'static str),
    InvalidTime(String),
    NameContainsWhitespace(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingField(field) => {
                write!(f, "required field \"{field}\" not found in data")
            }
            Rejection::InvalidTime(raw) => write!(f, "invalid time value {raw} in data"),
            Rejection::NameContainsWhitespace(name) => {
                write!(f, "field \"name\" contains whitespace: {name:?}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validated {
    Valid(Point),
    Invalid(Rejection),
}

/// Checks a single record. `emitted_at` stands in for a missing `time`.
pub fn validate(record: &Record, emitted_at: DateTime<Utc>) -> Validated {
    let name = match record.get(NAME_FIELD) {
        Some(Value::String(name)) if !name.is_empty() => name,
        _ => return Validated::Invalid(Rejection::MissingField(NAME_FIELD)),
    };
    let Some(value) = record.get(VALUE_FIELD).and_then(Value::as_f64) else {
        return Validated::Invalid(Rejection::MissingField(VALUE_FIELD));
    };
    if name.chars().any(char::is_whitespace) {
        return Validated::Invalid(Rejection::NameContainsWhitespace(name.clone()));
    }

    let time = match record.get(TIME_FIELD) {
        None | Some(Value::Null) => emitted_at,
        Some(raw) => match parse_time(raw) {
            Some(time) => time,
            None => return Validated::Invalid(Rejection::InvalidTime(raw.to_string())),
        },
    };

    Validated::Valid(Point::new(name.clone(), time.trunc_subsecs(0), value))
}

fn parse_time(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|time| time.with_timezone(&Utc)),
        Value::Number(number) => {
            let secs = number.as_f64().filter(|secs| secs.is_finite())?;
            Utc.timestamp_opt(secs.trunc() as i64, 0).single()
        }
        _ => None,
    }
}

/// Splits records into writable points and rejections, keeping input order.
pub fn partition<I>(records: I, emitted_at: DateTime<Utc>) -> (Vec<Point>, Vec<Rejection>)
where
    I: IntoIterator<Item = Record>,
{
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for record in records {
        match validate(&record, emitted_at) {
            Validated::Valid(point) => valid.push(point),
            Validated::Invalid(rejection) => rejected.push(rejection),
        }
    }
    (valid, rejected)
}

/// Encodes points in Carbon's plaintext protocol, one line per point.
pub fn encode(points: &[Point]) -> String {
    let mut payload = String::with_capacity(points.len() * 48);
    for point in points {
        // writing into a String cannot fail
        let _ = writeln!(
            payload,
            "{} {} {}",
            point.name,
            point.value,
            point.time.timestamp()
        );
    }
    payload
}

/// Sends validated points to the ingestion endpoint as one batch.
pub struct WriteBatcher<O> {
    output: Arc<O>,
}

impl<O: MetricOutput> WriteBatcher<O> {
    pub fn new(output: Arc<O>) -> Self {
        Self { output }
    }

    /// A failed transmission yields exactly one error for the whole batch.
    pub async fn send(&self, points: &[Point]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        if points.is_empty() {
            return outcome;
        }

        let payload = encode(points);
        match self.output.send_payload(payload.as_bytes()).await {
            Ok(()) => debug!(points = points.len(), bytes = payload.len(), "sent batch"),
            Err(e) => {
                let e: AdapterError = e.into();
                warn!(points = points.len(), error = %e, "failed to send batch");
                outcome.errors.push(e.to_string());
            }
        }
        outcome
    }
}

/// Validates and sends the records of one write invocation.
pub struct GraphiteWriter<O> {
    batcher: WriteBatcher<O>,
    clock: Arc<dyn Clock>,
}

impl<O: MetricOutput> GraphiteWriter<O> {
    pub fn new(output: Arc<O>, clock: Arc<dyn Clock>) -> Self {
        Self {
            batcher: WriteBatcher::new(output),
            clock,
        }
    }

    /// Records without a `time` are stamped with the invocation time.
    pub async fn write<I>(&self, records: I) -> WriteOutcome
    where
        I: IntoIterator<Item = Record>,
    {
        let (points, rejected) = partition(records, self.clock.now());

        let warnings: Vec<String> = rejected
            .iter()
            .map(|rejection| {
                warn!(%rejection, "dropping point");
                rejection.to_string()
            })
            .collect();

        let sent = self.batcher.send(&points).await;
        WriteOutcome {
            warnings,
            errors: sent.errors,
        }
    }
}
