//! Read options and their resolution into a concrete query window.
//!
//! A read is bounded by either `-last <duration>` or `-from`/`-to`. The
//! reserved `-to :end:` turns the read into a live tail. All instants are
//! truncated to whole seconds since Graphite stores nothing finer.

use chrono::{DateTime, Duration, SubsecRound, Utc};

use crate::clock::Clock;
use crate::error::{AdapterError, Result};
use crate::model::Interval;

pub const OPTION_FROM: &str = "from";
pub const OPTION_TO: &str = "to";
pub const OPTION_LAST: &str = "last";

/// Options a Graphite read understands.
pub const READ_OPTIONS: [&str; 3] = [OPTION_FROM, OPTION_TO, OPTION_LAST];

// Upper bound accepted by chrono's second-based constructors.
const MAX_DURATION_SECS: i64 = i64::MAX / 1_000;

/// A time expression as written in a read statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeExpr {
    Now,
    /// Unbounded end: the read tails new points until cancelled.
    End,
    At(DateTime<Utc>),
    Ago(Duration),
}

impl TimeExpr {
    /// Parses `now`, `end`, RFC 3339 instants and `<n> <unit> ago`.
    ///
    /// Surrounding colons (`:5 minutes ago:`) are accepted and ignored.
    pub fn parse(option: &str, text: &str) -> Result<Self> {
        let text = strip_colons(text);
        match text.to_ascii_lowercase().as_str() {
            "now" => return Ok(TimeExpr::Now),
            "end" => return Ok(TimeExpr::End),
            _ => {}
        }
        if let Some(duration) = text.strip_suffix("ago") {
            return parse_duration(option, duration).map(TimeExpr::Ago);
        }
        DateTime::parse_from_rfc3339(text)
            .map(|time| TimeExpr::At(time.with_timezone(&Utc)))
            .map_err(|e| AdapterError::invalid_option(option, format!("{text:?}: {e}")))
    }

    fn resolve(&self, option: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let instant = match self {
            TimeExpr::Now => now,
            TimeExpr::End => return Ok(None),
            TimeExpr::At(time) => time.trunc_subsecs(0),
            TimeExpr::Ago(duration) => now
                .checked_sub_signed(*duration)
                .ok_or_else(|| AdapterError::invalid_option(option, "time out of range"))?
                .trunc_subsecs(0),
        };
        Ok(Some(instant))
    }
}

/// Parses durations such as `5 minutes`, `2h` or `:30 seconds:`.
pub fn parse_duration(option: &str, text: &str) -> Result<Duration> {
    let text = strip_colons(text);
    let invalid = |reason: &str| AdapterError::invalid_option(option, format!("{text:?}: {reason}"));

    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid("expected <n> <unit>"))?;
    let unit_secs = match unit.trim().to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        _ => return Err(invalid("unknown unit")),
    };
    let secs = amount
        .checked_mul(unit_secs)
        .filter(|secs| *secs <= MAX_DURATION_SECS)
        .ok_or_else(|| invalid("duration too large"))?;
    Ok(Duration::seconds(secs))
}

fn strip_colons(text: &str) -> &str {
    let text = text.trim();
    let text = text.strip_prefix(':').unwrap_or(text);
    text.strip_suffix(':').unwrap_or(text).trim()
}

/// Value of a single read option as supplied by the host language.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Time(TimeExpr),
    Duration(Duration),
    Text(String),
}

/// Recognized read options, prior to resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    pub from: Option<TimeExpr>,
    pub to: Option<TimeExpr>,
    pub last: Option<Duration>,
}

impl ReadOptions {
    /// Collects options, rejecting any name outside [`READ_OPTIONS`].
    pub fn from_options<K, I>(options: I) -> Result<Self>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, OptionValue)>,
    {
        let options: Vec<(K, OptionValue)> = options.into_iter().collect();
        if let Some((name, _)) = options
            .iter()
            .find(|(name, _)| !READ_OPTIONS.contains(&name.as_ref()))
        {
            return Err(AdapterError::UnknownOption(name.as_ref().to_string()));
        }

        let mut read_options = ReadOptions::default();
        for (name, value) in options {
            let name = name.as_ref();
            match name {
                OPTION_FROM => read_options.from = Some(time_value(name, value)?),
                OPTION_TO => read_options.to = Some(time_value(name, value)?),
                _ => read_options.last = Some(duration_value(name, value)?),
            }
        }
        Ok(read_options)
    }
}

fn time_value(option: &str, value: OptionValue) -> Result<TimeExpr> {
    match value {
        OptionValue::Time(time) => Ok(time),
        OptionValue::Text(text) => TimeExpr::parse(option, &text),
        OptionValue::Duration(_) => Err(AdapterError::invalid_option(
            option,
            "expected a moment, got a duration",
        )),
    }
}

fn duration_value(option: &str, value: OptionValue) -> Result<Duration> {
    match value {
        OptionValue::Duration(duration) => Ok(duration),
        OptionValue::Text(text) => parse_duration(option, &text),
        OptionValue::Time(_) => Err(AdapterError::invalid_option(
            option,
            "expected a duration, got a moment",
        )),
    }
}

/// Upper end of a resolved time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEnd {
    At(DateTime<Utc>),
    Live,
}

/// A resolved read window. The start is always exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: RangeEnd,
}

impl TimeRange {
    pub fn is_live(&self) -> bool {
        self.end == RangeEnd::Live
    }

    /// The bounded query window, or `None` for a live tail.
    pub fn interval(&self) -> Option<Interval> {
        match self.end {
            RangeEnd::At(until) => Some(Interval {
                from: self.start,
                until,
            }),
            RangeEnd::Live => None,
        }
    }
}

/// Resolves relative expressions against `clock` and checks the result.
pub fn resolve(options: &ReadOptions, clock: &dyn Clock) -> Result<TimeRange> {
    let now = clock.now().trunc_subsecs(0);

    if let Some(last) = options.last {
        if options.from.is_some() || options.to.is_some() {
            return Err(AdapterError::ConflictingTimeRange);
        }
        if last <= Duration::zero() {
            return Err(AdapterError::invalid_option(
                OPTION_LAST,
                "duration must be positive",
            ));
        }
        let start = now
            .checked_sub_signed(last)
            .ok_or_else(|| AdapterError::invalid_option(OPTION_LAST, "time out of range"))?
            .trunc_subsecs(0);
        return Ok(TimeRange {
            start: Some(start),
            end: RangeEnd::At(now),
        });
    }

    if options.from.is_none() && options.to.is_none() {
        return Err(AdapterError::MissingTimeRange);
    }

    let start = match &options.from {
        Some(TimeExpr::End) => {
            return Err(AdapterError::invalid_option(
                OPTION_FROM,
                ":end: is only valid for -to",
            ))
        }
        Some(from) => from.resolve(OPTION_FROM, now)?,
        None => None,
    };
    let end = match &options.to {
        Some(to) => match to.resolve(OPTION_TO, now)? {
            Some(until) => RangeEnd::At(until),
            None => RangeEnd::Live,
        },
        None => RangeEnd::At(now),
    };

    match end {
        RangeEnd::Live => Ok(TimeRange {
            start: Some(start.unwrap_or(now)),
            end,
        }),
        RangeEnd::At(until) => {
            if let Some(from) = start.filter(|from| *from > until) {
                return Err(AdapterError::InvalidTimeRange {
                    from: from.to_rfc3339(),
                    to: until.to_rfc3339(),
                });
            }
            Ok(TimeRange { start, end })
        }
    }
}
