use chrono::{TimeZone, Utc};

use crate::error::{AdapterError, Result};
use crate::model::{Point, RawSeries};

/// Converts render API series into points ordered by time, then name.
///
/// Null datapoints are Graphite's empty buckets and produce no point; a
/// value of `0` is a real sample and is kept. Timestamps are truncated to
/// whole seconds.
pub fn normalize(series: Vec<RawSeries>) -> Result<Vec<Point>> {
    let mut points = Vec::new();

    for RawSeries { target, datapoints } in series {
        for (value, timestamp) in datapoints {
            let Some(value) = value else {
                continue;
            };
            if !timestamp.is_finite() {
                return Err(AdapterError::Transport(format!(
                    "malformed response: non-finite timestamp in series {target}"
                )));
            }
            let time = Utc
                .timestamp_opt(timestamp.trunc() as i64, 0)
                .single()
                .ok_or_else(|| {
                    AdapterError::Transport(format!(
                        "malformed response: timestamp {timestamp} out of range in series {target}"
                    ))
                })?;
            points.push(Point::new(target.clone(), time, value));
        }
    }

    points.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.name.cmp(&b.name)));
    Ok(points)
}
