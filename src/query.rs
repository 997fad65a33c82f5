//! Query execution: one-shot reads and live tails.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{AdapterError, Result};
use crate::metrics_input::MetricsInput;
use crate::model::{Interval, Point, QueryRequest, TargetPattern};
use crate::normalize::normalize;
use crate::time_range::TimeRange;

/// Points buffered between a live tail's poller and its consumer.
const TAIL_BUFFER: usize = 128;

pub type PointStream = BoxStream<'static, Result<Point>>;

/// Runs `request` once and keeps the points inside its window.
///
/// Graphite answers with whole buckets around the requested window, so the
/// exclusive `from` and inclusive `until` are enforced here.
pub async fn query_once<S: MetricsInput>(source: &S, request: &QueryRequest) -> Result<Vec<Point>> {
    if request.interval.is_empty() {
        return Ok(Vec::new());
    }

    let series = source
        .load_series(request)
        .await
        .map_err(Into::<AdapterError>::into)?;
    let points = normalize(series)?;
    Ok(points
        .into_iter()
        .filter(|point| request.interval.contains(point.time))
        .collect())
}

/// Executes compiled reads against a query endpoint.
pub struct QueryExecutor<S> {
    source: Arc<S>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl<S: MetricsInput> QueryExecutor<S> {
    pub fn new(source: Arc<S>, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            source,
            clock,
            poll_interval,
        }
    }

    /// Starts a read. Bounded ranges yield a finite stream; live ranges
    /// keep yielding until the returned [`PointRead`] is cancelled or dropped.
    pub fn execute(&self, target: TargetPattern, range: TimeRange) -> PointRead {
        match range.interval() {
            Some(interval) => self.bounded(QueryRequest { target, interval }),
            None => {
                let from = range
                    .start
                    .unwrap_or_else(|| self.clock.now().trunc_subsecs(0));
                let tail = LiveTail::start(
                    self.source.clone(),
                    self.clock.clone(),
                    target,
                    from,
                    self.poll_interval,
                );
                let cancel = tail.cancellation_token();
                PointRead {
                    stream: tail.into_stream(),
                    cancel,
                    live: true,
                }
            }
        }
    }

    fn bounded(&self, request: QueryRequest) -> PointRead {
        let cancel = CancellationToken::new();
        let source = self.source.clone();

        debug!(pattern = %request.target, interval = ?request.interval, "bounded read");
        let stream = stream::once(async move { query_once(source.as_ref(), &request).await })
            .flat_map(|result| match result {
                Ok(points) => {
                    stream::iter(points.into_iter().map(Ok::<Point, AdapterError>)).left_stream()
                }
                Err(e) => stream::once(async move { Err(e) }).right_stream(),
            })
            .take_until(cancel.clone().cancelled_owned())
            .boxed();

        PointRead {
            stream,
            cancel,
            live: false,
        }
    }
}

/// A running read. Yields points in non-decreasing time order.
pub struct PointRead {
    stream: PointStream,
    cancel: CancellationToken,
    live: bool,
}

impl PointRead {
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Stops the read. No point is yielded after this returns; calling it
    /// again has no effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this read, for handing to another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for PointRead {
    type Item = Result<Point>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.stream.poll_next_unpin(cx)
    }
}

/// A live tail: a spawned poller that queries `(cursor, now]` every poll
/// interval and forwards points newer than the cursor.
///
/// The cursor only ever moves forward to the latest delivered point, so
/// points the store returns again are never delivered twice.
pub struct LiveTail {
    points: flume::Receiver<Result<Point>>,
    token: CancellationToken,
    guard: DropGuard,
}

impl LiveTail {
    pub fn start<S: MetricsInput>(
        source: Arc<S>,
        clock: Arc<dyn Clock>,
        target: TargetPattern,
        from: DateTime<Utc>,
        poll_interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let (tx, rx) = flume::bounded(TAIL_BUFFER);

        let poller = TailPoller {
            source,
            clock,
            target,
            cursor: from,
            poll_interval,
            token: token.clone(),
            tx,
        };
        tokio::spawn(poller.run());

        Self {
            points: rx,
            guard: token.clone().drop_guard(),
            token,
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Consumes the tail into a stream. Dropping the stream cancels the tail.
    pub fn into_stream(self) -> PointStream {
        let LiveTail {
            points,
            token,
            guard,
        } = self;

        stream::unfold((points, token, guard), |(points, token, guard)| async move {
            if token.is_cancelled() {
                return None;
            }
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = points.recv_async() => item.ok(),
            };
            next.map(|item| (item, (points, token, guard)))
        })
        .boxed()
    }
}

enum TailStop {
    Cancelled,
    Closed,
    Failed(AdapterError),
}

struct TailPoller<S> {
    source: Arc<S>,
    clock: Arc<dyn Clock>,
    target: TargetPattern,
    cursor: DateTime<Utc>,
    poll_interval: Duration,
    token: CancellationToken,
    tx: flume::Sender<Result<Point>>,
}

impl<S: MetricsInput> TailPoller<S> {
    async fn run(mut self) {
        info!(pattern = %self.target, cursor = %self.cursor, "live tail started");

        loop {
            match self.poll().await {
                Ok(()) => {}
                Err(TailStop::Cancelled) | Err(TailStop::Closed) => break,
                Err(TailStop::Failed(e)) => {
                    warn!(pattern = %self.target, error = %e, "live tail failed");
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => {}
                        _ = self.tx.send_async(Err(e)) => {}
                    }
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(pattern = %self.target, cursor = %self.cursor, "live tail stopped");
    }

    async fn poll(&mut self) -> std::result::Result<(), TailStop> {
        let now = self.clock.now().trunc_subsecs(0);
        if now <= self.cursor {
            return Ok(());
        }

        let request = QueryRequest {
            target: self.target.clone(),
            interval: Interval {
                from: Some(self.cursor),
                until: now,
            },
        };
        let points = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(TailStop::Cancelled),
            points = query_once(self.source.as_ref(), &request) => points.map_err(TailStop::Failed)?,
        };
        debug!(pattern = %self.target, cursor = %self.cursor, points = points.len(), "polled");

        // points sharing a second across series all belong to this poll
        let floor = self.cursor;
        for point in points {
            if point.time <= floor {
                continue;
            }
            let time = point.time;
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(TailStop::Cancelled),
                sent = self.tx.send_async(Ok(point)) => sent.map_err(|_| TailStop::Closed)?,
            }
            self.cursor = self.cursor.max(time);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::model::RawSeries;
    use crate::time_range::RangeEnd;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedInput {
        series: Mutex<Vec<RawSeries>>,
        requests: Mutex<Vec<QueryRequest>>,
        fail: Mutex<bool>,
    }

    impl ScriptedInput {
        fn with_points(target: &str, points: &[(f64, i64)]) -> Self {
            let input = ScriptedInput::default();
            input.push(target, points);
            input
        }

        fn push(&self, target: &str, points: &[(f64, i64)]) {
            self.series.lock().unwrap().push(RawSeries {
                target: target.to_string(),
                datapoints: points
                    .iter()
                    .map(|(value, ts)| (Some(*value), *ts as f64))
                    .collect(),
            });
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl MetricsInput for ScriptedInput {
        type Error = AdapterError;

        async fn load_series(&self, request: &QueryRequest) -> Result<Vec<RawSeries>> {
            self.requests.lock().unwrap().push(request.clone());
            if *self.fail.lock().unwrap() {
                return Err(AdapterError::Transport("connection refused".into()));
            }
            // deliberately ignores the window, like a store re-serving old buckets
            Ok(self.series.lock().unwrap().clone())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn executor(input: Arc<ScriptedInput>, clock: Arc<MockClock>) -> QueryExecutor<ScriptedInput> {
        QueryExecutor::new(input, clock, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn bounded_read_excludes_from() {
        let input = Arc::new(ScriptedInput::with_points(
            "m",
            &[(1.0, 100), (2.0, 101), (3.0, 200), (4.0, 201)],
        ));
        let clock = Arc::new(MockClock::with_time(at(1_000)));
        let range = TimeRange {
            start: Some(at(100)),
            end: RangeEnd::At(at(200)),
        };

        let read = executor(input.clone(), clock).execute(TargetPattern::new("m"), range);
        assert!(!read.is_live());
        let points: Vec<Point> = read.map(|p| p.unwrap()).collect().await;

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
        assert_eq!(input.calls(), 1);
    }

    #[tokio::test]
    async fn bounded_read_of_nothing_is_empty() {
        let input = Arc::new(ScriptedInput::default());
        let clock = Arc::new(MockClock::with_time(at(1_000)));
        let range = TimeRange {
            start: Some(at(700)),
            end: RangeEnd::At(at(1_000)),
        };

        let read = executor(input, clock).execute(TargetPattern::new("nothing"), range);
        let points: Vec<Result<Point>> = read.collect().await;
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn empty_interval_skips_the_query() {
        let input = Arc::new(ScriptedInput::with_points("m", &[(1.0, 100)]));
        let request = QueryRequest {
            target: TargetPattern::new("m"),
            interval: Interval {
                from: Some(at(100)),
                until: at(100),
            },
        };
        assert!(query_once(input.as_ref(), &request).await.unwrap().is_empty());
        assert_eq!(input.calls(), 0);
    }

    #[tokio::test]
    async fn bounded_transport_error_is_propagated() {
        let input = Arc::new(ScriptedInput::default());
        *input.fail.lock().unwrap() = true;
        let clock = Arc::new(MockClock::with_time(at(1_000)));
        let range = TimeRange {
            start: None,
            end: RangeEnd::At(at(1_000)),
        };

        let mut read = executor(input, clock).execute(TargetPattern::new("m"), range);
        let err = read.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "RT-TRANSPORT-ERROR");
        assert!(read.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn live_tail_delivers_each_point_once() {
        let input = Arc::new(ScriptedInput::with_points("m", &[(1.0, 995), (2.0, 997)]));
        let clock = Arc::new(MockClock::with_time(at(1_000)));
        let range = TimeRange {
            start: Some(at(990)),
            end: RangeEnd::Live,
        };

        let mut read = executor(input.clone(), clock.clone()).execute(TargetPattern::new("m"), range);
        assert!(read.is_live());
        assert_eq!(read.next().await.unwrap().unwrap().value, 1.0);
        assert_eq!(read.next().await.unwrap().unwrap().value, 2.0);

        // several polls re-serve the same points
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(input.calls() >= 3);

        input.push("m", &[(3.0, 1_001)]);
        clock.advance(chrono::Duration::seconds(2));
        let point = read.next().await.unwrap().unwrap();
        assert_eq!((point.value, point.time), (3.0, at(1_001)));

        read.cancel();
        read.cancel();
        assert!(read.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn live_tail_keeps_same_second_points_of_other_series() {
        let input = ScriptedInput::with_points("m.b", &[(2.0, 995)]);
        input.push("m.a", &[(1.0, 995)]);
        let input = Arc::new(input);
        let clock = Arc::new(MockClock::with_time(at(1_000)));
        let range = TimeRange {
            start: Some(at(990)),
            end: RangeEnd::Live,
        };

        let mut read = executor(input, clock).execute(TargetPattern::new("m.*"), range);
        let first = read.next().await.unwrap().unwrap();
        let second = read.next().await.unwrap().unwrap();
        assert_eq!((first.name.as_str(), second.name.as_str()), ("m.a", "m.b"));
        read.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn live_tail_windows_start_at_the_cursor() {
        let input = Arc::new(ScriptedInput::with_points("m", &[(1.0, 995)]));
        let clock = Arc::new(MockClock::with_time(at(1_000)));
        let range = TimeRange {
            start: Some(at(990)),
            end: RangeEnd::Live,
        };

        let mut read = executor(input.clone(), clock.clone()).execute(TargetPattern::new("m"), range);
        read.next().await.unwrap().unwrap();
        clock.advance(chrono::Duration::seconds(1));
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let requests = input.requests.lock().unwrap().clone();
        assert_eq!(requests[0].interval.from, Some(at(990)));
        assert_eq!(requests[0].interval.until, at(1_000));
        assert_eq!(requests[1].interval.from, Some(at(995)));
        assert_eq!(requests[1].interval.until, at(1_001));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_tail_stops_polling() {
        let input = Arc::new(ScriptedInput::with_points("m", &[(1.0, 995)]));
        let clock = Arc::new(MockClock::with_time(at(1_000)));

        let tail = LiveTail::start(
            input.clone(),
            clock.clone(),
            TargetPattern::new("m"),
            at(990),
            Duration::from_secs(1),
        );
        let token = tail.cancellation_token();
        let mut points = tail.into_stream();
        points.next().await.unwrap().unwrap();

        let calls = input.calls();
        token.cancel();
        input.push("m", &[(2.0, 1_001)]);
        clock.advance(chrono::Duration::seconds(5));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(input.calls(), calls);
        assert!(points.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_cancels_the_tail() {
        let input = Arc::new(ScriptedInput::with_points("m", &[(1.0, 995)]));
        let clock = Arc::new(MockClock::with_time(at(1_000)));

        let tail = LiveTail::start(
            input.clone(),
            clock,
            TargetPattern::new("m"),
            at(990),
            Duration::from_secs(1),
        );
        let token = tail.cancellation_token();
        drop(tail.into_stream());

        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn live_tail_surfaces_transport_errors() {
        let input = Arc::new(ScriptedInput::default());
        *input.fail.lock().unwrap() = true;
        let clock = Arc::new(MockClock::with_time(at(1_000)));
        let range = TimeRange {
            start: Some(at(990)),
            end: RangeEnd::Live,
        };

        let mut read = executor(input, clock).execute(TargetPattern::new("m"), range);
        let err = read.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "RT-TRANSPORT-ERROR");
        assert!(read.next().await.is_none());
    }
}
