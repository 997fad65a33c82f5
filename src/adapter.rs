use std::sync::Arc;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::GraphiteConfig;
use crate::error::{AdapterError, Result};
use crate::filter::{self, FilterExpr};
use crate::metrics_input::graphite_input::GraphiteInput;
use crate::metrics_input::MetricsInput;
use crate::metrics_output::carbon_output::CarbonOutput;
use crate::metrics_output::MetricOutput;
use crate::model::{TargetPattern, WriteOutcome};
use crate::query::{PointRead, QueryExecutor};
use crate::time_range::{self, OptionValue, ReadOptions, TimeRange};
use crate::write::{GraphiteWriter, Record};

/// A validated read, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPlan {
    pub target: TargetPattern,
    pub range: TimeRange,
}

/// Reads from and writes to one Graphite installation.
pub struct GraphiteAdapter<I, O> {
    clock: Arc<dyn Clock>,
    executor: QueryExecutor<I>,
    writer: GraphiteWriter<O>,
}

impl GraphiteAdapter<GraphiteInput, CarbonOutput> {
    /// Connects to the render API and Carbon listener named in `config`.
    pub fn from_config(config: GraphiteConfig) -> Result<Self> {
        let input = Arc::new(GraphiteInput::from_config(&config)?);
        let output = Arc::new(CarbonOutput::from_config(&config));
        Ok(Self::new(config, input, output, Arc::new(SystemClock)))
    }
}

impl<I: MetricsInput, O: MetricOutput> GraphiteAdapter<I, O> {
    pub fn new(config: GraphiteConfig, input: Arc<I>, output: Arc<O>, clock: Arc<dyn Clock>) -> Self {
        Self {
            executor: QueryExecutor::new(input, clock.clone(), config.poll_interval()),
            writer: GraphiteWriter::new(output, clock.clone()),
            clock,
        }
    }

    /// Validates a read without touching the network.
    ///
    /// Unknown options are reported first, then the filter, then the time
    /// range.
    pub fn plan_read<K, It>(&self, options: It, filter: Option<&FilterExpr>) -> Result<ReadPlan>
    where
        K: AsRef<str>,
        It: IntoIterator<Item = (K, OptionValue)>,
    {
        let options = ReadOptions::from_options(options)?;
        let filter = filter.ok_or(AdapterError::InvalidFilter)?;
        let target = filter::compile(filter)?.target();
        let range = time_range::resolve(&options, self.clock.as_ref())?;
        debug!(pattern = %target, ?range, "planned read");
        Ok(ReadPlan { target, range })
    }

    pub fn execute(&self, plan: ReadPlan) -> PointRead {
        self.executor.execute(plan.target, plan.range)
    }

    /// Validates and starts a read.
    pub fn read<K, It>(&self, options: It, filter: Option<&FilterExpr>) -> Result<PointRead>
    where
        K: AsRef<str>,
        It: IntoIterator<Item = (K, OptionValue)>,
    {
        let plan = self.plan_read(options, filter)?;
        Ok(self.execute(plan))
    }

    /// Writes records. Invalid records become warnings; a failed
    /// transmission becomes an error. Neither aborts the statement.
    pub async fn write<It>(&self, records: It) -> WriteOutcome
    where
        It: IntoIterator<Item = Record>,
    {
        self.writer.write(records).await
    }
}
