//! Graphite adapter for a stream-processing query language.
//!
//! Reads compile a `name=` / `name~` filter and a time range into render API
//! queries, either once or as a live tail. Writes validate incoming records
//! and ship them to Carbon as plaintext lines.

pub mod adapter;
pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics_input;
pub mod metrics_output;
pub mod model;
pub mod normalize;
pub mod query;
pub mod time_range;
pub mod write;

pub use adapter::{GraphiteAdapter, ReadPlan};
pub use config::GraphiteConfig;
pub use error::{AdapterError, Result};
pub use filter::{FilterExpr, NameFilter};
pub use model::{Point, WriteOutcome};
pub use query::{LiveTail, PointRead};
pub use time_range::{OptionValue, TimeExpr, TimeRange};
