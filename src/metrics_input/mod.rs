pub mod graphite_input;

use std::error::Error;
use std::future::Future;

use crate::error::AdapterError;
use crate::model::{QueryRequest, RawSeries};

/// The query endpoint of a metrics store.
///
/// Implementations must be shareable across tasks so that a live tail can
/// keep polling from its own task.
pub trait MetricsInput: Send + Sync + 'static {
    type Error: Error + Into<AdapterError> + Send + Sync + 'static;

    /// Load every series matching the request's target within its window.
    fn load_series(
        &self,
        request: &QueryRequest,
    ) -> impl Future<Output = Result<Vec<RawSeries>, Self::Error>> + Send;
}
