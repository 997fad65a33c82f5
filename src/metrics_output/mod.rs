pub mod carbon_output;
pub mod csv_output;

use std::error::Error;
use std::future::Future;

use crate::error::AdapterError;

/// The ingestion endpoint of a metrics store.
pub trait MetricOutput: Send + Sync + 'static {
    type Error: Error + Into<AdapterError> + Send + Sync + 'static;

    /// Transmit an already encoded batch of plaintext records.
    ///
    /// The payload is sent as a whole; a failure means none of it can be
    /// assumed delivered.
    fn send_payload(&self, payload: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
