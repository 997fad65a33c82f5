use csv::Writer;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::io::Write;

use crate::error::{AdapterError, Result};

/// Exports read results as CSV rows.
pub struct CSVCreator<W> {
    pub writer: W,
}

impl<W> CSVCreator<W>
where
    W: Write + Send + 'static,
{
    /// Writes every metric of the stream and returns how many rows were
    /// written. The first error of the stream stops the export and is
    /// returned once the rows before it have been flushed.
    pub async fn export_metrics<M>(self, metrics: impl Stream<Item = Result<M>>) -> Result<usize>
    where
        M: Serialize + Send + 'static,
    {
        let (c_tx, c_rx) = flume::bounded::<M>(128);

        let writer_task = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut writer = Writer::from_writer(self.writer);
            let mut written = 0;

            while let Ok(metric) = c_rx.recv() {
                writer
                    .serialize(metric)
                    .map_err(|e| AdapterError::Export(e.to_string()))?;
                written += 1;
            }

            writer
                .flush()
                .map_err(|e| AdapterError::Export(e.to_string()))?;
            Ok(written)
        });

        let mut metrics = std::pin::pin!(metrics);
        let mut failure = None;
        while let Some(metric) = metrics.next().await {
            match metric {
                Ok(metric) => {
                    // the writer only hangs up after failing, which is reported below
                    if c_tx.send_async(metric).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(c_tx);

        let written = writer_task
            .await
            .map_err(|e| AdapterError::Export(e.to_string()))??;

        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}
