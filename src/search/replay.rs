//! Provider that replays an in-memory row set

use crate::models::{SearchRequest, Val};
use crate::search::error::{SearchError, SearchResult};
use crate::search::provider::{PayloadSink, SearchProvider};
use async_trait::async_trait;
use futures::future::join_all;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Replays rows through several concurrent producer tasks, each delivering
/// fixed-size batches, the way shard searchers feed a live search.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    columns: Vec<String>,
    rows: Arc<Vec<Vec<Val>>>,
    producers: usize,
    batch_size: usize,
    batch_delay: Option<Duration>,
}

impl ReplayProvider {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Val>>) -> Self {
        Self {
            columns,
            rows: Arc::new(rows),
            producers: 4,
            batch_size: 100,
            batch_delay: None,
        }
    }

    /// Read rows from CSV with a header line naming the columns.
    pub fn from_csv<R: Read>(reader: R) -> SearchResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader
            .headers()
            .map_err(map_csv_error)?
            .iter()
            .map(str::to_string)
            .collect();
        if columns.is_empty() {
            return Err(SearchError::InvalidRequest("CSV input has no header".to_string()));
        }

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(map_csv_error)?;
            rows.push(record.iter().map(Val::parse).collect());
        }
        Ok(Self::new(columns, rows))
    }

    pub fn with_producers(mut self, producers: usize) -> Self {
        self.producers = producers.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pause between batches, to make intermediate states observable.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn map_csv_error(err: csv::Error) -> SearchError {
    let row = err.position().map(|p| p.record()).unwrap_or(0);
    SearchError::InvalidRequest(format!("CSV parse error at record {}: {}", row, err))
}

#[async_trait]
impl SearchProvider for ReplayProvider {
    async fn search(&self, request: SearchRequest, sink: PayloadSink) -> SearchResult<()> {
        let index = sink.field_index().ok_or(SearchError::Terminated)?;

        // Column of each extracted field; fields the input lacks read as null.
        let positions: Arc<Vec<Option<usize>>> = Arc::new(
            index
                .names()
                .iter()
                .map(|name| self.columns.iter().position(|c| c == name))
                .collect(),
        );

        let chunk = self.rows.len().div_ceil(self.producers).max(1);
        let producers: Vec<_> = (0..self.producers)
            .map(|producer| {
                let rows = self.rows.clone();
                let positions = positions.clone();
                let sink = sink.clone();
                let batch_size = self.batch_size;
                let delay = self.batch_delay;
                let start = (producer * chunk).min(rows.len());
                let end = (start + chunk).min(rows.len());

                tokio::spawn(async move {
                    let mut delivered = 0;
                    for batch in rows[start..end].chunks(batch_size) {
                        let extracted: Vec<Vec<Val>> = batch
                            .iter()
                            .map(|row| {
                                positions
                                    .iter()
                                    .map(|pos| pos.and_then(|p| row.get(p).cloned()).unwrap_or_default())
                                    .collect()
                            })
                            .collect();
                        delivered += extracted.len();
                        if !sink.deliver_rows(&extracted) {
                            break;
                        }
                        match delay {
                            Some(delay) => tokio::time::sleep(delay).await,
                            None => tokio::task::yield_now().await,
                        }
                    }
                    debug!(producer, delivered, "Producer finished");
                })
            })
            .collect();

        for result in join_all(producers).await {
            result.map_err(|e| SearchError::SearchExecutionFailed(format!("Producer failed: {}", e)))?;
        }

        debug!(search_key = %request.key(), rows = self.rows.len(), "Replay finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_csv() {
        let csv = "Text,Bytes\na, 10\nb,\n";
        let provider = ReplayProvider::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(provider.columns(), &["Text".to_string(), "Bytes".to_string()]);
        assert_eq!(provider.len(), 2);
        assert_eq!(provider.rows[0], vec![Val::text("a"), Val::Integer(10)]);
        assert_eq!(provider.rows[1], vec![Val::text("b"), Val::Null]);
    }

    #[test]
    fn test_builder_clamps_to_one() {
        let provider = ReplayProvider::new(vec![], vec![])
            .with_producers(0)
            .with_batch_size(0);
        assert_eq!(provider.producers, 1);
        assert_eq!(provider.batch_size, 1);
    }
}
