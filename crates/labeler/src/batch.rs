//! Bounded output batches.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use vault_core::{Result, TransitionRecord};
use vault_ingestion::DataStore;

/// Consecutive records flushed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Pair index of the first record.
    pub start_index: usize,
    /// Pair index of the last record.
    pub end_index: usize,
    pub records: Vec<TransitionRecord>,
}

/// Destination for flushed batches.
pub trait BatchSink {
    fn write_batch(&mut self, batch: Batch) -> Result<()>;
}

/// Writes each batch as `result/result-{start}-{end}.json`.
#[derive(Debug)]
pub struct JsonBatchSink {
    store: DataStore,
    written: Vec<PathBuf>,
}

impl JsonBatchSink {
    pub fn new(store: DataStore) -> Self {
        Self {
            store,
            written: Vec::new(),
        }
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl BatchSink for JsonBatchSink {
    fn write_batch(&mut self, batch: Batch) -> Result<()> {
        let path = self
            .store
            .save_batch(batch.start_index, batch.end_index, &batch.records)?;
        info!(
            start = batch.start_index,
            end = batch.end_index,
            records = batch.records.len(),
            path = %path.display(),
            "Flushed batch"
        );
        self.written.push(path);
        Ok(())
    }
}

/// Keeps batches in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<Batch>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch sizes in flush order.
    pub fn sizes(&self) -> Vec<usize> {
        self.batches.iter().map(|b| b.records.len()).collect()
    }
}

impl BatchSink for MemorySink {
    fn write_batch(&mut self, batch: Batch) -> Result<()> {
        self.batches.push(batch);
        Ok(())
    }
}

/// Buffers records and flushes a batch each time `batch_size` is reached.
pub struct BatchWriter<'s, S: BatchSink> {
    sink: &'s mut S,
    batch_size: usize,
    buffer: Vec<TransitionRecord>,
    flushed: usize,
}

impl<'s, S: BatchSink> BatchWriter<'s, S> {
    /// `batch_size` of 0 is treated as 1.
    pub fn new(sink: &'s mut S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            flushed: 0,
        }
    }

    pub fn push(&mut self, record: TransitionRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let (Some(first), Some(last)) = (self.buffer.first(), self.buffer.last()) else {
            return Ok(());
        };
        let batch = Batch {
            start_index: first.pair_index,
            end_index: last.pair_index,
            records: std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size)),
        };
        self.sink.write_batch(batch)?;
        self.flushed += 1;
        Ok(())
    }

    /// Flush the remaining partial batch; returns the number of batches written.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.flushed)
    }
}
