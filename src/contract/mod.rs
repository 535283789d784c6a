//! What callers implement to drive an import or an export.
//!
//! Contracts have a small required core plus optional capabilities. Each
//! capability is an accessor that returns `None` unless the contract opts in;
//! the engine asks once at the start of a call.

pub mod rules;

pub use rules::Rules;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DataError;

/// An ordered associative row: header keys to cell values on the way in,
/// contract-defined fields after `map`.
pub type Record = serde_json::Map<String, Value>;

/// Physically split files larger than `max_file_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    pub max_file_size: u64,
    /// Data rows per chunk; the configured default when `None`.
    pub chunk_rows: Option<usize>,
}

/// Hand batches and chunks to a job dispatcher instead of processing inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Registry key a worker uses to rebuild the contract.
    pub job: String,
    /// State handed to the registry factory.
    pub params: Value,
    /// Target queue; the configured default when `None`.
    pub queue: Option<String>,
    pub timeout_secs: u64,
    pub memory_mb: u64,
}

impl QueuePolicy {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 3_600;
    pub const DEFAULT_MEMORY_MB: u64 = 512;

    pub fn new(job: impl Into<String>, params: Value) -> Self {
        Self {
            job: job.into(),
            params,
            queue: None,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            memory_mb: Self::DEFAULT_MEMORY_MB,
        }
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// Row and batch error policy.
pub trait WithErrorHandling {
    /// Called for every error before the policy decides; cannot suppress it.
    fn on_error(&mut self, error: &DataError, row: &Record, row_number: u64);

    /// `false` aborts the run on the first error.
    fn skip_on_error(&self) -> bool;

    /// Abort once more than this many rows were discarded.
    fn max_errors(&self) -> Option<u64> {
        None
    }
}

/// Progress notifications.
pub trait WithProgress {
    fn on_start(&mut self, _total: u64) {}
    fn on_progress(&mut self, _done: u64, _total: u64) {}
    fn on_complete(&mut self) {}
    /// Fires once per failed run, before cleanup.
    fn on_failed(&mut self, _error: &DataError) {}
}

/// Per-row processing; replaces the whole-batch `process` call.
pub trait ProcessRow {
    fn process_row(&mut self, record: &Record, row_number: u64) -> anyhow::Result<()>;
}

pub trait Importable {
    /// Turn a raw header-keyed row into the record the contract stores.
    fn map(&mut self, row: &Record) -> anyhow::Result<Record>;

    /// Store a batch of mapped records. An error fails the whole batch.
    fn process(&mut self, batch: Vec<Record>) -> anyhow::Result<()>;

    fn batch_size(&self) -> Option<usize> {
        None
    }

    fn chunking(&self) -> Option<ChunkPolicy> {
        None
    }

    fn queue_policy(&self) -> Option<QueuePolicy> {
        None
    }

    fn rules(&self) -> Option<Rules> {
        None
    }

    fn error_handling(&mut self) -> Option<&mut dyn WithErrorHandling> {
        None
    }

    fn progress(&mut self) -> Option<&mut dyn WithProgress> {
        None
    }

    fn row_processor(&mut self) -> Option<&mut dyn ProcessRow> {
        None
    }
}

/// Source rows for an export; single pass.
pub type RecordStream = Box<dyn Iterator<Item = anyhow::Result<Record>>>;

pub trait Exportable {
    fn query(&mut self) -> anyhow::Result<RecordStream>;

    /// Header row; nothing is written when empty.
    fn headings(&self) -> Vec<String>;

    /// Ordered output cells for one source row.
    fn map(&mut self, row: &Record) -> anyhow::Result<Vec<Value>>;

    fn batch_size(&self) -> Option<usize> {
        None
    }

    fn estimated_count(&self) -> Option<u64> {
        None
    }

    fn error_handling(&mut self) -> Option<&mut dyn WithErrorHandling> {
        None
    }

    fn progress(&mut self) -> Option<&mut dyn WithProgress> {
        None
    }
}
