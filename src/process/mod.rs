// src/process/mod.rs
//! The batching engine: imports, exports and the chunk splitter they share.

mod export;
pub mod header;
mod import;
mod policy;
pub mod split;

pub use header::{header_keys, normalize_header};
pub use split::{ChunkDescriptor, ChunkLocation, ChunkSplitter, Chunks};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::{
    config::Settings,
    contract::{QueuePolicy, Record},
    error::{DataError, Result},
    queue::{Job, JobDispatcher, Work},
    store::FileStore,
};

/// Counters for one import or export call.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Data rows in the source (or the export estimate).
    pub total_rows: u64,
    /// Rows that made it through processing.
    pub processed_rows: u64,
    /// Rows discarded by the error policy; a failed batch counts all its rows.
    pub error_count: u64,
}

impl RunStats {
    /// `(processed - errors) / processed * 100`, or 100 when nothing was processed.
    pub fn success_rate(&self) -> f64 {
        if self.processed_rows == 0 {
            return 100.0;
        }
        let processed = self.processed_rows as f64;
        (processed - self.error_count as f64) / processed * 100.0
    }

    /// [`RunStats::success_rate`] rounded to two decimals, for logs.
    pub fn rounded_success_rate(&self) -> f64 {
        (self.success_rate() * 100.0).round() / 100.0
    }
}

/// A mapped record and its data-row number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    pub number: u64,
    pub record: Record,
}

/// Mapped records flushed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub rows: Vec<BatchRow>,
}

impl Batch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            rows: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, number: u64, record: Record) {
        self.rows.push(BatchRow { number, record });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Whether batches and chunks of a queued contract go to the dispatcher or
/// run in the calling thread. Workers always run inline, so queued work
/// never queues again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Submit,
    Inline,
}

/// Entry point for imports and exports. Cheap to share behind an `Arc`;
/// every call owns its own [`RunStats`].
pub struct DataProcessor {
    settings: Settings,
    store: Arc<dyn FileStore>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
}

impl DataProcessor {
    pub fn new(settings: Settings, store: Arc<dyn FileStore>) -> Self {
        Self {
            settings,
            store,
            dispatcher: None,
        }
    }

    /// Dispatcher for contracts with a queue policy.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    pub fn splitter(&self) -> ChunkSplitter {
        ChunkSplitter::new(&self.settings, self.store.clone())
    }

    fn require_dispatcher(&self) -> Result<&Arc<dyn JobDispatcher>> {
        self.dispatcher
            .as_ref()
            .ok_or_else(|| DataError::config("contract has a queue policy but no job dispatcher is configured"))
    }

    /// Queue name for `policy`: its own, else the configured default.
    pub fn queue_for<'a>(&'a self, policy: &'a QueuePolicy) -> &'a str {
        match policy.queue.as_deref() {
            Some(q) if !q.trim().is_empty() => q,
            _ => &self.settings.queue,
        }
    }

    pub(crate) fn submit(&self, policy: &QueuePolicy, work: Work) -> Result<()> {
        let dispatcher = self.require_dispatcher()?;
        let queue = self.queue_for(policy);
        let job = Job::new(policy, work);
        debug!(queue, contract = %job.contract, work = job.work.kind(), "submitting job");
        dispatcher.submit(job, queue)
    }
}
