//! Units of work handed to other workers, and the worker that runs them.

mod channel;
mod memory;

pub use channel::{spawn_workers, ChannelDispatcher, QueuedJob, WorkerReport};
pub use memory::MemoryQueue;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tracing::{error, info, instrument};

use crate::{
    contract::{Importable, QueuePolicy},
    error::{DataError, Result},
    process::{Batch, ChunkDescriptor, DataProcessor, RunStats},
};

/// Execution limits passed along with a job. Advisory: the dispatcher
/// enforces them, not the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub timeout_secs: u64,
    pub memory_mb: u64,
    /// Attempts before the job counts as failed. Always 1.
    pub tries: u32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            timeout_secs: QueuePolicy::DEFAULT_TIMEOUT_SECS,
            memory_mb: QueuePolicy::DEFAULT_MEMORY_MB,
            tries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Work {
    /// Mapped records ready for the batch flush.
    Batch(Batch),
    /// A chunk file to import.
    Chunk(ChunkDescriptor),
}

impl Work {
    pub fn kind(&self) -> &'static str {
        match self {
            Work::Batch(_) => "batch",
            Work::Chunk(_) => "chunk",
        }
    }
}

/// A serializable unit of work: which contract to rebuild, with what
/// state, and what to run it on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub contract: String,
    pub params: Value,
    pub work: Work,
    pub options: JobOptions,
}

impl Job {
    pub fn new(policy: &QueuePolicy, work: Work) -> Self {
        Self {
            contract: policy.job.clone(),
            params: policy.params.clone(),
            work,
            options: JobOptions {
                timeout_secs: policy.timeout_secs,
                memory_mb: policy.memory_mb,
                tries: 1,
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(message: &str) -> Result<Self> {
        Ok(serde_json::from_str(message)?)
    }
}

/// Accepts jobs for a named queue. Fire and forget: the caller never sees
/// the job's outcome.
pub trait JobDispatcher: Send + Sync {
    fn submit(&self, job: Job, queue: &str) -> Result<()>;
}

pub type ContractFactory =
    Box<dyn Fn(&Value) -> anyhow::Result<Box<dyn Importable + Send>> + Send + Sync>;

/// Rebuilds import contracts from a job's `contract` key and `params`.
#[derive(Default)]
pub struct ContractRegistry {
    factories: HashMap<String, ContractFactory>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Box<dyn Importable + Send>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn build(&self, name: &str, params: &Value) -> Result<Box<dyn Importable + Send>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DataError::Queue(format!("no contract registered as {name:?}")))?;
        factory(params).map_err(|e| DataError::Queue(format!("could not build {name:?}: {e:#}")))
    }
}

/// Runs jobs by calling straight back into the engine. Queued work is
/// always executed inline, so it never queues again.
#[derive(Clone)]
pub struct Worker {
    processor: Arc<DataProcessor>,
    registry: Arc<ContractRegistry>,
}

impl Worker {
    pub fn new(processor: Arc<DataProcessor>, registry: Arc<ContractRegistry>) -> Self {
        Self {
            processor,
            registry,
        }
    }

    #[instrument(level = "info", skip(self, job), fields(contract = %job.contract, work = job.work.kind()))]
    pub fn handle(&self, job: &Job) -> Result<RunStats> {
        let mut contract = self.registry.build(&job.contract, &job.params)?;
        let stats = match &job.work {
            Work::Batch(batch) => self.processor.process_batch(contract.as_mut(), batch.clone())?,
            Work::Chunk(chunk) => self.processor.import_chunk(contract.as_mut(), chunk)?,
        };
        info!(
            processed = stats.processed_rows,
            errors = stats.error_count,
            "job finished"
        );
        Ok(stats)
    }

    /// Called once when a job fails; drops its chunk file.
    pub fn failed(&self, job: &Job, err: &DataError) {
        error!(contract = %job.contract, work = job.work.kind(), error = %err, "job failed");
        if let Work::Chunk(chunk) = &job.work {
            self.processor.discard_chunk(chunk);
        }
    }

    /// Handle `job` once; failures go through [`Worker::failed`] and are not retried.
    pub fn run(&self, job: Job) -> Result<RunStats> {
        self.handle(&job).inspect_err(|e| self.failed(&job, e))
    }

    /// Decode a queued JSON message and run it.
    pub fn execute_json(&self, message: &str) -> Result<RunStats> {
        let job = Job::from_json(message)?;
        self.run(job)
    }
}
