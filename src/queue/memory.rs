use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};
use tracing::debug;

use super::{Job, JobDispatcher, Worker};
use crate::{
    error::{DataError, Result},
    process::RunStats,
};

/// In-process dispatcher. Jobs are stored as JSON messages per queue, the
/// same way a broker would carry them, and run later by [`MemoryQueue::work_off`].
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VecDeque<String>>>> {
        self.queues
            .lock()
            .map_err(|_| DataError::Queue("queue lock poisoned".into()))
    }

    pub fn len(&self, queue: &str) -> usize {
        self.lock()
            .map(|q| q.get(queue).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Oldest message on `queue`, decoded.
    pub fn pop(&self, queue: &str) -> Result<Option<Job>> {
        let message = self.lock()?.get_mut(queue).and_then(VecDeque::pop_front);
        message.map(|m| Job::from_json(&m)).transpose()
    }

    /// Take every pending job off `queue` without running it.
    pub fn drain(&self, queue: &str) -> Result<Vec<Job>> {
        let messages: Vec<String> = self
            .lock()?
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        messages.iter().map(|m| Job::from_json(m)).collect()
    }

    /// Run pending jobs on `queue` through `worker` until it is empty.
    pub fn work_off(&self, queue: &str, worker: &Worker) -> Vec<Result<RunStats>> {
        let mut results = Vec::new();
        loop {
            match self.pop(queue) {
                Ok(Some(job)) => results.push(worker.run(job)),
                Ok(None) => break,
                Err(e) => results.push(Err(e)),
            }
        }
        results
    }
}

impl JobDispatcher for MemoryQueue {
    fn submit(&self, job: Job, queue: &str) -> Result<()> {
        let message = job.to_json()?;
        let mut queues = self.lock()?;
        let pending = queues.entry(queue.to_string()).or_default();
        pending.push_back(message);
        debug!(queue, pending = pending.len(), "job queued");
        Ok(())
    }
}
