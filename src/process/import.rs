use std::{
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{debug, info, instrument, warn};

use super::{
    header::header_keys, policy, Batch, ChunkDescriptor, ChunkLocation, DataProcessor,
    ExecutionMode, RunStats,
};
use crate::{
    codec::{self, Format, Row},
    contract::{ChunkPolicy, Importable, QueuePolicy, Record, Rules},
    error::{DataError, Result},
    queue::Work,
};

/// Capabilities of an import contract, read once per call.
struct ImportCaps {
    batch_size: usize,
    chunking: Option<ChunkPolicy>,
    queue: Option<QueuePolicy>,
    rules: Option<Rules>,
    error_handling: bool,
    progress: bool,
    row_processor: bool,
}

impl ImportCaps {
    fn detect(contract: &mut dyn Importable, default_batch: usize) -> Self {
        Self {
            batch_size: contract.batch_size().unwrap_or(default_batch).max(1),
            chunking: contract.chunking(),
            queue: contract.queue_policy(),
            rules: contract.rules().filter(|r| !r.is_empty()),
            error_handling: contract.error_handling().is_some(),
            progress: contract.progress().is_some(),
            row_processor: contract.row_processor().is_some(),
        }
    }
}

/// Which part of the import state machine a call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Size the file and pick the small or large path.
    Full,
    /// Always the small path; used for chunks.
    Small,
}

struct ImportRun<'a> {
    processor: &'a DataProcessor,
    contract: &'a mut dyn Importable,
    caps: ImportCaps,
    mode: ExecutionMode,
    stats: RunStats,
    /// Data rows read so far; numbering continues across sheets and chunks.
    row_offset: u64,
}

impl DataProcessor {
    /// Import `path` (local file or storage key) through `contract`.
    ///
    /// Returns the run's stats, or `Processing` wrapping whatever stopped it.
    #[instrument(level = "info", skip(self, contract))]
    pub fn import(&self, contract: &mut dyn Importable, path: &str) -> Result<RunStats> {
        self.run_import(contract, path, ExecutionMode::Submit, Scope::Full, 0)
    }

    /// Import a single chunk in the calling thread and delete it afterwards.
    /// Row numbers continue from the chunk's position in its source file.
    #[instrument(level = "info", skip(self, contract, chunk), fields(chunk = chunk.number, path = %chunk.path))]
    pub fn import_chunk(
        &self,
        contract: &mut dyn Importable,
        chunk: &ChunkDescriptor,
    ) -> Result<RunStats> {
        let offset = chunk.first_row.saturating_sub(1);
        let outcome =
            self.run_import(contract, &chunk.path, ExecutionMode::Inline, Scope::Small, offset);
        self.discard_chunk(chunk);
        outcome
    }

    /// Run the inline batch flush for a batch that was queued earlier.
    #[instrument(level = "info", skip(self, contract, batch), fields(rows = batch.len()))]
    pub fn process_batch(&self, contract: &mut dyn Importable, batch: Batch) -> Result<RunStats> {
        let mut run = ImportRun::new(self, contract, ExecutionMode::Inline, 0);
        run.stats.total_rows = batch.len() as u64;
        let outcome = run.process_inline(batch);
        run.finish(outcome, None)
    }

    /// Delete a chunk's local file and, for shared chunks, its storage copy.
    pub(crate) fn discard_chunk(&self, chunk: &ChunkDescriptor) {
        let result = match chunk.location {
            ChunkLocation::Local => self.store.delete_local(Path::new(&chunk.path)),
            ChunkLocation::Durable => self.store.remove(&chunk.path),
        };
        if let Err(e) = result {
            warn!(chunk = chunk.number, path = %chunk.path, error = %e, "could not delete chunk");
            return;
        }
        // the run directory goes with its last chunk; fails while others remain
        if chunk.location == ChunkLocation::Local {
            if let Some(run_dir) = Path::new(&chunk.path).parent() {
                if std::fs::remove_dir(run_dir).is_ok() {
                    debug!(dir = %run_dir.display(), "removed run directory");
                }
            }
        }
    }

    fn run_import(
        &self,
        contract: &mut dyn Importable,
        path: &str,
        mode: ExecutionMode,
        scope: Scope,
        row_offset: u64,
    ) -> Result<RunStats> {
        let started = Instant::now();
        info!(path, ?mode, "import started");

        let mut run = ImportRun::new(self, contract, mode, row_offset);
        let mut temp = None;
        let outcome = run.execute(path, scope, &mut temp);
        let stats = run.finish(outcome, temp)?;

        info!(
            path,
            elapsed = ?started.elapsed(),
            total = stats.total_rows,
            processed = stats.processed_rows,
            errors = stats.error_count,
            success_rate = stats.rounded_success_rate(),
            "import finished"
        );
        Ok(stats)
    }
}

impl<'a> ImportRun<'a> {
    fn new(
        processor: &'a DataProcessor,
        contract: &'a mut dyn Importable,
        mode: ExecutionMode,
        row_offset: u64,
    ) -> Self {
        let caps = ImportCaps::detect(contract, processor.settings.batch_size);
        Self {
            processor,
            contract,
            caps,
            mode,
            stats: RunStats::default(),
            row_offset,
        }
    }

    fn queued(&self) -> Option<&QueuePolicy> {
        match self.mode {
            ExecutionMode::Submit => self.caps.queue.as_ref(),
            ExecutionMode::Inline => None,
        }
    }

    fn execute(&mut self, path: &str, scope: Scope, temp: &mut Option<PathBuf>) -> Result<()> {
        if let Some(ChunkPolicy {
            chunk_rows: Some(0),
            ..
        }) = &self.caps.chunking
        {
            return Err(DataError::config("chunk policy rows must be at least 1"));
        }
        if self.queued().is_some() {
            self.processor.require_dispatcher()?;
        }

        let file = self.processor.store.resolve(path)?;
        if file.is_temp {
            *temp = Some(file.path.clone());
        }

        self.stats = RunStats {
            total_rows: codec::count_rows(&file.path)?,
            ..RunStats::default()
        };
        if self.caps.progress {
            if let Some(p) = self.contract.progress() {
                p.on_start(self.stats.total_rows);
            }
        }

        let oversized = match (&self.caps.chunking, scope, self.mode) {
            (Some(policy), Scope::Full, ExecutionMode::Submit) => self
                .processor
                .store
                .should_chunk(&file.path.to_string_lossy(), policy.max_file_size)?,
            _ => false,
        };
        if oversized {
            self.large(&file.path)?;
        } else {
            self.small(&file.path)?;
        }

        if self.caps.progress {
            if let Some(p) = self.contract.progress() {
                p.on_complete();
            }
        }
        Ok(())
    }

    /// Stream rows into batches.
    fn small(&mut self, path: &Path) -> Result<()> {
        let mut reader = codec::open_reader(path)?;
        let mut keys: Option<Vec<String>> = None;
        let mut batch = Batch::with_capacity(self.caps.batch_size);

        while let Some(sheet) = reader.next_sheet()? {
            let mut at_header = true;
            for cells in sheet {
                let cells = cells?;
                if at_header {
                    at_header = false;
                    if keys.is_none() {
                        keys = Some(header_keys(&cells));
                    }
                    continue;
                }

                self.row_offset += 1;
                let number = self.row_offset;
                let raw = zip_row(keys.as_deref().unwrap_or_default(), cells);
                match self.prepare(&raw, number) {
                    Ok(record) => batch.push(number, record),
                    Err(e) => {
                        self.route(e, &raw, number, 1)?;
                        continue;
                    }
                }

                if batch.len() >= self.caps.batch_size {
                    let full =
                        std::mem::replace(&mut batch, Batch::with_capacity(self.caps.batch_size));
                    self.flush(full)?;
                }
            }
        }

        if !batch.is_empty() {
            self.flush(batch)?;
        }
        Ok(())
    }

    /// Split into chunks, then queue or import each one.
    fn large(&mut self, path: &Path) -> Result<()> {
        let chunk_rows = self
            .caps
            .chunking
            .as_ref()
            .and_then(|c| c.chunk_rows)
            .unwrap_or(self.processor.settings.chunk_rows);
        let format = Format::from_path(path)?;
        info!(path = %path.display(), chunk_rows, "file too large, splitting");

        for chunk in self.processor.splitter().split(path, chunk_rows, format.extension())? {
            let chunk = chunk?;
            if let Some(policy) = self.queued() {
                self.processor.submit(policy, Work::Chunk(chunk))?;
                continue;
            }

            let outcome = self.import_chunk_inline(&chunk);
            self.processor.discard_chunk(&chunk);
            outcome?;
        }
        Ok(())
    }

    fn import_chunk_inline(&mut self, chunk: &ChunkDescriptor) -> Result<()> {
        let file = self.processor.store.resolve(&chunk.path)?;
        let outcome = self.small(&file.path);
        if file.is_temp {
            if let Err(e) = self.processor.store.delete_local(&file.path) {
                warn!(path = %file.path.display(), error = %e, "could not delete chunk download");
            }
        }
        outcome
    }

    fn prepare(&mut self, raw: &Record, number: u64) -> Result<Record> {
        let record = self
            .contract
            .map(raw)
            .map_err(|e| DataError::row(number, e))?;
        if let Some(rules) = &self.caps.rules {
            rules.validate(&record, number)?;
        }
        Ok(record)
    }

    fn route(&mut self, error: DataError, row: &Record, number: u64, weight: u64) -> Result<()> {
        let handler = if self.caps.error_handling {
            self.contract.error_handling()
        } else {
            None
        };
        policy::route(handler, &mut self.stats, error, row, number, weight)
    }

    fn flush(&mut self, batch: Batch) -> Result<()> {
        if let Some(policy) = self.queued() {
            return self.processor.submit(policy, Work::Batch(batch));
        }
        self.process_inline(batch)
    }

    fn process_inline(&mut self, batch: Batch) -> Result<()> {
        if self.caps.row_processor {
            for row in batch.rows {
                let outcome = match self.contract.row_processor() {
                    Some(p) => p.process_row(&row.record, row.number),
                    None => Ok(()),
                };
                match outcome {
                    Ok(()) => self.stats.processed_rows += 1,
                    Err(e) => self.route(DataError::row(row.number, e), &row.record, row.number, 1)?,
                }
            }
        } else {
            let len = batch.len() as u64;
            // a failed batch is blamed on its last row
            let last = batch.rows.last().cloned();
            let records: Vec<Record> = batch.rows.into_iter().map(|r| r.record).collect();
            if let Err(e) = self.contract.process(records) {
                let (number, record) = last.map(|r| (r.number, r.record)).unwrap_or_default();
                self.route(DataError::row(number, e), &record, number, len)?;
            } else {
                self.stats.processed_rows += len;
            }
        }

        if self.caps.progress {
            let (done, total) = (self.stats.processed_rows, self.stats.total_rows);
            if let Some(p) = self.contract.progress() {
                p.on_progress(done, total);
            }
        }
        Ok(())
    }

    /// Report failure, delete the temp input and wrap errors in `Processing`.
    fn finish(self, outcome: Result<()>, temp: Option<PathBuf>) -> Result<RunStats> {
        if let Err(e) = &outcome {
            if self.caps.progress {
                if let Some(p) = self.contract.progress() {
                    p.on_failed(e);
                }
            }
        }
        if let Some(path) = temp {
            if let Err(e) = self.processor.store.delete_local(&path) {
                warn!(path = %path.display(), error = %e, "could not delete temp input");
            }
        }
        match outcome {
            Ok(()) => Ok(self.stats),
            Err(source) => {
                warn!(error = %source, processed = self.stats.processed_rows, "import failed");
                Err(DataError::Processing {
                    stats: self.stats,
                    source: Box::new(source),
                })
            }
        }
    }
}

/// Header keys zipped with cells; missing cells are null, extra cells dropped.
fn zip_row(keys: &[String], cells: Row) -> Record {
    let mut cells = cells.into_iter();
    keys.iter()
        .map(|key| {
            let value = cells.next().map(serde_json::Value::String).unwrap_or_default();
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        contract::Rules,
        queue::MemoryQueue,
        store::DiskStore,
        testing::{init_test_logging, processor, settings, write_csv, Recorder, TestImport},
    };
    use anyhow::Result;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn people(n: usize) -> Vec<Vec<String>> {
        (1..=n)
            .map(|i| vec![format!("User {i}"), format!("user{i}@example.com")])
            .collect()
    }

    #[test]
    fn zip_row_pads_and_truncates() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            serde_json::Value::Object(zip_row(&keys, vec!["1".into()])),
            json!({"a": "1", "b": null})
        );
        assert_eq!(
            serde_json::Value::Object(zip_row(&keys, vec!["1".into(), "2".into(), "3".into()])),
            json!({"a": "1", "b": "2"})
        );
    }

    #[test]
    fn small_import_maps_normalized_headers() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "people.csv", &["Full Name", "E-mail"], &people(5))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new().batch_size(2);

        let stats = processor.import(&mut contract, source.to_str().unwrap())?;

        assert_eq!(stats.total_rows, 5);
        assert_eq!(stats.processed_rows, 5);
        assert_eq!(stats.error_count, 0);
        assert_eq!(contract.batches, vec![2, 2, 1]);
        assert_eq!(contract.stored[0]["full_name"], "User 1");
        assert_eq!(contract.stored[4]["e_mail"], "user5@example.com");
        assert!(source.exists(), "local input is not a temp copy");
        Ok(())
    }

    #[test]
    fn processed_plus_discarded_equals_total() -> Result<()> {
        let dir = tempdir()?;
        let mut rows = people(10);
        rows[2][1] = "broken".into();
        rows[7][1] = "".into();
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &rows)?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new()
            .batch_size(3)
            .rules(Rules::new().field("email", "required|email")?)
            .errors(Recorder::skipping(None));

        let stats = processor.import(&mut contract, source.to_str().unwrap())?;

        assert_eq!(stats.processed_rows + stats.error_count, stats.total_rows);
        assert_eq!(stats.error_count, 2);
        assert_eq!(contract.recorder().errors, vec![3, 8]);
        // the raw row reaches on_error
        assert_eq!(contract.recorder().error_rows[0]["email"], "broken");
        Ok(())
    }

    #[test]
    fn error_budget_aborts_on_third_error() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(6))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new()
            .fail_rows(&[1, 2, 3])
            .per_row()
            .errors(Recorder::skipping(Some(2)))
            .with_progress();

        let err = processor
            .import(&mut contract, source.to_str().unwrap())
            .unwrap_err();

        assert!(err.is_budget_exceeded());
        assert_eq!(contract.recorder().errors, vec![1, 2, 3]);
        assert_eq!(err.stats().map(|s| s.error_count), Some(3));
        assert_eq!(contract.recorder().failed, 1);
        assert_eq!(contract.recorder().completed, 0);
        Ok(())
    }

    #[test]
    fn first_error_aborts_without_skip() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(6))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new()
            .per_row()
            .batch_size(10)
            .fail_rows(&[4])
            .errors(Recorder::aborting());

        let err = processor
            .import(&mut contract, source.to_str().unwrap())
            .unwrap_err();

        assert!(!err.is_budget_exceeded());
        assert!(matches!(err.root(), DataError::Row { row: 4, .. }));
        assert_eq!(err.stats().map(|s| s.processed_rows), Some(3));
        assert_eq!(contract.stored.len(), 3);
        Ok(())
    }

    #[test]
    fn failed_batch_counts_every_row_and_blames_the_last() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(7))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new()
            .batch_size(3)
            .fail_rows(&[5])
            .errors(Recorder::skipping(None));

        let stats = processor.import(&mut contract, source.to_str().unwrap())?;

        assert_eq!(stats.processed_rows, 4);
        assert_eq!(stats.error_count, 3);
        assert_eq!(contract.recorder().errors, vec![6]);
        assert_eq!(contract.recorder().error_rows[0]["name"], "User 6");
        Ok(())
    }

    #[test]
    fn without_handler_errors_propagate() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(3))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new().fail_rows(&[2]).per_row();

        let err = processor
            .import(&mut contract, source.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, DataError::Processing { .. }));
        assert!(matches!(err.root(), DataError::Row { row: 2, .. }));
        Ok(())
    }

    #[test]
    fn progress_is_reported_per_batch() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(5))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new().batch_size(2).with_progress();

        processor.import(&mut contract, source.to_str().unwrap())?;

        let rec = contract.recorder();
        assert_eq!(rec.started, Some(5));
        assert_eq!(rec.progress, vec![(2, 5), (4, 5), (5, 5)]);
        assert_eq!(rec.completed, 1);
        Ok(())
    }

    #[test]
    fn stored_objects_are_downloaded_and_cleaned_up() -> Result<()> {
        let dir = tempdir()?;
        let processor = processor(dir.path());
        let storage = dir.path().join("storage/uploads");
        write_csv(&storage, "people.csv", &["Name", "Email"], &people(2))?;
        let mut contract = TestImport::new();

        let stats = processor.import(&mut contract, "uploads/people.csv")?;
        assert_eq!(stats.processed_rows, 2);

        let temp_root = processor.settings().local_temp_root();
        let leftovers = std::fs::read_dir(&temp_root)?.count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn large_file_is_chunked_inline() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "big.csv", &["Name", "Email"], &people(25))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new()
            .batch_size(4)
            .chunking(10, Some(10))
            .fail_rows(&[23])
            .per_row()
            .errors(Recorder::skipping(None));

        let stats = processor.import(&mut contract, source.to_str().unwrap())?;

        assert_eq!(stats.total_rows, 25);
        assert_eq!(stats.processed_rows, 24);
        // numbering runs across chunks
        assert_eq!(contract.recorder().errors, vec![23]);
        assert_eq!(contract.stored.len(), 24);
        assert_eq!(contract.stored[23]["name"], "User 25");

        let temp_root = processor.settings().local_temp_root();
        assert_eq!(std::fs::read_dir(&temp_root)?.count(), 0);
        Ok(())
    }

    #[test]
    fn queued_contract_submits_batches() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(5))?;
        let queue = Arc::new(MemoryQueue::new());
        let processor = processor(dir.path()).with_dispatcher(queue.clone());
        let mut contract = TestImport::new().batch_size(2).queued("people", Some("imports"));

        let stats = processor.import(&mut contract, source.to_str().unwrap())?;

        assert_eq!(stats.processed_rows, 0);
        assert!(contract.stored.is_empty());
        assert_eq!(queue.len("imports"), 3);
        Ok(())
    }

    #[test]
    fn queued_large_file_submits_chunks() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "big.csv", &["Name", "Email"], &people(12))?;
        let queue = Arc::new(MemoryQueue::new());
        let processor = processor(dir.path()).with_dispatcher(queue.clone());
        let mut contract = TestImport::new().chunking(1, Some(5)).queued("people", None);

        processor.import(&mut contract, source.to_str().unwrap())?;

        let jobs = queue.drain(&processor.settings().queue)?;
        assert_eq!(jobs.len(), 3);
        for (i, job) in jobs.iter().enumerate() {
            match &job.work {
                Work::Chunk(chunk) => {
                    assert_eq!(chunk.number, i as u64 + 1);
                    assert!(Path::new(&chunk.path).exists());
                }
                other => panic!("unexpected work {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn queue_policy_without_dispatcher_is_configuration() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(1))?;
        let processor = processor(dir.path());
        let mut contract = TestImport::new().queued("people", None).with_progress();

        let err = processor
            .import(&mut contract, source.to_str().unwrap())
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(contract.recorder().failed, 1);
        Ok(())
    }

    #[test]
    fn unsupported_input_fails_with_configuration() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, "a\nb\n")?;
        let processor = processor(dir.path());
        let err = processor
            .import(&mut TestImport::new(), source.to_str().unwrap())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("txt"));
        Ok(())
    }

    fn files_under(dir: &Path) -> std::io::Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut n = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            n += if path.is_dir() { files_under(&path)? } else { 1 };
        }
        Ok(n)
    }

    #[test]
    fn zero_chunk_rows_rejected_before_reading() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "p.csv", &["Name", "Email"], &people(5))?;
        let processor = processor(dir.path());

        // oversized and small inputs alike
        for max_file_size in [1, 1_000_000] {
            let mut contract = TestImport::new()
                .chunking(max_file_size, Some(0))
                .with_progress();
            let err = processor
                .import(&mut contract, source.to_str().unwrap())
                .unwrap_err();
            assert!(err.is_configuration(), "{err}");
            assert_eq!(contract.recorder().started, None);
            assert!(contract.stored.is_empty());
        }
        Ok(())
    }

    #[test]
    fn cloud_chunks_are_downloaded_and_removed() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "big.csv", &["Name", "Email"], &people(7))?;
        let settings = Settings {
            use_cloud_temp: true,
            ..settings(dir.path())
        };
        let store = Arc::new(DiskStore::from_settings(&settings));
        let processor = DataProcessor::new(settings, store);
        let mut contract = TestImport::new()
            .chunking(1, Some(3))
            .fail_rows(&[5])
            .per_row()
            .errors(Recorder::skipping(None));

        let stats = processor.import(&mut contract, source.to_str().unwrap())?;

        assert_eq!(
            stats,
            RunStats {
                total_rows: 7,
                processed_rows: 6,
                error_count: 1,
            }
        );
        assert_eq!(contract.recorder().errors, vec![5]);
        assert_eq!(contract.stored[4]["name"], "User 6");
        assert_eq!(files_under(&processor.settings().storage_root)?, 0);
        assert_eq!(files_under(&processor.settings().local_temp_root())?, 0);
        Ok(())
    }

    #[test]
    fn discarding_last_chunk_removes_run_directory() -> Result<()> {
        let dir = tempdir()?;
        let source = write_csv(dir.path(), "big.csv", &["Name", "Email"], &people(5))?;
        let processor = processor(dir.path());
        let chunks = processor
            .splitter()
            .split(&source, 2, "csv")?
            .collect::<std::result::Result<Vec<_>, DataError>>()?;
        assert_eq!(chunks.len(), 3);

        let run_dir = Path::new(&chunks[0].path).parent().unwrap().to_path_buf();
        processor.discard_chunk(&chunks[0]);
        assert!(run_dir.exists());
        for chunk in &chunks[1..] {
            processor.discard_chunk(chunk);
        }
        assert!(!run_dir.exists());
        Ok(())
    }
}
