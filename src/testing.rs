//! Fixtures shared by the unit tests.

use anyhow::{anyhow, bail};
use serde_json::{json, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::{
    codec,
    config::Settings,
    contract::{
        ChunkPolicy, Exportable, Importable, ProcessRow, QueuePolicy, Record, RecordStream, Rules,
        WithErrorHandling, WithProgress,
    },
    error::DataError,
    process::DataProcessor,
    queue::ContractRegistry,
    store::DiskStore,
};

pub(crate) fn init_test_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tabstream=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub(crate) fn write_csv(
    dir: &Path,
    name: &str,
    header: &[&str],
    rows: &[Vec<String>],
) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(path)
}

/// Every row of every sheet, header included.
pub(crate) fn read_rows(path: &Path) -> anyhow::Result<Vec<Vec<String>>> {
    let mut reader = codec::open_reader(path)?;
    let mut rows = Vec::new();
    while let Some(sheet) = reader.next_sheet()? {
        for row in sheet {
            rows.push(row?);
        }
    }
    Ok(rows)
}

/// Storage under `<dir>/storage`, scratch space under `<dir>/tmp`.
pub(crate) fn settings(dir: &Path) -> Settings {
    Settings {
        storage_root: dir.join("storage"),
        temp_dir: dir.join("tmp"),
        ..Settings::default()
    }
}

pub(crate) fn processor(dir: &Path) -> DataProcessor {
    let settings = settings(dir);
    let store = Arc::new(DiskStore::from_settings(&settings));
    DataProcessor::new(settings, store)
}

/// Error handler and progress sink that remembers every call.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    skip: bool,
    max: Option<u64>,
    pub errors: Vec<u64>,
    pub error_rows: Vec<Record>,
    pub started: Option<u64>,
    pub progress: Vec<(u64, u64)>,
    pub completed: usize,
    pub failed: usize,
}

impl Recorder {
    pub fn skipping(max: Option<u64>) -> Self {
        Self {
            skip: true,
            max,
            ..Self::default()
        }
    }

    pub fn aborting() -> Self {
        Self::default()
    }
}

impl WithErrorHandling for Recorder {
    fn on_error(&mut self, _error: &DataError, row: &Record, row_number: u64) {
        self.errors.push(row_number);
        self.error_rows.push(row.clone());
    }

    fn skip_on_error(&self) -> bool {
        self.skip
    }

    fn max_errors(&self) -> Option<u64> {
        self.max
    }
}

impl WithProgress for Recorder {
    fn on_start(&mut self, total: u64) {
        self.started = Some(total);
    }

    fn on_progress(&mut self, done: u64, total: u64) {
        self.progress.push((done, total));
    }

    fn on_complete(&mut self) {
        self.completed += 1;
    }

    fn on_failed(&mut self, _error: &DataError) {
        self.failed += 1;
    }
}

fn names(rows: &[u64]) -> Vec<String> {
    rows.iter().map(|n| format!("User {n}")).collect()
}

fn is_failing(fail: &[String], record: &Record) -> bool {
    record
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| fail.iter().any(|f| f == name))
}

/// Import contract that keeps what it stores. Rows named `User <n>` listed
/// in `fail_rows` are rejected by `process`/`process_row`.
#[derive(Default)]
pub(crate) struct TestImport {
    pub stored: Vec<Record>,
    pub batches: Vec<usize>,
    recorder: Recorder,
    handle_errors: bool,
    report_progress: bool,
    per_row: bool,
    batch: Option<usize>,
    chunking: Option<ChunkPolicy>,
    queue: Option<QueuePolicy>,
    rules: Option<Rules>,
    fail: Vec<String>,
}

impl TestImport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch = Some(n);
        self
    }

    pub fn rules(mut self, rules: Rules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn errors(mut self, recorder: Recorder) -> Self {
        self.recorder = recorder;
        self.handle_errors = true;
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.report_progress = true;
        self
    }

    pub fn per_row(mut self) -> Self {
        self.per_row = true;
        self
    }

    pub fn fail_rows(mut self, rows: &[u64]) -> Self {
        self.fail = names(rows);
        self
    }

    pub fn chunking(mut self, max_file_size: u64, chunk_rows: Option<usize>) -> Self {
        self.chunking = Some(ChunkPolicy {
            max_file_size,
            chunk_rows,
        });
        self
    }

    pub fn queued(mut self, job: &str, queue: Option<&str>) -> Self {
        let mut policy = QueuePolicy::new(job, json!({}));
        if let Some(q) = queue {
            policy = policy.on_queue(q);
        }
        self.queue = Some(policy);
        self
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }
}

impl Importable for TestImport {
    fn map(&mut self, row: &Record) -> anyhow::Result<Record> {
        Ok(row.clone())
    }

    fn process(&mut self, batch: Vec<Record>) -> anyhow::Result<()> {
        if batch.iter().any(|r| is_failing(&self.fail, r)) {
            bail!("batch rejected");
        }
        self.batches.push(batch.len());
        self.stored.extend(batch);
        Ok(())
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch
    }

    fn chunking(&self) -> Option<ChunkPolicy> {
        self.chunking.clone()
    }

    fn queue_policy(&self) -> Option<QueuePolicy> {
        self.queue.clone()
    }

    fn rules(&self) -> Option<Rules> {
        self.rules.clone()
    }

    fn error_handling(&mut self) -> Option<&mut dyn WithErrorHandling> {
        if self.handle_errors {
            Some(&mut self.recorder)
        } else {
            None
        }
    }

    fn progress(&mut self) -> Option<&mut dyn WithProgress> {
        if self.report_progress {
            Some(&mut self.recorder)
        } else {
            None
        }
    }

    fn row_processor(&mut self) -> Option<&mut dyn ProcessRow> {
        if self.per_row {
            Some(self)
        } else {
            None
        }
    }
}

impl ProcessRow for TestImport {
    fn process_row(&mut self, record: &Record, row_number: u64) -> anyhow::Result<()> {
        if is_failing(&self.fail, record) {
            bail!("row {row_number} rejected");
        }
        self.stored.push(record.clone());
        Ok(())
    }
}

/// What a worker rebuilds: stores into a shared sink.
struct SinkImport {
    sink: Arc<Mutex<Vec<Record>>>,
}

impl Importable for SinkImport {
    fn map(&mut self, row: &Record) -> anyhow::Result<Record> {
        Ok(row.clone())
    }

    fn process(&mut self, batch: Vec<Record>) -> anyhow::Result<()> {
        self.sink
            .lock()
            .map_err(|_| anyhow!("sink poisoned"))?
            .extend(batch);
        Ok(())
    }
}

/// Registry with a `people` contract writing into `sink`.
pub(crate) fn sink_registry(sink: Arc<Mutex<Vec<Record>>>) -> ContractRegistry {
    ContractRegistry::new().register("people", move |_params: &Value| {
        Ok(Box::new(SinkImport { sink: sink.clone() }) as Box<dyn Importable + Send>)
    })
}

/// Export of `count` generated people: `User <i>`, `user<i>@example.com`, age `20 + i`.
#[derive(Default)]
pub(crate) struct TestExport {
    count: usize,
    batch: Option<usize>,
    estimate: Option<u64>,
    fail: Vec<String>,
    fail_query: bool,
    recorder: Recorder,
    handle_errors: bool,
    report_progress: bool,
}

impl TestExport {
    pub fn people(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch = Some(n);
        self
    }

    pub fn estimate(mut self, n: u64) -> Self {
        self.estimate = Some(n);
        self
    }

    pub fn fail_rows(mut self, rows: &[u64]) -> Self {
        self.fail = names(rows);
        self
    }

    pub fn fail_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    pub fn errors(mut self, recorder: Recorder) -> Self {
        self.recorder = recorder;
        self.handle_errors = true;
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.report_progress = true;
        self
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }
}

impl Exportable for TestExport {
    fn query(&mut self) -> anyhow::Result<RecordStream> {
        if self.fail_query {
            bail!("source unavailable");
        }
        let count = self.count;
        Ok(Box::new((1..=count).map(|i| {
            let mut row = Record::new();
            row.insert("name".into(), json!(format!("User {i}")));
            row.insert("email".into(), json!(format!("user{i}@example.com")));
            row.insert("age".into(), json!(20 + i));
            Ok(row)
        })))
    }

    fn headings(&self) -> Vec<String> {
        vec!["Name".into(), "Email".into(), "Age".into()]
    }

    fn map(&mut self, row: &Record) -> anyhow::Result<Vec<Value>> {
        if is_failing(&self.fail, row) {
            bail!("cannot map {}", row["name"]);
        }
        Ok(["name", "email", "age"]
            .iter()
            .map(|k| row.get(*k).cloned().unwrap_or(Value::Null))
            .collect())
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch
    }

    fn estimated_count(&self) -> Option<u64> {
        self.estimate
    }

    fn error_handling(&mut self) -> Option<&mut dyn WithErrorHandling> {
        if self.handle_errors {
            Some(&mut self.recorder)
        } else {
            None
        }
    }

    fn progress(&mut self) -> Option<&mut dyn WithProgress> {
        if self.report_progress {
            Some(&mut self.recorder)
        } else {
            None
        }
    }
}
