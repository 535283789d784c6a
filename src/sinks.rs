//! Contracts used by the command line tool.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
};
use tabstream::{
    codec::{count_rows, open_reader},
    contract::{
        ChunkPolicy, Exportable, Importable, QueuePolicy, Record, RecordStream, Rules,
        WithErrorHandling, WithProgress,
    },
    process::header_keys,
    DataError,
};
use tracing::{debug, error, info, warn};

/// Registry key of [`JsonLinesImport`].
pub const JSONL_CONTRACT: &str = "jsonl";

/// Everything a worker needs to rebuild a [`JsonLinesImport`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkOptions {
    pub out: PathBuf,
    pub batch_size: Option<usize>,
    pub max_file_size: Option<u64>,
    pub chunk_rows: Option<usize>,
    pub skip_errors: bool,
    pub max_errors: Option<u64>,
    /// `field=rule|rule` entries.
    pub rules: Vec<String>,
    pub queue: Option<String>,
}

fn parse_rules(specs: &[String]) -> Result<Option<Rules>> {
    if specs.is_empty() {
        return Ok(None);
    }
    let mut rules = Rules::new();
    for spec in specs {
        let Some((field, rule)) = spec.split_once('=') else {
            bail!("rule {spec:?} is not field=rules");
        };
        rules = rules.field(field.trim(), rule)?;
    }
    Ok(Some(rules))
}

/// Appends every imported record to a JSON-lines file.
pub struct JsonLinesImport {
    options: SinkOptions,
    rules: Option<Rules>,
    queue: Option<QueuePolicy>,
    file: Option<File>,
}

impl JsonLinesImport {
    /// `queued` hands batches and chunks to the dispatcher instead of
    /// writing them here.
    pub fn new(options: SinkOptions, queued: bool) -> Result<Self> {
        let rules = parse_rules(&options.rules)?;
        let queue = if queued {
            let mut policy = QueuePolicy::new(JSONL_CONTRACT, serde_json::to_value(&options)?);
            if let Some(q) = &options.queue {
                policy = policy.on_queue(q.clone());
            }
            Some(policy)
        } else {
            None
        };
        Ok(Self {
            options,
            rules,
            queue,
            file: None,
        })
    }

    /// Rebuild from job params; always processes inline.
    pub fn from_params(params: &Value) -> Result<Self> {
        let options: SinkOptions =
            serde_json::from_value(params.clone()).context("bad jsonl job params")?;
        Self::new(options, false)
    }

    fn file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.options.out)
                .with_context(|| format!("opening {}", self.options.out.display()))?;
            self.file = Some(file);
        }
        self.file.as_mut().context("output file not open")
    }
}

impl Importable for JsonLinesImport {
    fn map(&mut self, row: &Record) -> Result<Record> {
        Ok(row.clone())
    }

    fn process(&mut self, batch: Vec<Record>) -> Result<()> {
        let mut text = String::new();
        for record in &batch {
            text.push_str(&serde_json::to_string(record)?);
            text.push('\n');
        }
        // one write per batch keeps lines whole when workers share the file
        self.file()?.write_all(text.as_bytes())?;
        debug!(rows = batch.len(), "batch written");
        Ok(())
    }

    fn batch_size(&self) -> Option<usize> {
        self.options.batch_size
    }

    fn chunking(&self) -> Option<ChunkPolicy> {
        self.options.max_file_size.map(|max_file_size| ChunkPolicy {
            max_file_size,
            chunk_rows: self.options.chunk_rows,
        })
    }

    fn queue_policy(&self) -> Option<QueuePolicy> {
        self.queue.clone()
    }

    fn rules(&self) -> Option<Rules> {
        self.rules.clone()
    }

    fn error_handling(&mut self) -> Option<&mut dyn WithErrorHandling> {
        Some(self)
    }

    fn progress(&mut self) -> Option<&mut dyn WithProgress> {
        Some(self)
    }
}

impl WithErrorHandling for JsonLinesImport {
    fn on_error(&mut self, error: &DataError, _row: &Record, row_number: u64) {
        warn!(row = row_number, error = %error, "row rejected");
    }

    fn skip_on_error(&self) -> bool {
        self.options.skip_errors
    }

    fn max_errors(&self) -> Option<u64> {
        self.options.max_errors
    }
}

impl WithProgress for JsonLinesImport {
    fn on_start(&mut self, total: u64) {
        info!(total, out = %self.options.out.display(), "import starting");
    }

    fn on_progress(&mut self, done: u64, total: u64) {
        debug!(done, total, "progress");
    }

    fn on_failed(&mut self, error: &DataError) {
        error!(error = %error, "import failed");
    }
}

/// Export source reading another tabular file; used to convert formats.
pub struct FileExport {
    path: PathBuf,
    header: Vec<String>,
    keys: Vec<String>,
    estimate: u64,
    batch_size: Option<usize>,
}

impl FileExport {
    pub fn open(path: PathBuf, batch_size: Option<usize>) -> Result<Self> {
        let mut reader = open_reader(&path)?;
        let header = match reader.next_sheet()? {
            Some(mut sheet) => sheet.next().transpose()?.unwrap_or_default(),
            None => Vec::new(),
        };
        let keys = header_keys(&header);
        let estimate = count_rows(&path)?;
        Ok(Self {
            path,
            header,
            keys,
            estimate,
            batch_size,
        })
    }
}

impl Exportable for FileExport {
    fn query(&mut self) -> Result<RecordStream> {
        let mut reader = open_reader(&self.path)?;
        let Some(sheet) = reader.next_sheet()? else {
            return Ok(Box::new(std::iter::empty()));
        };
        let keys = self.keys.clone();
        Ok(Box::new(sheet.skip(1).map(move |row| -> Result<Record> {
            let row = row?;
            Ok(keys
                .iter()
                .zip(row.into_iter().map(Value::String).chain(std::iter::repeat(Value::Null)))
                .map(|(k, v)| (k.clone(), v))
                .collect())
        })))
    }

    fn headings(&self) -> Vec<String> {
        self.header.clone()
    }

    fn map(&mut self, row: &Record) -> Result<Vec<Value>> {
        Ok(self
            .keys
            .iter()
            .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
            .collect())
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    fn estimated_count(&self) -> Option<u64> {
        Some(self.estimate)
    }

    fn progress(&mut self) -> Option<&mut dyn WithProgress> {
        Some(self)
    }
}

impl WithProgress for FileExport {
    fn on_progress(&mut self, done: u64, total: u64) {
        info!(done, total, "converted");
    }
}
