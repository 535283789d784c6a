use std::{path::PathBuf, time::Instant};
use tracing::{debug, info, instrument, warn};

use super::{policy, DataProcessor, RunStats};
use crate::{
    codec::{self, cell_text, Format, RowWriter},
    contract::{Exportable, Record},
    error::{DataError, Result},
};

/// A mapped row waiting to be written, with the source row kept for error
/// reports.
struct Pending {
    number: u64,
    raw: Record,
    cells: Vec<String>,
}

struct ExportRun<'a> {
    contract: &'a mut dyn Exportable,
    batch_size: usize,
    estimate: Option<u64>,
    error_handling: bool,
    progress: bool,
    stats: RunStats,
}

impl DataProcessor {
    /// Write every row of `contract`'s query to `dest` in `format`.
    ///
    /// The file is built in the temp area, uploaded, then the temp copy is
    /// removed whatever happened.
    #[instrument(level = "info", skip(self, contract))]
    pub fn export(
        &self,
        contract: &mut dyn Exportable,
        dest: &str,
        format: &str,
    ) -> Result<RunStats> {
        let started = Instant::now();
        info!(dest, format, "export started");

        let mut run = ExportRun::new(contract, self.settings.batch_size);
        let mut temp = None;
        let outcome = run.execute(self, dest, format, &mut temp);

        if let Err(e) = &outcome {
            if run.progress {
                if let Some(p) = run.contract.progress() {
                    p.on_failed(e);
                }
            }
        }
        if let Some(path) = temp {
            if let Err(e) = self.store.delete_local(&path) {
                warn!(path = %path.display(), error = %e, "could not delete export temp file");
            }
        }

        match outcome {
            Ok(()) => {
                info!(
                    dest,
                    elapsed = ?started.elapsed(),
                    total = run.stats.total_rows,
                    processed = run.stats.processed_rows,
                    errors = run.stats.error_count,
                    "export finished"
                );
                Ok(run.stats)
            }
            Err(source) => {
                warn!(dest, error = %source, "export failed");
                Err(DataError::Processing {
                    stats: run.stats,
                    source: Box::new(source),
                })
            }
        }
    }
}

impl<'a> ExportRun<'a> {
    fn new(contract: &'a mut dyn Exportable, default_batch: usize) -> Self {
        let batch_size = contract.batch_size().unwrap_or(default_batch).max(1);
        let estimate = contract.estimated_count();
        let error_handling = contract.error_handling().is_some();
        let progress = contract.progress().is_some();
        Self {
            contract,
            batch_size,
            estimate,
            error_handling,
            progress,
            stats: RunStats::default(),
        }
    }

    fn execute(
        &mut self,
        processor: &DataProcessor,
        dest: &str,
        format: &str,
        temp: &mut Option<PathBuf>,
    ) -> Result<()> {
        let format: Format = format.parse()?;
        let path = processor.store.temp_file("export_", format.extension())?;
        *temp = Some(path.clone());

        if self.progress {
            let total = self.estimate.unwrap_or(0);
            if let Some(p) = self.contract.progress() {
                p.on_start(total);
            }
        }

        let mut writer = codec::create_writer(format, &path)?;
        let written = self.write_all(writer.as_mut());
        // close on every path so the file is never left half written
        let closed = writer.close();
        written?;
        closed?;

        processor.store.upload(&path, dest)?;
        debug!(dest, "export uploaded");

        if self.progress {
            if let Some(p) = self.contract.progress() {
                p.on_complete();
            }
        }
        Ok(())
    }

    fn write_all(&mut self, writer: &mut dyn RowWriter) -> Result<()> {
        let headings = self.contract.headings();
        if !headings.is_empty() {
            writer.add_row(&headings)?;
        }

        let rows = self
            .contract
            .query()
            .map_err(|e| DataError::row(0, e.context("export query failed")))?;
        let mut batch: Vec<Pending> = Vec::with_capacity(self.batch_size);
        let mut pulled = 0u64;

        for item in rows {
            pulled += 1;
            let raw = item.map_err(|e| DataError::row(pulled, e))?;
            match self.contract.map(&raw) {
                Ok(values) => batch.push(Pending {
                    number: pulled,
                    raw,
                    cells: values.iter().map(cell_text).collect(),
                }),
                Err(e) => {
                    self.route(DataError::row(pulled, e), &raw, pulled)?;
                    continue;
                }
            }
            if batch.len() >= self.batch_size {
                self.write_batch(writer, std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            self.write_batch(writer, batch)?;
        }

        self.stats.total_rows = self.estimate.unwrap_or(pulled);
        Ok(())
    }

    fn write_batch(&mut self, writer: &mut dyn RowWriter, batch: Vec<Pending>) -> Result<()> {
        for row in batch {
            match writer.add_row(&row.cells) {
                Ok(()) => self.stats.processed_rows += 1,
                Err(e) => self.route(e, &row.raw, row.number)?,
            }
        }
        if self.progress {
            if let Some(total) = self.estimate {
                let done = self.stats.processed_rows;
                if let Some(p) = self.contract.progress() {
                    p.on_progress(done, total);
                }
            }
        }
        Ok(())
    }

    fn route(&mut self, error: DataError, row: &Record, number: u64) -> Result<()> {
        let handler = if self.error_handling {
            self.contract.error_handling()
        } else {
            None
        };
        policy::route(handler, &mut self.stats, error, row, number, 1)
    }
}
