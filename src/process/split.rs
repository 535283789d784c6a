use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, info, instrument, warn};

use crate::{
    codec::{create_writer, open_reader, Format, Row, RowReader, Sheet},
    config::Settings,
    error::{DataError, Result},
    store::FileStore,
};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkLocation {
    /// A file on this machine; the consumer deletes it.
    Local,
    /// A storage key; the local copy is already gone.
    Durable,
}

/// One chunk file produced by [`ChunkSplitter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// 1-based, in source order.
    pub number: u64,
    pub path: String,
    pub location: ChunkLocation,
    /// Source position of the chunk's first data row (1-based).
    pub first_row: u64,
    /// Data rows in the chunk, header excluded.
    pub rows: usize,
}

/// Splits tabular files into same-format chunk files that each repeat the
/// header row.
#[derive(Clone)]
pub struct ChunkSplitter {
    temp_root: PathBuf,
    prefix: String,
    cloud: bool,
    store: Arc<dyn FileStore>,
}

impl ChunkSplitter {
    pub fn new(settings: &Settings, store: Arc<dyn FileStore>) -> Self {
        Self {
            temp_root: settings.local_temp_root(),
            prefix: settings.prefix().to_string(),
            cloud: settings.use_cloud_temp,
            store,
        }
    }

    /// Open `source` and split it into chunks of `chunk_rows` data rows,
    /// written as `format`. Arguments are checked before the file is opened.
    #[instrument(level = "info", skip(self, source), fields(source = %source.display()))]
    pub fn split(&self, source: &Path, chunk_rows: usize, format: &str) -> Result<Chunks> {
        check_chunk_rows(chunk_rows)?;
        let format: Format = format.parse()?;
        let reader = open_reader(source)?;
        Ok(self.start(reader, chunk_rows, format))
    }

    /// Split an already opened reader.
    pub fn split_reader(
        &self,
        reader: Box<dyn RowReader>,
        chunk_rows: usize,
        format: &str,
    ) -> Result<Chunks> {
        check_chunk_rows(chunk_rows)?;
        let format: Format = format.parse()?;
        Ok(self.start(reader, chunk_rows, format))
    }

    fn start(&self, reader: Box<dyn RowReader>, chunk_rows: usize, format: Format) -> Chunks {
        let run = format!(
            "run_{}_{}_{}",
            chrono::Utc::now().timestamp_micros(),
            std::process::id(),
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        info!(%run, chunk_rows, %format, cloud = self.cloud, "splitting");
        Chunks {
            reader,
            sheet: None,
            at_sheet_start: false,
            source_done: false,
            finished: false,
            header: None,
            buffer: Vec::with_capacity(chunk_rows.min(100_000)),
            chunk_rows,
            next_number: 1,
            rows_written: 0,
            format,
            run_dir: self.temp_root.join(&run),
            run_key: if self.prefix.is_empty() {
                run
            } else {
                format!("{}/{run}", self.prefix)
            },
            cloud: self.cloud,
            store: self.store.clone(),
        }
    }
}

fn check_chunk_rows(chunk_rows: usize) -> Result<()> {
    if chunk_rows == 0 {
        return Err(DataError::config("chunk size must be at least 1 row"));
    }
    Ok(())
}

/// Lazy sequence of chunks; a chunk file is only written when pulled.
///
/// The first row of every sheet is a header and is skipped; the first
/// sheet's header is repeated at the top of each chunk.
pub struct Chunks {
    reader: Box<dyn RowReader>,
    sheet: Option<Sheet>,
    at_sheet_start: bool,
    source_done: bool,
    finished: bool,
    header: Option<Row>,
    buffer: Vec<Row>,
    chunk_rows: usize,
    next_number: u64,
    rows_written: u64,
    format: Format,
    run_dir: PathBuf,
    run_key: String,
    cloud: bool,
    store: Arc<dyn FileStore>,
}

impl Chunks {
    /// Local directory the chunk files of this run are written to.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn header(&self) -> Option<&Row> {
        self.header.as_ref()
    }

    /// Pull rows until the buffer holds a full chunk or the source ends.
    fn fill(&mut self) -> Result<()> {
        while self.buffer.len() < self.chunk_rows && !self.source_done {
            let Some(sheet) = self.sheet.as_mut() else {
                match self.reader.next_sheet()? {
                    Some(sheet) => {
                        debug!(sheet = %sheet.name, "reading sheet");
                        self.sheet = Some(sheet);
                        self.at_sheet_start = true;
                    }
                    None => self.source_done = true,
                }
                continue;
            };
            match sheet.next() {
                Some(row) => {
                    let row = row?;
                    if self.at_sheet_start {
                        self.at_sheet_start = false;
                        if self.header.is_none() {
                            self.header = Some(row);
                        }
                        continue;
                    }
                    self.buffer.push(row);
                }
                None => self.sheet = None,
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<ChunkDescriptor> {
        let number = self.next_number;
        let file_name = format!("chunk_{number}.{}", self.format.extension());
        // create_dir_all is fine with another process creating it first
        fs::create_dir_all(&self.run_dir)?;
        let local = self.run_dir.join(&file_name);

        let mut written = write_chunk(self.format, &local, self.header.as_ref(), &self.buffer);
        if written.is_err() && !self.run_dir.exists() {
            // a worker removed the run directory after discarding its last chunk
            fs::create_dir_all(&self.run_dir)?;
            written = write_chunk(self.format, &local, self.header.as_ref(), &self.buffer);
        }
        if let Err(e) = written {
            if let Err(cleanup) = self.store.delete_local(&local) {
                warn!(path = %local.display(), error = %cleanup, "could not delete partial chunk");
            }
            return Err(e);
        }

        let rows = self.buffer.len();
        let first_row = self.rows_written + 1;
        self.rows_written += rows as u64;
        self.buffer.clear();
        self.next_number += 1;
        debug!(chunk = number, rows, path = %local.display(), "wrote chunk");

        if self.cloud {
            let key = format!("{}/{file_name}", self.run_key);
            self.store.upload(&local, &key)?;
            self.store.delete_local(&local)?;
            return Ok(ChunkDescriptor {
                number,
                path: key,
                location: ChunkLocation::Durable,
                first_row,
                rows,
            });
        }

        Ok(ChunkDescriptor {
            number,
            path: local.to_string_lossy().into_owned(),
            location: ChunkLocation::Local,
            first_row,
            rows,
        })
    }
}

fn write_chunk(format: Format, path: &Path, header: Option<&Row>, rows: &[Row]) -> Result<()> {
    let mut writer = create_writer(format, path)?;
    let written = header
        .into_iter()
        .chain(rows)
        .try_for_each(|row| writer.add_row(row));
    let closed = writer.close();
    written.and(closed)
}

impl Iterator for Chunks {
    type Item = Result<ChunkDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Err(e) = self.fill() {
            self.finished = true;
            return Some(Err(e));
        }
        if self.buffer.is_empty() {
            self.finished = true;
            return None;
        }
        let chunk = self.flush();
        if chunk.is_err() {
            self.finished = true;
        }
        Some(chunk)
    }
}

impl Drop for Chunks {
    fn drop(&mut self) {
        // only succeeds once consumers removed every chunk
        if self.run_dir.is_dir() {
            if let Err(e) = fs::remove_dir(&self.run_dir) {
                debug!(dir = %self.run_dir.display(), error = %e, "run directory kept");
            }
        }
    }
}
