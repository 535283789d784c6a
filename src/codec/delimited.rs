use csv::{ByteRecord, ReaderBuilder, Writer, WriterBuilder};
use std::{fs::File, path::Path};
use tracing::trace;

use super::{Row, RowReader, RowWriter, Sheet};
use crate::error::Result;

/// Comma-separated reader. The whole file is one sheet.
pub struct CsvRowReader {
    inner: Option<csv::Reader<File>>,
    name: String,
}

impl CsvRowReader {
    pub fn open(path: &Path) -> Result<Self> {
        let inner = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // rows with differing field counts are the caller's problem
            .from_path(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sheet1")
            .to_string();
        Ok(Self {
            inner: Some(inner),
            name,
        })
    }
}

impl RowReader for CsvRowReader {
    fn next_sheet(&mut self) -> Result<Option<Sheet>> {
        let Some(reader) = self.inner.take() else {
            return Ok(None);
        };
        let rows = reader.into_records().map(|record| {
            let record = record?;
            Ok(record.iter().map(str::to_string).collect::<Row>())
        });
        Ok(Some(Sheet::new(self.name.clone(), Box::new(rows))))
    }
}

/// Comma-separated writer; fields are quoted only when needed.
pub struct CsvRowWriter {
    inner: Option<Writer<File>>,
}

impl CsvRowWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let inner = WriterBuilder::new().flexible(true).from_path(path)?;
        Ok(Self { inner: Some(inner) })
    }
}

impl RowWriter for CsvRowWriter {
    fn add_row(&mut self, row: &[String]) -> Result<()> {
        match self.inner.as_mut() {
            Some(w) => Ok(w.write_record(row)?),
            None => Err(std::io::Error::other("write to a closed CSV writer").into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut w) = self.inner.take() {
            w.flush()?;
        }
        Ok(())
    }
}

/// Count data records by scanning raw bytes; the first record is the header.
pub fn count_records(path: &Path) -> Result<u64> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut record = ByteRecord::new();
    let mut total = 0u64;
    while reader.read_byte_record(&mut record)? {
        total += 1;
    }
    trace!(path = %path.display(), records = total, "counted CSV records");
    Ok(total.saturating_sub(1))
}
