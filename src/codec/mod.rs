//! Row-level readers and writers for the supported tabular formats.
//!
//! Every reader yields rows grouped by sheet, with the first row of a sheet
//! being its header. CSV and Parquet files carry exactly one sheet.

pub mod columnar;
pub mod delimited;

use serde_json::Value;
use std::{fmt, path::Path, str::FromStr};

use crate::error::{DataError, Result};

/// One row of cells as text.
pub type Row = Vec<String>;

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Csv,
    Parquet,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Parquet => "parquet",
        }
    }

    /// Format implied by a path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for Format {
    type Err = DataError;

    fn from_str(token: &str) -> Result<Self> {
        match token.trim().to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "parquet" | "pq" => Ok(Format::Parquet),
            _ => Err(DataError::config(format!("unsupported format: {token:?}"))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Rows of one sheet, pulled lazily.
pub struct Sheet {
    pub name: String,
    rows: Box<dyn Iterator<Item = Result<Row>>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Box<dyn Iterator<Item = Result<Row>>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }
}

impl Iterator for Sheet {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl fmt::Debug for Sheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sheet").field("name", &self.name).finish()
    }
}

/// Sheet-by-sheet access to a tabular file. Dropping the reader closes it.
pub trait RowReader {
    /// Next sheet in file order, `None` once all sheets were handed out.
    fn next_sheet(&mut self) -> Result<Option<Sheet>>;
}

/// Appends rows to a new file.
pub trait RowWriter {
    fn add_row(&mut self, row: &[String]) -> Result<()>;

    /// Finish the file. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Open a reader for `path`, picking the codec from its extension.
pub fn open_reader(path: &Path) -> Result<Box<dyn RowReader>> {
    match Format::from_path(path)? {
        Format::Csv => Ok(Box::new(delimited::CsvRowReader::open(path)?)),
        Format::Parquet => Ok(Box::new(columnar::ParquetRowReader::open(path)?)),
    }
}

/// Create `path` and return a writer for `format`.
pub fn create_writer(format: Format, path: &Path) -> Result<Box<dyn RowWriter>> {
    match format {
        Format::Csv => Ok(Box::new(delimited::CsvRowWriter::create(path)?)),
        Format::Parquet => Ok(Box::new(columnar::ParquetRowWriter::create(path)?)),
    }
}

/// Number of data rows (header excluded) without decoding cell values.
pub fn count_rows(path: &Path) -> Result<u64> {
    match Format::from_path(path)? {
        Format::Csv => delimited::count_records(path),
        Format::Parquet => columnar::count_records(path),
    }
}

/// Text form of a mapped export value.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
