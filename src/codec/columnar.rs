use arrow::{
    array::{Array, ArrayRef, StringArray},
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
    record_batch::RecordBatch,
    util::display::{ArrayFormatter, FormatOptions},
};
use parquet::{
    arrow::{
        arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
        ArrowWriter,
    },
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

use super::{Row, RowReader, RowWriter, Sheet};
use crate::error::Result;

const READ_BATCH_ROWS: usize = 8_192;
const WRITE_BATCH_ROWS: usize = 8_192;

/// Parquet reader. Column names form the header row, followed by every
/// record rendered as text. The file is one sheet.
pub struct ParquetRowReader {
    inner: Option<ParquetRows>,
    name: String,
}

impl ParquetRowReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let header: Row = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let batches = builder.with_batch_size(READ_BATCH_ROWS).build()?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sheet1")
            .to_string();
        Ok(Self {
            inner: Some(ParquetRows {
                header: Some(header),
                batches,
                current: None,
                offset: 0,
            }),
            name,
        })
    }
}

impl RowReader for ParquetRowReader {
    fn next_sheet(&mut self) -> Result<Option<Sheet>> {
        Ok(self
            .inner
            .take()
            .map(|rows| Sheet::new(self.name.clone(), Box::new(rows))))
    }
}

struct ParquetRows {
    header: Option<Row>,
    batches: ParquetRecordBatchReader,
    current: Option<RecordBatch>,
    offset: usize,
}

impl Iterator for ParquetRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header) = self.header.take() {
            return Some(Ok(header));
        }
        loop {
            if let Some(batch) = &self.current {
                if self.offset < batch.num_rows() {
                    let row = render_row(batch, self.offset);
                    self.offset += 1;
                    return Some(row);
                }
            }
            match self.batches.next()? {
                Ok(batch) => {
                    self.current = Some(batch);
                    self.offset = 0;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

fn render_row(batch: &RecordBatch, idx: usize) -> Result<Row> {
    let options = FormatOptions::default();
    batch
        .columns()
        .iter()
        .map(|col| -> Result<String> {
            if col.is_null(idx) {
                return Ok(String::new());
            }
            if let Some(strings) = col.as_any().downcast_ref::<StringArray>() {
                return Ok(strings.value(idx).to_string());
            }
            let formatter = ArrayFormatter::try_new(col.as_ref(), &options)?;
            Ok(formatter.value(idx).to_string())
        })
        .collect()
}

/// Parquet writer. The first row added names the columns; every later row
/// is buffered and written as all-`Utf8` record batches.
pub struct ParquetRowWriter {
    path: PathBuf,
    file: Option<File>,
    schema: Option<SchemaRef>,
    writer: Option<ArrowWriter<File>>,
    pending: Vec<Vec<Option<String>>>,
    closed: bool,
}

impl ParquetRowWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            schema: None,
            writer: None,
            pending: Vec::new(),
            closed: false,
        })
    }

    fn start(&mut self, schema: SchemaRef) -> Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| std::io::Error::other("Parquet writer already started"))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        self.writer = Some(ArrowWriter::try_new(file, schema.clone(), Some(props))?);
        self.schema = Some(schema);
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let (Some(schema), Some(writer)) = (&self.schema, self.writer.as_mut()) else {
            return Ok(());
        };
        let width = schema.fields().len();
        let columns: Vec<ArrayRef> = (0..width)
            .map(|c| {
                let values: Vec<Option<String>> =
                    self.pending.iter().map(|row| row[c].clone()).collect();
                Arc::new(StringArray::from(values)) as ArrayRef
            })
            .collect();
        let batch = RecordBatch::try_new(schema.clone(), columns)?;
        writer.write(&batch)?;
        debug!(rows = batch.num_rows(), path = %self.path.display(), "wrote Parquet batch");
        self.pending.clear();
        Ok(())
    }
}

impl RowWriter for ParquetRowWriter {
    fn add_row(&mut self, row: &[String]) -> Result<()> {
        if self.closed {
            return Err(std::io::Error::other("write to a closed Parquet writer").into());
        }
        let Some(schema) = &self.schema else {
            let fields: Vec<Field> = row
                .iter()
                .map(|name| Field::new(name, DataType::Utf8, true))
                .collect();
            return self.start(Arc::new(Schema::new(fields)));
        };

        let width = schema.fields().len();
        if row.len() > width {
            return Err(ArrowError::InvalidArgumentError(format!(
                "row has {} cells but the file has {} columns",
                row.len(),
                width
            ))
            .into());
        }
        let mut cells: Vec<Option<String>> = row.iter().cloned().map(Some).collect();
        cells.resize(width, None);
        self.pending.push(cells);

        if self.pending.len() >= WRITE_BATCH_ROWS {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // With no header row there is no schema; the empty file stays as is.
        self.flush_pending()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

impl Drop for ParquetRowWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(path = %self.path.display(), error = %e, "failed to finish Parquet file");
            }
        }
    }
}

/// Row count straight from the footer metadata.
pub fn count_records(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let rows = builder.metadata().file_metadata().num_rows();
    Ok(rows.max(0) as u64)
}
