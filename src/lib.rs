//! Streaming import/export of large tabular files.
//!
//! Rows are read lazily, mapped and validated by a caller-supplied contract,
//! and flushed in bounded batches. Oversized inputs are split into chunk
//! files that can be imported inline or handed to workers through a queue.

pub mod codec;
pub mod config;
pub mod contract;
pub mod error;
pub mod process;
pub mod queue;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use contract::{Exportable, Importable, Record};
pub use error::{DataError, Result};
pub use process::{DataProcessor, RunStats};
