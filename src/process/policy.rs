use tracing::warn;

use super::RunStats;
use crate::{
    contract::{Record, WithErrorHandling},
    error::{DataError, Result},
};

/// Apply the error policy to one failure covering `weight` rows.
///
/// `Ok` means the rows were skipped and the run goes on; `Err` aborts it,
/// either with `error` itself or with `ErrorBudgetExceeded` wrapping it.
pub(crate) fn route(
    handler: Option<&mut dyn WithErrorHandling>,
    stats: &mut RunStats,
    error: DataError,
    row: &Record,
    row_number: u64,
    weight: u64,
) -> Result<()> {
    stats.error_count += weight;

    let Some(handler) = handler else {
        return Err(error);
    };
    handler.on_error(&error, row, row_number);
    if !handler.skip_on_error() {
        return Err(error);
    }
    if let Some(max) = handler.max_errors() {
        if stats.error_count > max {
            warn!(max, errors = stats.error_count, "error budget exhausted");
            return Err(DataError::ErrorBudgetExceeded {
                max,
                source: Box::new(error),
            });
        }
    }
    warn!(row = row_number, rows = weight, error = %error, "skipped");
    Ok(())
}
