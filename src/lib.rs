pub mod config;
pub mod engine;
pub mod error;
pub mod mobile;
pub mod store;
pub mod transaction;

pub use crate::config::UploadConfig;
pub use crate::engine::engine::{Backend, UploadManager};
pub use crate::engine::job::{JobId, JobStatus, Progress, UploadJob};
pub use crate::error::{EngineError, StoreError, UploadError};
pub use crate::mobile::{normalize, NormalizedMobile};
pub use crate::transaction::{extract_transactions, RawTransactionInput, SheetRow};

use calamine::{open_workbook_auto, Reader};
use csv::ReaderBuilder;
use std::path::Path;

/// Reads the first sheet of a `.csv`, `.xlsx`, `.xls` or `.ods` file into
/// header-keyed rows. Cells are trimmed text; empty cells are left out.
pub fn load_sheet(path: &Path) -> Result<Vec<SheetRow>, UploadError> {
    let suffix = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let grid = match suffix.as_str() {
        "csv" => read_csv_grid(path)?,
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook_grid(path)?,
        _ => return Err(UploadError::UnsupportedFormat(suffix)),
    };

    Ok(rows_from_grid(grid))
}

fn read_csv_grid(path: &Path) -> Result<Vec<Vec<String>>, UploadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut grid = Vec::new();
    for record in reader.records() {
        grid.push(record?.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

fn read_workbook_grid(path: &Path) -> Result<Vec<Vec<String>>, UploadError> {
    let mut workbook = open_workbook_auto(path)?;
    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| UploadError::EmptyWorkbook(path.display().to_string()))?;

    let range = workbook.worksheet_range(&first_sheet)?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
        .collect())
}

// First row is the header; rows with no content at all are skipped.
fn rows_from_grid(grid: Vec<Vec<String>>) -> Vec<SheetRow> {
    let mut lines = grid.into_iter();
    let Some(headers) = lines.next() else {
        return Vec::new();
    };

    lines
        .filter(|cells| cells.iter().any(|cell| !cell.is_empty()))
        .map(|cells| {
            headers
                .iter()
                .zip(cells)
                .filter(|(header, cell)| !header.is_empty() && !cell.is_empty())
                .map(|(header, cell)| (header.clone(), cell))
                .collect()
        })
        .collect()
}
