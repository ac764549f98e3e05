use thiserror::Error;

/// Failures reported by the backing store collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Customer lookup failed: {0}")]
    Lookup(String),

    #[error("Customer creation failed: {0}")]
    Create(String),

    #[error("Transaction write failed: {0}")]
    Write(String),
}

/// Failures that reject an upload before any job exists.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Workbook has no worksheets: {0}")]
    EmptyWorkbook(String),

    #[error("Spreadsheet parsing aborted: {0}")]
    ParseTask(String),
}

/// Failures escaping the batch loop of a running job.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Upload processing aborted: {message}")]
    Aborted { message: String },
}
