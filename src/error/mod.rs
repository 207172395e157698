//! Error handling for the dataset preparation pipeline.

use arrow::error::ArrowError;

/// Errors that can occur while merging and harmonizing IQM tables
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// Error opening or reading a file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Feature and label tables expose different identity components
    #[error("feature/label identity components differ: features have [{features}], labels have [{labels}]")]
    SchemaMismatch {
        /// Identity components found in the feature table
        features: String,
        /// Identity components found in the label table
        labels: String,
    },

    /// Table failed validation at the ingestion boundary
    #[error("Schema error: {0}")]
    Schema(String),

    /// A required column is not present in the table
    #[error("column '{0}' not found in table")]
    MissingColumn(String),

    /// A column is present but carries the wrong data type
    #[error("column '{name}' has type {actual}, expected {expected}")]
    ColumnType {
        /// Column name
        name: String,
        /// Type found in the table
        actual: String,
        /// Type the operation requires
        expected: String,
    },

    /// Rating values remain non-numeric after the text mapping
    #[error("rating column '{column}' holds unmappable value '{value}' at row {row}")]
    ValueConversion {
        /// Rating column name
        column: String,
        /// Offending raw value
        value: String,
        /// Row index of the offending value
        row: usize,
    },

    /// Two label rows address the same scan instance
    #[error("duplicate identity key '{0}' in label table")]
    DuplicateKey(String),

    /// The worker pool for per-site computation could not be built
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

/// Alias for Result with `DatasetError`
pub type Result<T> = std::result::Result<T, DatasetError>;
