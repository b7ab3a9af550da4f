//! Dataset access
//!
//! The analysis and state layers only see the [`DataSource`] trait. How a
//! dataset is physically read is up to the implementation; two small ones
//! ship here: [`MemoryDataSource`] (tables built in code) and
//! [`FolderDataSource`] (one row per file in a directory).

mod folder;
mod memory;

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{ColumnType, ColumnTypeMapping};

pub use folder::{FolderDataSource, FolderSourceFactory};
pub use memory::{MemoryDataSource, MemorySourceFactory};

/// A cell could not be materialized as the requested type
///
/// Analyzers treat this as "unreadable cell" and skip the row.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Unknown column: {column}")]
    UnknownColumn { column: String },

    #[error("Row {row} out of range for column {column}")]
    RowOutOfRange { column: String, row: usize },

    #[error("Cannot read column {column} row {row} as {dtype:?}: {reason}")]
    Unreadable {
        column: String,
        row: usize,
        dtype: ColumnType,
        reason: String,
    },
}

/// A dataset could not be opened
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("Dataset not found: {0}")]
    NotFound(String),

    #[error("Unsupported dataset reference: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only view of a tabular dataset
pub trait DataSource: Send + Sync + std::fmt::Debug {
    /// Stable identifier used for persisted per-dataset state
    fn uid(&self) -> &str;

    /// The reference the source was opened from
    fn reference(&self) -> &str;

    /// Number of rows
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn column_names(&self) -> Vec<String>;

    /// Best-effort column type detection
    fn guess_dtypes(&self) -> ColumnTypeMapping;

    /// Raw bytes of one cell, converted for the expected type
    fn get_cell_data(&self, column: &str, row: usize, dtype: ColumnType) -> Result<Vec<u8>, ConversionError>;
}

/// Opens data sources from the references the supervisor sends
pub trait DataSourceFactory: Send + Sync {
    fn create(&self, reference: &str) -> Result<Arc<dyn DataSource>, DataSourceError>;
}
