//! In-memory data source

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::{ConversionError, DataSource, DataSourceError, DataSourceFactory};
use crate::domain::{ColumnType, ColumnTypeMapping};

#[derive(Debug, Clone)]
struct MemoryColumn {
    dtype: ColumnType,
    cells: Vec<Option<Vec<u8>>>,
}

/// A table held in memory
///
/// Cells set to `None` fail conversion, which makes this handy for
/// exercising the unreadable-cell paths of analyzers.
#[derive(Debug, Clone)]
pub struct MemoryDataSource {
    uid: String,
    columns: BTreeMap<String, MemoryColumn>,
}

impl MemoryDataSource {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Add a column with the given guessed type
    pub fn with_column(mut self, name: impl Into<String>, dtype: ColumnType, cells: Vec<Option<Vec<u8>>>) -> Self {
        let name = name.into();
        debug!(%name, ?dtype, rows = cells.len(), "MemoryDataSource::with_column: called");
        self.columns.insert(name, MemoryColumn { dtype, cells });
        self
    }
}

impl DataSource for MemoryDataSource {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn reference(&self) -> &str {
        &self.uid
    }

    fn len(&self) -> usize {
        self.columns.values().map(|c| c.cells.len()).max().unwrap_or(0)
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    fn guess_dtypes(&self) -> ColumnTypeMapping {
        self.columns.iter().map(|(name, col)| (name.clone(), col.dtype)).collect()
    }

    fn get_cell_data(&self, column: &str, row: usize, dtype: ColumnType) -> Result<Vec<u8>, ConversionError> {
        let col = self.columns.get(column).ok_or_else(|| ConversionError::UnknownColumn {
            column: column.to_string(),
        })?;
        let cell = col.cells.get(row).ok_or_else(|| ConversionError::RowOutOfRange {
            column: column.to_string(),
            row,
        })?;
        cell.clone().ok_or_else(|| ConversionError::Unreadable {
            column: column.to_string(),
            row,
            dtype,
            reason: "cell has no value".to_string(),
        })
    }
}

/// Hands out pre-built sources by reference
#[derive(Debug, Default, Clone)]
pub struct MemorySourceFactory {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl MemorySourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, reference: impl Into<String>, source: impl DataSource + 'static) -> Self {
        self.sources.insert(reference.into(), Arc::new(source));
        self
    }
}

impl DataSourceFactory for MemorySourceFactory {
    fn create(&self, reference: &str) -> Result<Arc<dyn DataSource>, DataSourceError> {
        debug!(%reference, "MemorySourceFactory::create: called");
        self.sources
            .get(reference)
            .cloned()
            .ok_or_else(|| DataSourceError::NotFound(reference.to_string()))
    }
}
