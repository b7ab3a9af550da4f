//! Column types and the column-name to type mapping

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Semantic type of a dataset column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Str,
    Datetime,
    Category,
    Array,
    Embedding,
    Sequence1d,
    Window,
    Image,
    Audio,
    Video,
    Mesh,
    Blob,
}

impl ColumnType {
    /// Whether cells of this type are stored as raw file bytes
    pub fn is_file_based(self) -> bool {
        matches!(
            self,
            ColumnType::Image | ColumnType::Audio | ColumnType::Video | ColumnType::Mesh | ColumnType::Blob
        )
    }
}

/// Column name to column type; ordered by column name
pub type ColumnTypeMapping = BTreeMap<String, ColumnType>;

/// Merge guessed types with user-declared types
///
/// User types win, but only for columns the dataset actually has. Unknown
/// user columns are dropped.
pub fn resolve_dtypes(guessed: &ColumnTypeMapping, user: &ColumnTypeMapping) -> ColumnTypeMapping {
    debug!(guessed = guessed.len(), user = user.len(), "resolve_dtypes: called");
    let mut resolved = guessed.clone();
    for (column, dtype) in user {
        match resolved.get_mut(column) {
            Some(slot) => *slot = *dtype,
            None => debug!(%column, "resolve_dtypes: ignoring user type for unknown column"),
        }
    }
    resolved
}

/// Names of all columns of the given type
pub fn columns_of_type(dtypes: &ColumnTypeMapping, wanted: ColumnType) -> Vec<String> {
    dtypes
        .iter()
        .filter(|(_, dtype)| **dtype == wanted)
        .map(|(name, _)| name.clone())
        .collect()
}
