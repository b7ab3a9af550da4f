//! Domain types shared by the analysis, state and control layers

mod dtype;
mod issue;

pub use dtype::{ColumnType, ColumnTypeMapping, columns_of_type, resolve_dtypes};
pub use issue::{IssueReport, Severity};

/// Opaque frontend layout document
///
/// The layout DSL lives outside this crate; it is carried verbatim.
pub type Layout = serde_json::Value;
