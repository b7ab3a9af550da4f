//! IssueReport - one detected data-quality problem

use serde::{Deserialize, Serialize};

/// How bad an issue is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// An issue affecting a set of rows of the dataset
///
/// Reports are immutable once built. Row indices refer to the dataset version
/// the report was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    #[serde(default)]
    severity: Severity,
    title: String,
    rows: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    columns: Option<Vec<String>>,
    #[serde(default)]
    description: String,
}

impl IssueReport {
    /// Create a dataset-wide issue with medium severity
    pub fn new(title: impl Into<String>, rows: Vec<usize>) -> Self {
        Self {
            severity: Severity::default(),
            title: title.into(),
            rows,
            columns: None,
            description: String::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Affected row indices, in ascending order as produced by the analyzer
    pub fn affected_rows(&self) -> &[usize] {
        &self.rows
    }

    /// Affected columns; `None` means the whole dataset
    pub fn affected_columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_dataset_wide(&self) -> bool {
        self.columns.is_none()
    }
}
