//! Application state and the control-message dispatcher
//!
//! [`AppState`] is single-writer: only the [`Dispatcher`] task mutates it.
//! Everyone else reads [`AppSnapshot`]s from a `watch` channel; a snapshot
//! is published only after a transition has been fully applied.

mod dispatcher;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use dispatcher::{DispatchExit, Dispatcher};
pub use state::AppState;

use crate::control::DatasetSummary;
use crate::datasource::DataSource;
use crate::domain::{ColumnTypeMapping, IssueReport, Layout};

/// Where the application is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// No update applied yet
    #[default]
    Uninitialized,
    Ready,
    /// An update is being applied
    Updating,
    ShuttingDown,
}

/// Immutable view of the application state after a completed transition
#[derive(Debug, Clone)]
pub struct AppSnapshot {
    pub lifecycle: Lifecycle,

    /// The active dataset, if any
    pub source: Option<Arc<dyn DataSource>>,

    /// Effective column types
    pub dtypes: ColumnTypeMapping,

    /// Analyzer issues followed by custom issues; `None` while analysis runs
    pub issues: Option<Vec<IssueReport>>,

    /// Pushed layout; `None` means the default layout
    pub layout: Option<Layout>,

    pub analyze: bool,
    pub project_root: Option<PathBuf>,
    pub filebrowsing_allowed: bool,

    /// Bumped on every dataset swap
    pub dataset_generation: u64,

    pub updated_at: DateTime<Utc>,
}

impl AppSnapshot {
    pub fn dataset(&self) -> Option<DatasetSummary> {
        self.source.as_deref().map(summarize)
    }

    /// True while an analysis cycle is in flight
    pub fn issues_pending(&self) -> bool {
        self.issues.is_none()
    }
}

impl Default for AppSnapshot {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            source: None,
            dtypes: ColumnTypeMapping::new(),
            issues: Some(Vec::new()),
            layout: None,
            analyze: false,
            project_root: None,
            filebrowsing_allowed: false,
            dataset_generation: 0,
            updated_at: Utc::now(),
        }
    }
}

pub(crate) fn summarize(source: &dyn DataSource) -> DatasetSummary {
    DatasetSummary {
        uid: source.uid().to_string(),
        reference: source.reference().to_string(),
        rows: source.len(),
        columns: source.column_names(),
    }
}
