//! Pluggable data-quality analysis
//!
//! An [`Analyzer`] inspects a dataset and lazily yields [`IssueReport`]s. The
//! [`AnalyzerRegistry`] holds the analyzers in registration order and the
//! [`AnalysisOrchestrator`] runs all of them, isolating failures per analyzer.
//!
//! ```rust,ignore
//! let mut registry = AnalyzerRegistry::new();
//! registry.register("image-issues", ImageIssueAnalyzer::new(Arc::new(HeuristicDetector::default())));
//!
//! let orchestrator = AnalysisOrchestrator::new(Arc::new(registry));
//! let issues = orchestrator.run_all(source.as_ref(), &dtypes, &CancellationToken::new())?;
//! ```

mod detector;
mod image;
mod orchestrator;
mod registry;

use thiserror::Error;

use crate::datasource::DataSource;
use crate::domain::{ColumnTypeMapping, IssueReport};

pub use detector::{DetectorConfig, HeuristicDetector, ImageFlags, ImageIssueKind, ImageQualityDetector};
pub use image::ImageIssueAnalyzer;
pub use orchestrator::AnalysisOrchestrator;
pub use registry::{AnalyzerRegistry, FnAnalyzer};

/// Errors an analyzer may raise while producing issues
///
/// The orchestrator contains these: a failing analyzer contributes no issues.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Detector error: {0}")]
    Detector(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Analyzer failed: {0}")]
    Failed(String),
}

/// Lazy sequence of issues produced by one analyzer run
pub type IssueStream<'a> = Box<dyn Iterator<Item = Result<IssueReport, AnalyzerError>> + 'a>;

/// A detector for one class of data-quality issue
///
/// Analyzers get shared references only: the dataset and the type mapping
/// stay untouched.
pub trait Analyzer: Send + Sync {
    fn analyze<'a>(&'a self, source: &'a dyn DataSource, dtypes: &'a ColumnTypeMapping) -> IssueStream<'a>;
}
