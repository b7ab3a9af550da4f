//! AnalyzerRegistry - ordered, named analyzers

use std::sync::Arc;

use tracing::{debug, warn};

use super::{Analyzer, AnalyzerError, DetectorConfig, HeuristicDetector, ImageIssueAnalyzer, IssueStream};
use crate::datasource::DataSource;
use crate::domain::{ColumnTypeMapping, IssueReport};

/// Name of the built-in image analyzer
pub const IMAGE_ANALYZER: &str = "image-issues";

/// Analyzer built from a plain function
///
/// The function runs eagerly when the analyzer is invoked; its output is then
/// handed out lazily like any other analyzer's.
pub struct FnAnalyzer<F> {
    f: F,
}

impl<F> FnAnalyzer<F>
where
    F: Fn(&dyn DataSource, &ColumnTypeMapping) -> Result<Vec<IssueReport>, AnalyzerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Analyzer for FnAnalyzer<F>
where
    F: Fn(&dyn DataSource, &ColumnTypeMapping) -> Result<Vec<IssueReport>, AnalyzerError> + Send + Sync,
{
    fn analyze<'a>(&'a self, source: &'a dyn DataSource, dtypes: &'a ColumnTypeMapping) -> IssueStream<'a> {
        match (self.f)(source, dtypes) {
            Ok(issues) => Box::new(issues.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

/// Analyzers keyed by name, in registration order
///
/// Registering an existing name replaces that analyzer in place: the last
/// registration wins and keeps the original position.
#[derive(Default)]
pub struct AnalyzerRegistry {
    entries: Vec<(String, Arc<dyn Analyzer>)>,
}

impl AnalyzerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in analyzers
    pub fn with_builtin(detector: DetectorConfig, scratch_dir: Option<std::path::PathBuf>) -> Self {
        debug!(?scratch_dir, "AnalyzerRegistry::with_builtin: called");
        let mut registry = Self::new();
        let image = ImageIssueAnalyzer::new(Arc::new(HeuristicDetector::new(detector)));
        let image = match scratch_dir {
            Some(dir) => image.with_scratch_dir(dir),
            None => image,
        };
        registry.register(IMAGE_ANALYZER, image);
        registry
    }

    /// Add an analyzer
    pub fn register(&mut self, name: impl Into<String>, analyzer: impl Analyzer + 'static) {
        self.register_arc(name, Arc::new(analyzer));
    }

    /// Add a shared analyzer
    pub fn register_arc(&mut self, name: impl Into<String>, analyzer: Arc<dyn Analyzer>) {
        let name = name.into();
        debug!(%name, "AnalyzerRegistry::register: called");
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => {
                warn!(%name, "Analyzer registered twice, replacing the earlier registration");
                entry.1 = analyzer;
            }
            None => self.entries.push((name, analyzer)),
        }
    }

    /// Check if an analyzer exists
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    /// Analyzer names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Analyzer>)> {
        self.entries.iter().map(|(name, analyzer)| (name.as_str(), analyzer))
    }
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerRegistry").field("analyzers", &self.names()).finish()
    }
}
