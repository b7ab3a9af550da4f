//! AnalysisOrchestrator - runs every registered analyzer

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AnalyzerError, AnalyzerRegistry};
use crate::datasource::DataSource;
use crate::domain::{ColumnTypeMapping, IssueReport};
use crate::tasks::{TaskError, panic_message};

/// Runs all analyzers of a registry against one dataset snapshot
#[derive(Debug, Clone)]
pub struct AnalysisOrchestrator {
    registry: Arc<AnalyzerRegistry>,
}

impl AnalysisOrchestrator {
    pub fn new(registry: Arc<AnalyzerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    /// Run every analyzer in registration order and concatenate the results
    ///
    /// Each analyzer's stream is drained completely before the next analyzer
    /// starts. A failing or panicking analyzer contributes nothing; the
    /// others still run. `cancel` is checked before each analyzer.
    pub fn run_all(
        &self,
        source: &dyn DataSource,
        dtypes: &ColumnTypeMapping,
        cancel: &CancellationToken,
    ) -> Result<Vec<IssueReport>, TaskError> {
        debug!(
            analyzers = self.registry.len(),
            rows = source.len(),
            uid = source.uid(),
            "AnalysisOrchestrator::run_all: called"
        );
        let started = Instant::now();
        let mut issues = Vec::new();

        for (name, analyzer) in self.registry.iter() {
            if cancel.is_cancelled() {
                debug!(%name, "run_all: cancelled before analyzer");
                return Err(TaskError::Cancelled);
            }

            let analyzer_started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                analyzer
                    .analyze(source, dtypes)
                    .collect::<Result<Vec<IssueReport>, AnalyzerError>>()
            }));

            match outcome {
                Ok(Ok(found)) => {
                    let before = found.len();
                    let found: Vec<IssueReport> = found.into_iter().filter(|i| !i.affected_rows().is_empty()).collect();
                    if found.len() != before {
                        debug!(%name, dropped = before - found.len(), "run_all: dropped issues without rows");
                    }
                    debug!(
                        %name,
                        count = found.len(),
                        elapsed_ms = analyzer_started.elapsed().as_millis() as u64,
                        "run_all: analyzer finished"
                    );
                    issues.extend(found);
                }
                Ok(Err(e)) => {
                    warn!(%name, error = %e, "Analyzer failed, ignoring its issues");
                }
                Err(payload) => {
                    warn!(%name, panic = %panic_message(payload.as_ref()), "Analyzer panicked, ignoring its issues");
                }
            }
        }

        if cancel.is_cancelled() {
            debug!("run_all: cancelled after last analyzer");
            return Err(TaskError::Cancelled);
        }

        info!(
            count = issues.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis finished"
        );
        Ok(issues)
    }
}
