//! AppState - the single-writer application state machine

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{AppSnapshot, Lifecycle, summarize};
use crate::analysis::AnalysisOrchestrator;
use crate::bus::{NotificationBus, ViewerMessage};
use crate::control::{AppConfigUpdate, DatasetSummary};
use crate::datasource::{DataSource, DataSourceFactory};
use crate::domain::{ColumnTypeMapping, IssueReport, Layout, resolve_dtypes};
use crate::tasks::{TaskHandle, TaskManager, TaskOutcome};

/// The analysis cycle currently allowed to publish results
#[derive(Debug)]
struct AnalysisJob {
    generation: u64,
    handle: TaskHandle<Vec<IssueReport>>,
}

/// Application state owned by the dispatcher
pub struct AppState {
    factory: Arc<dyn DataSourceFactory>,
    orchestrator: Arc<AnalysisOrchestrator>,
    tasks: Arc<TaskManager>,
    bus: Arc<NotificationBus>,

    source: Option<Arc<dyn DataSource>>,
    guessed_dtypes: ColumnTypeMapping,
    user_dtypes: ColumnTypeMapping,
    dtypes: ColumnTypeMapping,

    /// `None` while an analysis cycle is computing
    analyzer_issues: Option<Vec<IssueReport>>,
    custom_issues: Vec<IssueReport>,
    layout: Option<Layout>,
    analyze: bool,
    project_root: Option<PathBuf>,
    filebrowsing_allowed: bool,

    lifecycle: Lifecycle,
    dataset_generation: u64,
    analysis_generation: u64,
    analysis: Option<AnalysisJob>,

    snapshot_tx: watch::Sender<AppSnapshot>,
}

impl AppState {
    pub fn new(
        factory: Arc<dyn DataSourceFactory>,
        orchestrator: Arc<AnalysisOrchestrator>,
        tasks: Arc<TaskManager>,
        bus: Arc<NotificationBus>,
    ) -> Self {
        debug!("AppState::new: called");
        let (snapshot_tx, _) = watch::channel(AppSnapshot::default());
        Self {
            factory,
            orchestrator,
            tasks,
            bus,
            source: None,
            guessed_dtypes: ColumnTypeMapping::new(),
            user_dtypes: ColumnTypeMapping::new(),
            dtypes: ColumnTypeMapping::new(),
            analyzer_issues: Some(Vec::new()),
            custom_issues: Vec::new(),
            layout: None,
            analyze: false,
            project_root: None,
            filebrowsing_allowed: false,
            lifecycle: Lifecycle::Uninitialized,
            dataset_generation: 0,
            analysis_generation: 0,
            analysis: None,
            snapshot_tx,
        }
    }

    /// Receiver for the snapshots published after every transition
    pub fn subscribe(&self) -> watch::Receiver<AppSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn dtypes(&self) -> &ColumnTypeMapping {
        &self.dtypes
    }

    /// Analyzer issues followed by custom issues; `None` while computing
    pub fn issues(&self) -> Option<Vec<IssueReport>> {
        self.analyzer_issues
            .as_ref()
            .map(|found| found.iter().chain(&self.custom_issues).cloned().collect())
    }

    pub fn dataset_summary(&self) -> Option<DatasetSummary> {
        self.source.as_deref().map(summarize)
    }

    pub fn is_analyzing(&self) -> bool {
        self.analysis.is_some()
    }

    /// Apply one update command
    ///
    /// Ends with exactly one `refresh` broadcast and sends at most one
    /// `issuesUpdated`.
    pub fn apply_update(&mut self, update: AppConfigUpdate) {
        debug!(
            dataset = ?update.dataset,
            dtypes = update.dtypes.is_some(),
            layout = update.layout.is_some(),
            custom_issues = ?update.custom_issues.as_ref().map(Vec::len),
            analyze = ?update.analyze,
            layout_only = update.is_layout_only(),
            "AppState::apply_update: called"
        );
        self.lifecycle = Lifecycle::Updating;
        let mut issues_changed = false;

        if let Some(root) = update.project_root {
            self.project_root = Some(root);
        }
        if let Some(allowed) = update.filebrowsing_allowed {
            self.filebrowsing_allowed = allowed;
        }

        let dtypes_changed = update.dtypes.is_some();
        if let Some(dtypes) = update.dtypes {
            self.user_dtypes = dtypes;
        }

        let analyze_changed = update.analyze.is_some_and(|analyze| analyze != self.analyze);
        if let Some(analyze) = update.analyze {
            self.analyze = analyze;
        }

        if let Some(custom) = update.custom_issues {
            self.custom_issues = custom;
            issues_changed = true;
        }

        let mut dataset_changed = false;
        if let Some(reference) = update.dataset {
            match self.factory.create(&reference) {
                Ok(source) => {
                    info!(%reference, uid = source.uid(), rows = source.len(), "Dataset opened");
                    self.guessed_dtypes = source.guess_dtypes();
                    self.source = Some(source);
                    self.dataset_generation += 1;
                    dataset_changed = true;
                }
                Err(e) => warn!(%reference, error = %e, "Failed to open dataset, keeping the previous one"),
            }
        }

        if dataset_changed || dtypes_changed {
            self.dtypes = resolve_dtypes(&self.guessed_dtypes, &self.user_dtypes);
            debug!(columns = self.dtypes.len(), "apply_update: column types resolved");
        }

        if dataset_changed || dtypes_changed || analyze_changed {
            self.restart_analysis();
            issues_changed = true;
        }

        if let Some(layout) = update.layout {
            self.layout = Some(layout);
            self.bus.broadcast(ViewerMessage::ResetLayout);
        }
        if issues_changed {
            self.bus.broadcast(ViewerMessage::IssuesUpdated);
        }
        self.bus.broadcast(ViewerMessage::Refresh);

        self.lifecycle = Lifecycle::Ready;
        self.publish();
    }

    /// Cancel the running cycle and start a new one if analysis applies
    fn restart_analysis(&mut self) {
        if let Some(job) = self.analysis.take() {
            debug!(generation = job.generation, "restart_analysis: cancelling superseded analysis");
            job.handle.cancel();
        }

        let source = match (&self.source, self.analyze) {
            (Some(source), true) => source.clone(),
            (None, true) => {
                debug!("restart_analysis: no dataset");
                self.analyzer_issues = Some(Vec::new());
                return;
            }
            (_, false) => {
                debug!("restart_analysis: analysis disabled");
                self.analyzer_issues = Some(Vec::new());
                return;
            }
        };

        self.analysis_generation += 1;
        let generation = self.analysis_generation;
        let dtypes = self.dtypes.clone();
        let orchestrator = self.orchestrator.clone();
        let submitted = self.tasks.submit(format!("analysis-{generation}"), move |token| {
            orchestrator.run_all(source.as_ref(), &dtypes, &token)
        });

        match submitted {
            Ok(handle) => {
                debug!(generation, task = %handle.id(), "restart_analysis: submitted");
                self.analyzer_issues = None;
                self.analysis = Some(AnalysisJob { generation, handle });
            }
            Err(e) => {
                warn!(error = %e, "Could not start analysis");
                self.analyzer_issues = Some(Vec::new());
            }
        }
    }

    /// Wait for the current analysis cycle to end
    ///
    /// Pending forever when no cycle is running. Cancel safe.
    pub async fn analysis_finished(&mut self) -> (u64, TaskOutcome<Vec<IssueReport>>) {
        match self.analysis.as_mut() {
            Some(job) => (job.generation, job.handle.outcome().await),
            None => std::future::pending().await,
        }
    }

    /// Apply the outcome of analysis cycle `generation`
    ///
    /// Outcomes of superseded cycles are dropped.
    pub fn apply_analysis_outcome(&mut self, generation: u64, outcome: TaskOutcome<Vec<IssueReport>>) {
        debug!(generation, status = ?outcome.status(), "AppState::apply_analysis_outcome: called");
        if self.analysis.as_ref().map(|job| job.generation) != Some(generation) {
            debug!(generation, current = self.analysis_generation, "apply_analysis_outcome: stale, dropped");
            return;
        }
        self.analysis = None;

        match outcome {
            TaskOutcome::Completed(issues) => {
                info!(generation, count = issues.len(), "Analysis finished");
                self.analyzer_issues = Some(issues);
            }
            TaskOutcome::Cancelled => {
                debug!(generation, "apply_analysis_outcome: cancelled, nothing to publish");
                return;
            }
            TaskOutcome::Failed(reason) => {
                warn!(generation, %reason, "Analysis failed");
                self.analyzer_issues = Some(Vec::new());
            }
        }
        self.bus.broadcast(ViewerMessage::IssuesUpdated);
        self.publish();
    }

    /// Ask every viewer to refetch
    pub fn refresh_frontends(&self) {
        debug!("AppState::refresh_frontends: called");
        self.bus.broadcast(ViewerMessage::Refresh);
    }

    /// Cancel outstanding analysis and mark the state as shutting down
    pub fn begin_shutdown(&mut self) {
        debug!("AppState::begin_shutdown: called");
        if let Some(job) = self.analysis.take() {
            job.handle.cancel();
        }
        self.lifecycle = Lifecycle::ShuttingDown;
        self.publish();
    }

    pub fn snapshot(&self) -> AppSnapshot {
        AppSnapshot {
            lifecycle: self.lifecycle,
            source: self.source.clone(),
            dtypes: self.dtypes.clone(),
            issues: self.issues(),
            layout: self.layout.clone(),
            analyze: self.analyze,
            project_root: self.project_root.clone(),
            filebrowsing_allowed: self.filebrowsing_allowed,
            dataset_generation: self.dataset_generation,
            updated_at: Utc::now(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("lifecycle", &self.lifecycle)
            .field("source", &self.source.as_ref().map(|s| s.uid().to_string()))
            .field("dataset_generation", &self.dataset_generation)
            .field("analysis_generation", &self.analysis_generation)
            .field("analyze", &self.analyze)
            .finish_non_exhaustive()
    }
}
