//! datalens - coordination runtime for an interactive data-exploration server
//!
//! The server is launched by a supervisor process and stays connected to it
//! over a private control channel. It holds the active dataset, runs pluggable
//! data-quality analyzers in the background, and tells connected viewers when
//! something changed.
//!
//! # Core Concepts
//!
//! - **Single writer**: only the dispatcher task mutates application state;
//!   everyone else reads published snapshots
//! - **Cooperative cancellation**: a superseded analysis is cancelled and its
//!   result is never applied
//! - **Isolated analyzers**: a failing analyzer contributes nothing, the
//!   others still run
//!
//! # Modules
//!
//! - [`domain`] - Issue reports and column types
//! - [`datasource`] - Dataset access trait, folder and in-memory sources
//! - [`analysis`] - Analyzer registry, orchestrator and the image analyzer
//! - [`tasks`] - Background task manager with cancellation
//! - [`control`] - Supervisor control channel
//! - [`bus`] - Viewer notification bus
//! - [`app`] - Application state and dispatcher
//! - [`runtime`] - Wiring for the binary and embedders
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod analysis;
pub mod app;
pub mod bus;
pub mod cli;
pub mod config;
pub mod control;
pub mod datasource;
pub mod domain;
pub mod runtime;
pub mod tasks;

// Re-export commonly used types
pub use analysis::{Analyzer, AnalyzerError, AnalyzerRegistry, AnalysisOrchestrator, FnAnalyzer};
pub use app::{AppSnapshot, AppState, Lifecycle};
pub use bus::{NotificationBus, ViewerMessage, ViewerSession};
pub use config::Config;
pub use control::{AppConfigUpdate, ControlError, ControlSender, ProcessMessage, SupervisorMessage};
pub use datasource::{DataSource, DataSourceFactory, FolderSourceFactory, MemoryDataSource, MemorySourceFactory};
pub use domain::{ColumnType, ColumnTypeMapping, IssueReport, Severity};
pub use runtime::{EXIT_STARTUP_FAILURE, EXIT_TRANSPORT_ERROR, Runtime, RuntimeError};
pub use tasks::{TaskError, TaskHandle, TaskManager, TaskOutcome, TaskStatus};
