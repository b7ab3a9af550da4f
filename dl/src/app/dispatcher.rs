//! Dispatcher - the single task that drives AppState
//!
//! Each loop iteration handles exactly one event to completion: an inbound
//! control line, the end of the current analysis cycle, the outbound writer
//! stopping, or shutdown.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::control::{ControlError, ControlReader, ControlSender, ProcessMessage, ProtocolError, SupervisorMessage};

/// Why the dispatcher stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// The supervisor closed the channel
    Eof,
    /// Shutdown was requested locally
    Shutdown,
}

pub struct Dispatcher {
    state: AppState,
    reader: ControlReader,
    sender: ControlSender,
    shutdown: CancellationToken,
    writer: Option<JoinHandle<Result<(), ControlError>>>,
    startup_complete: bool,
}

impl Dispatcher {
    pub fn new(state: AppState, reader: ControlReader, sender: ControlSender, shutdown: CancellationToken) -> Self {
        Self {
            state,
            reader,
            sender,
            shutdown,
            writer: None,
            startup_complete: false,
        }
    }

    /// Stop with an error when this writer task ends
    pub fn with_writer(mut self, writer: JoinHandle<Result<(), ControlError>>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Run until the supervisor hangs up, shutdown is requested, or the
    /// transport fails in either direction
    pub async fn run(mut self) -> Result<DispatchExit, ControlError> {
        info!("Dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Dispatcher shutting down");
                    self.state.begin_shutdown();
                    return Ok(DispatchExit::Shutdown);
                }
                (generation, outcome) = self.state.analysis_finished() => {
                    self.state.apply_analysis_outcome(generation, outcome);
                }
                stopped = writer_stopped(&mut self.writer) => {
                    let e = stopped.err().unwrap_or(ControlError::Closed);
                    error!(error = %e, "Control channel writer stopped");
                    self.state.begin_shutdown();
                    return Err(e);
                }
                line = self.reader.next_line() => match line {
                    Ok(Some(Ok(line))) => self.handle_line(&line),
                    Ok(Some(Err(e))) => warn!(error = %e, "Ignoring message from supervisor"),
                    Ok(None) => {
                        info!("Supervisor closed the control channel");
                        self.state.begin_shutdown();
                        return Ok(DispatchExit::Eof);
                    }
                    Err(e) => {
                        error!(error = %e, "Control channel transport error");
                        self.state.begin_shutdown();
                        return Err(e);
                    }
                },
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let message = match SupervisorMessage::parse(line) {
            Ok(message) => message,
            Err(e @ ProtocolError::MissingKind(_)) => {
                error!(error = %e, "Malformed message from supervisor");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Ignoring message from supervisor");
                return;
            }
        };
        debug!(kind = message.kind(), "handle_line: dispatching");

        match message {
            SupervisorMessage::Update(update) => {
                self.state.apply_update(*update);
                if !self.startup_complete {
                    self.startup_complete = true;
                    self.send(ProcessMessage::StartupComplete);
                }
            }
            SupervisorMessage::GetDf => self.send(ProcessMessage::Df(self.state.dataset_summary())),
            SupervisorMessage::RefreshFrontends => self.state.refresh_frontends(),
        }
    }

    fn send(&self, message: ProcessMessage) {
        if let Err(e) = self.sender.send(message) {
            warn!(error = %e, "Failed to queue message for supervisor");
        }
    }
}

/// Resolves when the writer task ends; pending forever without one
async fn writer_stopped(writer: &mut Option<JoinHandle<Result<(), ControlError>>>) -> Result<(), ControlError> {
    let Some(handle) = writer.as_mut() else {
        return std::future::pending().await;
    };
    let result = handle.await;
    *writer = None;
    match result {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Writer task did not complete");
            Err(ControlError::Closed)
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("startup_complete", &self.startup_complete)
            .finish_non_exhaustive()
    }
}
