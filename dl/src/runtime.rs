//! Runtime - wires the control channel, state, tasks and bus together
//!
//! The binary uses [`Runtime::start`]; an embedding web layer does the same
//! and serves viewers from [`Runtime::connect_viewer`] and
//! [`Runtime::snapshots`].

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisOrchestrator, AnalyzerRegistry};
use crate::app::{AppSnapshot, AppState, DispatchExit, Dispatcher};
use crate::bus::{NotificationBus, ViewerSession};
use crate::config::Config;
use crate::control::{ConnectionInfo, ControlChannel, ControlError, ControlSender, ProcessMessage};
use crate::datasource::DataSourceFactory;
use crate::tasks::TaskManager;

/// Exit code when the supervisor cannot be reached at startup
pub const EXIT_STARTUP_FAILURE: u8 = 3;

/// Exit code when the control channel fails after startup
pub const EXIT_TRANSPORT_ERROR: u8 = 4;

/// Fatal runtime failures
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Startup failed: {0}")]
    Startup(#[source] ControlError),

    #[error("Control channel failed: {0}")]
    Transport(#[source] ControlError),

    #[error("Dispatcher crashed: {0}")]
    Crashed(String),
}

impl RuntimeError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RuntimeError::Startup(_) => EXIT_STARTUP_FAILURE,
            RuntimeError::Transport(_) => EXIT_TRANSPORT_ERROR,
            RuntimeError::Crashed(_) => 1,
        }
    }
}

/// A running coordination runtime
#[derive(Debug)]
pub struct Runtime {
    config: Config,
    bus: Arc<NotificationBus>,
    tasks: Arc<TaskManager>,
    sender: ControlSender,
    snapshots: watch::Receiver<AppSnapshot>,
    shutdown: CancellationToken,
    dispatcher: JoinHandle<Result<DispatchExit, ControlError>>,
}

impl Runtime {
    /// Connect to the supervisor named by the environment and start serving
    pub async fn start(
        config: Config,
        registry: AnalyzerRegistry,
        factory: Arc<dyn DataSourceFactory>,
    ) -> Result<Self, RuntimeError> {
        debug!("Runtime::start: called");
        let info = ConnectionInfo::from_env(&config.control).map_err(RuntimeError::Startup)?;
        let channel = ControlChannel::connect(&info, config.control.connect_attempts, config.control.retry_backoff())
            .await
            .map_err(RuntimeError::Startup)?;
        Ok(Self::with_channel(config, registry, factory, channel))
    }

    /// Start over an already connected stream
    pub async fn start_on<S>(
        config: Config,
        registry: AnalyzerRegistry,
        factory: Arc<dyn DataSourceFactory>,
        stream: S,
        authkey: &str,
    ) -> Result<Self, RuntimeError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let channel = ControlChannel::handshake(stream, authkey)
            .await
            .map_err(RuntimeError::Startup)?;
        Ok(Self::with_channel(config, registry, factory, channel))
    }

    fn with_channel(
        config: Config,
        registry: AnalyzerRegistry,
        factory: Arc<dyn DataSourceFactory>,
        channel: ControlChannel,
    ) -> Self {
        debug!(analyzers = ?registry.names(), "Runtime::with_channel: called");
        let ControlChannel { sender, reader, writer } = channel;
        if let Err(e) = sender.send(ProcessMessage::Startup) {
            warn!(error = %e, "Failed to queue startup message");
        }

        let bus = Arc::new(NotificationBus::from_config(&config.bus));
        let connected = sender.clone();
        bus.on_connect(move |count| {
            let _ = connected.send(ProcessMessage::FrontendConnected(count));
        });
        let disconnected = sender.clone();
        bus.on_disconnect(move |count| {
            let _ = disconnected.send(ProcessMessage::FrontendDisconnected(count));
        });

        let tasks = Arc::new(TaskManager::from_config(&config.tasks));
        let orchestrator = Arc::new(AnalysisOrchestrator::new(Arc::new(registry)));
        let state = AppState::new(factory, orchestrator, tasks.clone(), bus.clone());
        let snapshots = state.subscribe();

        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(state, reader, sender.clone(), shutdown.clone()).with_writer(writer);
        let dispatcher = tokio::spawn(dispatcher.run());
        info!("Runtime started");

        Self {
            config,
            bus,
            tasks,
            sender,
            snapshots,
            shutdown,
            dispatcher,
        }
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Register a viewer session
    pub fn connect_viewer(&self) -> ViewerSession {
        self.bus.connect()
    }

    /// Snapshots published after every state transition
    pub fn snapshots(&self) -> watch::Receiver<AppSnapshot> {
        self.snapshots.clone()
    }

    /// Queue a message for the supervisor
    pub fn sender(&self) -> &ControlSender {
        &self.sender
    }

    /// Token that stops the dispatcher when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for the dispatcher to stop, then drain background tasks
    pub async fn wait(self) -> Result<DispatchExit, RuntimeError> {
        let result = self.dispatcher.await;
        let timeout = self.config.tasks.shutdown_timeout();
        if !self.tasks.shutdown(timeout).await {
            warn!(?timeout, "Background tasks did not finish in time");
        }

        match result {
            Ok(Ok(exit)) => {
                info!(?exit, "Runtime stopped");
                Ok(exit)
            }
            Ok(Err(e)) => Err(RuntimeError::Transport(e)),
            Err(e) => Err(RuntimeError::Crashed(e.to_string())),
        }
    }

    /// Request shutdown and wait for it to complete
    pub async fn shutdown(self) -> Result<DispatchExit, RuntimeError> {
        debug!("Runtime::shutdown: called");
        self.shutdown.cancel();
        self.wait().await
    }
}
