//! Viewer notification bus
//!
//! The [`NotificationBus`] keeps one bounded queue per connected viewer and
//! pushes [`ViewerMessage`]s into all of them. Connect and disconnect
//! observers receive the active-session count so presence can be reported to
//! the supervisor.
//!
//! ```rust,ignore
//! let bus = Arc::new(NotificationBus::new(64));
//! bus.on_disconnect(move |count| {
//!     let _ = sender.send(ProcessMessage::FrontendDisconnected(count));
//! });
//!
//! let mut session = bus.connect();
//! bus.broadcast(ViewerMessage::Refresh);
//! while let Some(message) = session.recv().await {
//!     socket.send(serde_json::to_string(&message)?).await?;
//! }
//! ```

mod notifier;
mod types;

pub use notifier::{CountObserver, DEFAULT_SESSION_BUFFER, NotificationBus, ViewerSession};
pub use types::ViewerMessage;
