//! NotificationBus - fans state-change messages out to viewer sessions

use std::sync::{Arc, Mutex, MutexGuard};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::ViewerMessage;
use crate::config::BusConfig;

/// Default per-session queue capacity (messages)
pub const DEFAULT_SESSION_BUFFER: usize = 64;

/// Callback receiving the active-session count after a change
pub type CountObserver = Arc<dyn Fn(usize) + Send + Sync>;

struct Session {
    id: Uuid,
    tx: mpsc::Sender<ViewerMessage>,
}

#[derive(Default)]
struct BusInner {
    sessions: Vec<Session>,
    on_connect: Vec<CountObserver>,
    on_disconnect: Vec<CountObserver>,
}

/// Tracks viewer sessions and broadcasts to all of them
///
/// Each session owns a bounded queue. A session whose queue is closed or full
/// is deregistered during the broadcast that found it so, without delaying the
/// others.
pub struct NotificationBus {
    inner: Mutex<BusInner>,
    session_buffer: usize,
}

impl NotificationBus {
    pub fn new(session_buffer: usize) -> Self {
        debug!(session_buffer, "NotificationBus::new: called");
        Self {
            inner: Mutex::new(BusInner::default()),
            session_buffer: session_buffer.max(1),
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.session_buffer)
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an observer called with the new count after every connect
    pub fn on_connect(&self, observer: impl Fn(usize) + Send + Sync + 'static) {
        self.lock().on_connect.push(Arc::new(observer));
    }

    /// Register an observer called with the new count after every disconnect
    pub fn on_disconnect(&self, observer: impl Fn(usize) + Send + Sync + 'static) {
        self.lock().on_disconnect.push(Arc::new(observer));
    }

    /// Register a new viewer session
    pub fn connect(&self) -> ViewerSession {
        let id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(self.session_buffer);
        let (count, observers) = {
            let mut inner = self.lock();
            inner.sessions.push(Session { id, tx });
            (inner.sessions.len(), inner.on_connect.clone())
        };
        info!(%id, count, "Viewer connected");
        notify(&observers, count);
        ViewerSession { id, rx }
    }

    /// Deregister a session; unknown ids are ignored
    pub fn disconnect(&self, id: Uuid) {
        debug!(%id, "NotificationBus::disconnect: called");
        let removed = {
            let mut inner = self.lock();
            let before = inner.sessions.len();
            inner.sessions.retain(|s| s.id != id);
            (inner.sessions.len() != before).then(|| (inner.sessions.len(), inner.on_disconnect.clone()))
        };
        if let Some((count, observers)) = removed {
            info!(%id, count, "Viewer disconnected");
            notify(&observers, count);
        }
    }

    /// Deliver `message` to every active session
    ///
    /// Messages are enqueued under one lock, so every session sees
    /// broadcasts in call order.
    pub fn broadcast(&self, message: ViewerMessage) {
        debug!(message = message.message_type(), "NotificationBus::broadcast: called");
        let dropped = {
            let mut inner = self.lock();
            let mut dropped = Vec::new();
            inner.sessions.retain(|session| match session.tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(id = %session.id, "Viewer queue full, dropping session");
                    dropped.push(session.id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(id = %session.id, "broadcast: session closed");
                    dropped.push(session.id);
                    false
                }
            });
            let remaining = inner.sessions.len();
            (!dropped.is_empty()).then(|| (dropped, remaining, inner.on_disconnect.clone()))
        };

        if let Some((ids, remaining, observers)) = dropped {
            let total = remaining + ids.len();
            for (i, id) in ids.iter().enumerate() {
                let count = total - i - 1;
                info!(%id, count, "Viewer disconnected");
                notify(&observers, count);
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_BUFFER)
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("sessions", &self.session_count())
            .field("session_buffer", &self.session_buffer)
            .finish()
    }
}

fn notify(observers: &[CountObserver], count: usize) {
    for observer in observers {
        observer(count);
    }
}

/// One viewer's end of the bus
///
/// The embedding web layer drains this and writes each message to its
/// connection. Dropping the session is noticed on the next broadcast.
#[derive(Debug)]
pub struct ViewerSession {
    id: Uuid,
    rx: mpsc::Receiver<ViewerMessage>,
}

impl ViewerSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next message, or None once the session was deregistered
    pub async fn recv(&mut self) -> Option<ViewerMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ViewerMessage> {
        self.rx.try_recv().ok()
    }

    /// Adapt the session into a message stream
    pub fn into_stream(self) -> impl Stream<Item = ViewerMessage> {
        futures::stream::unfold(self.rx, |mut rx| async move { rx.recv().await.map(|m| (m, rx)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<usize>>>, impl Fn(usize) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |count| sink.lock().unwrap().push(count))
    }

    #[test]
    fn test_bus_creation() {
        let bus = NotificationBus::new(8);
        assert_eq!(bus.session_count(), 0);
    }

    #[test]
    fn test_connect_reports_count() {
        let bus = NotificationBus::new(8);
        let (seen, observer) = recorder();
        bus.on_connect(observer);

        let _a = bus.connect();
        let _b = bus.connect();
        assert_eq!(bus.session_count(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session_in_order() {
        let bus = NotificationBus::new(8);
        let mut a = bus.connect();
        let mut b = bus.connect();

        bus.broadcast(ViewerMessage::IssuesUpdated);
        bus.broadcast(ViewerMessage::Refresh);

        for session in [&mut a, &mut b] {
            assert_eq!(session.recv().await, Some(ViewerMessage::IssuesUpdated));
            assert_eq!(session.recv().await, Some(ViewerMessage::Refresh));
        }
    }

    #[tokio::test]
    async fn test_dropped_session_is_deregistered() {
        let bus = NotificationBus::new(8);
        let (seen, observer) = recorder();
        bus.on_disconnect(observer);

        let mut kept = bus.connect();
        let dropped = bus.connect();
        drop(dropped);

        bus.broadcast(ViewerMessage::Refresh);
        assert_eq!(kept.recv().await, Some(ViewerMessage::Refresh));
        assert_eq!(bus.session_count(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_full_session_is_deregistered() {
        let bus = NotificationBus::new(1);
        let (seen, observer) = recorder();
        bus.on_disconnect(observer);

        let mut slow = bus.connect();
        bus.broadcast(ViewerMessage::Refresh);
        bus.broadcast(ViewerMessage::IssuesUpdated);

        assert_eq!(bus.session_count(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(slow.try_recv(), Some(ViewerMessage::Refresh));
    }

    #[test]
    fn test_explicit_disconnect() {
        let bus = NotificationBus::new(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let session = bus.connect();
        bus.disconnect(session.id());
        bus.disconnect(session.id());
        assert_eq!(bus.session_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_may_query_bus() {
        let bus = Arc::new(NotificationBus::new(8));
        let seen = Arc::new(AtomicUsize::new(0));
        let (inner_bus, sink) = (Arc::downgrade(&bus), seen.clone());
        bus.on_connect(move |_| {
            if let Some(bus) = inner_bus.upgrade() {
                sink.store(bus.session_count(), Ordering::SeqCst);
            }
        });

        let _session = bus.connect();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_stream() {
        let bus = NotificationBus::new(8);
        let session = bus.connect();
        let id = session.id();
        bus.broadcast(ViewerMessage::ResetLayout);
        bus.broadcast(ViewerMessage::Refresh);
        bus.disconnect(id);

        let messages: Vec<_> = session.into_stream().collect().await;
        assert_eq!(messages, vec![ViewerMessage::ResetLayout, ViewerMessage::Refresh]);
    }
}
