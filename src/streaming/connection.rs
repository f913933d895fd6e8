use http::Method;
use may::sync::mpsc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::debug;

use crate::error::StreamError;
use crate::ids::ClientId;

use super::frame::close_code;

/// Connection lifecycle states.
///
/// `Upgrading → Open → Closing → Closed`; enqueues are accepted only while
/// `Open`, and `Closed` triggers removal from the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Upgrading = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Upgrading,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Snapshot of the originating request, retained for the connection's
/// lifetime.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// Outbound item on a duplex connection's write queue.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutboundFrame {
    Text(String),
    Ping,
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Outbound item on a push connection's write queue.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PushFrame {
    Event { name: String, data: String },
    Heartbeat,
    Close,
}

/// Bounded FIFO feeding a connection's single writer coroutine.
///
/// The channel itself is unbounded; a shared depth counter enforces the
/// configured capacity for data items. Control items (pings, pongs, close)
/// bypass the capacity check so a congested connection can still be shut
/// down cleanly.
pub(crate) struct Outbox<T> {
    tx: mpsc::Sender<T>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

pub(crate) struct OutboxReceiver<T> {
    rx: mpsc::Receiver<T>,
    depth: Arc<AtomicUsize>,
}

pub(crate) fn outbox<T>(capacity: usize) -> (Outbox<T>, OutboxReceiver<T>) {
    let (tx, rx) = mpsc::channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        Outbox {
            tx,
            depth: Arc::clone(&depth),
            capacity,
        },
        OutboxReceiver { rx, depth },
    )
}

impl<T> Outbox<T> {
    /// Enqueue a data item, failing fast when the queue is full.
    fn enqueue(&self, item: T) -> Result<(), StreamError> {
        let previous = self.depth.fetch_add(1, Ordering::AcqRel);
        if previous >= self.capacity {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(StreamError::SlowConsumer);
        }
        self.tx.send(item).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            StreamError::Closed
        })
    }

    /// Enqueue a control item regardless of queue depth.
    fn enqueue_control(&self, item: T) -> Result<(), StreamError> {
        self.tx.send(item).map_err(|_| StreamError::Closed)
    }
}

impl<T> OutboxReceiver<T> {
    /// Blocking receive; `None` when every sender is gone.
    pub(crate) fn recv(&self) -> Option<T> {
        match self.rx.recv() {
            Ok(item) => {
                // Control items may drive the counter transiently below
                // zero-equivalent; saturate instead of wrapping.
                let _ = self
                    .depth
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
                Some(item)
            }
            Err(_) => None,
        }
    }
}

/// State shared by both connection variants.
struct ConnectionCore {
    id: ClientId,
    path_params: HashMap<String, String>,
    snapshot: RequestSnapshot,
    peer_addr: SocketAddr,
    metadata: RwLock<HashMap<String, Value>>,
    state: AtomicU8,
    started: Instant,
}

impl ConnectionCore {
    fn new(path_params: HashMap<String, String>, snapshot: RequestSnapshot, peer_addr: SocketAddr) -> Self {
        Self {
            id: ClientId::new(),
            path_params,
            snapshot,
            peer_addr,
            metadata: RwLock::new(HashMap::new()),
            state: AtomicU8::new(ConnectionState::Upgrading as u8),
            started: Instant::now(),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Monotonic state advance; never moves backwards.
    fn advance(&self, to: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= to as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Bidirectional message stream (WebSocket) connection.
///
/// Handlers may hold the `Arc` beyond a single message; sends are
/// serialized through the bounded write queue and performed by the
/// connection's single writer coroutine.
pub struct DuplexConnection {
    core: ConnectionCore,
    outbox: Outbox<OutboundFrame>,
    last_pong_ms: AtomicU64,
}

impl DuplexConnection {
    pub(crate) fn new(
        path_params: HashMap<String, String>,
        snapshot: RequestSnapshot,
        peer_addr: SocketAddr,
        outbox: Outbox<OutboundFrame>,
    ) -> Self {
        Self {
            core: ConnectionCore::new(path_params, snapshot, peer_addr),
            outbox,
            last_pong_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ClientId {
        self.core.id
    }

    /// Path parameters captured at upgrade time.
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.core.path_params
    }

    pub fn snapshot(&self) -> &RequestSnapshot {
        &self.core.snapshot
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.core.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub(crate) fn advance(&self, to: ConnectionState) -> bool {
        self.core.advance(to)
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.core.metadata.write().unwrap().insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.core.metadata.read().unwrap().get(key).cloned()
    }

    /// Run a closure over the metadata map; used by broadcast predicates.
    pub fn with_metadata<R>(&self, f: impl FnOnce(&HashMap<String, Value>) -> R) -> R {
        f(&self.core.metadata.read().unwrap())
    }

    /// Serialize and enqueue a message for the peer.
    ///
    /// Fails with [`StreamError::SlowConsumer`] when the write queue is
    /// full, in which case the connection is closed with code 1013, and
    /// with [`StreamError::Closed`] once the connection left `Open`.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), StreamError> {
        let text = serde_json::to_string(message)
            .map_err(|e| StreamError::Protocol(format!("unserializable message: {e}")))?;
        self.send_text(text)
    }

    pub fn send_text(&self, text: String) -> Result<(), StreamError> {
        if self.state() != ConnectionState::Open {
            return Err(StreamError::Closed);
        }
        match self.outbox.enqueue(OutboundFrame::Text(text)) {
            Err(StreamError::SlowConsumer) => {
                debug!(client_id = %self.id(), "Write queue full, closing slow consumer");
                self.close(close_code::OVERLOADED, "slow consumer");
                Err(StreamError::SlowConsumer)
            }
            other => other,
        }
    }

    pub(crate) fn enqueue_control(&self, frame: OutboundFrame) -> Result<(), StreamError> {
        self.outbox.enqueue_control(frame)
    }

    /// Transition to `Closing` and ask the writer to emit a close frame.
    pub fn close(&self, code: u16, reason: &str) {
        if self.core.advance(ConnectionState::Closing) {
            let _ = self.outbox.enqueue_control(OutboundFrame::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    pub(crate) fn record_pong(&self) {
        let elapsed = self.core.started.elapsed().as_millis() as u64;
        self.last_pong_ms.store(elapsed, Ordering::Release);
    }

    /// Milliseconds since the last pong (or since the connection opened).
    pub(crate) fn pong_age_ms(&self) -> u64 {
        let now = self.core.started.elapsed().as_millis() as u64;
        now.saturating_sub(self.last_pong_ms.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for DuplexConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexConnection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

/// Server-push (SSE) connection. Single writer, server-to-client only.
pub struct PushConnection {
    core: ConnectionCore,
    outbox: Outbox<PushFrame>,
}

impl PushConnection {
    pub(crate) fn new(
        path_params: HashMap<String, String>,
        snapshot: RequestSnapshot,
        peer_addr: SocketAddr,
        outbox: Outbox<PushFrame>,
    ) -> Self {
        Self {
            core: ConnectionCore::new(path_params, snapshot, peer_addr),
            outbox,
        }
    }

    pub fn id(&self) -> ClientId {
        self.core.id
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.core.path_params
    }

    pub fn snapshot(&self) -> &RequestSnapshot {
        &self.core.snapshot
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.core.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub(crate) fn advance(&self, to: ConnectionState) -> bool {
        self.core.advance(to)
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.core.metadata.write().unwrap().insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.core.metadata.read().unwrap().get(key).cloned()
    }

    pub fn with_metadata<R>(&self, f: impl FnOnce(&HashMap<String, Value>) -> R) -> R {
        f(&self.core.metadata.read().unwrap())
    }

    /// Serialize and enqueue an event for the peer.
    pub fn send_event<T: Serialize>(&self, event: &str, data: &T) -> Result<(), StreamError> {
        if self.state() != ConnectionState::Open {
            return Err(StreamError::Closed);
        }
        let data = serde_json::to_string(data)
            .map_err(|e| StreamError::Protocol(format!("unserializable event: {e}")))?;
        match self.outbox.enqueue(PushFrame::Event {
            name: event.to_string(),
            data,
        }) {
            Err(StreamError::SlowConsumer) => {
                debug!(client_id = %self.id(), "Write queue full, closing slow consumer");
                self.close();
                Err(StreamError::SlowConsumer)
            }
            other => other,
        }
    }

    pub(crate) fn enqueue_control(&self, frame: PushFrame) -> Result<(), StreamError> {
        self.outbox.enqueue_control(frame)
    }

    /// Transition to `Closing`; the writer drains and disconnects.
    pub fn close(&self) {
        if self.core.advance(ConnectionState::Closing) {
            let _ = self.outbox.enqueue_control(PushFrame::Close);
        }
    }
}

impl std::fmt::Debug for PushConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushConnection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RequestSnapshot {
        RequestSnapshot {
            method: Method::GET,
            path: "/ws".to_string(),
            headers: HashMap::new(),
        }
    }

    fn duplex(capacity: usize) -> (Arc<DuplexConnection>, OutboxReceiver<OutboundFrame>) {
        let (tx, rx) = outbox(capacity);
        let conn = Arc::new(DuplexConnection::new(
            HashMap::new(),
            snapshot(),
            "127.0.0.1:4096".parse().unwrap(),
            tx,
        ));
        conn.advance(ConnectionState::Open);
        (conn, rx)
    }

    #[test]
    fn state_advances_monotonically() {
        let (conn, _rx) = duplex(4);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.advance(ConnectionState::Closing));
        assert!(!conn.advance(ConnectionState::Open));
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn full_queue_fails_with_slow_consumer_and_closes() {
        let (conn, rx) = duplex(2);
        conn.send(&serde_json::json!({"n": 1})).unwrap();
        conn.send(&serde_json::json!({"n": 2})).unwrap();
        let err = conn.send(&serde_json::json!({"n": 3})).unwrap_err();
        assert!(matches!(err, StreamError::SlowConsumer));
        assert_eq!(conn.state(), ConnectionState::Closing);

        // The two accepted messages drain in order, then the close frame.
        assert!(matches!(rx.recv(), Some(OutboundFrame::Text(t)) if t.contains('1')));
        assert!(matches!(rx.recv(), Some(OutboundFrame::Text(t)) if t.contains('2')));
        assert!(matches!(
            rx.recv(),
            Some(OutboundFrame::Close { code: 1013, .. })
        ));
    }

    #[test]
    fn sends_refused_after_close() {
        let (conn, _rx) = duplex(8);
        conn.close(1000, "bye");
        let err = conn.send(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, StreamError::Closed));
    }

    #[test]
    fn draining_frees_queue_capacity() {
        let (conn, rx) = duplex(1);
        conn.send(&serde_json::json!({"n": 1})).unwrap();
        assert!(rx.recv().is_some());
        conn.send(&serde_json::json!({"n": 2})).unwrap();
    }

    #[test]
    fn metadata_is_readable_through_predicate_view() {
        let (conn, _rx) = duplex(4);
        conn.set_metadata("room", serde_json::json!("lobby"));
        assert_eq!(conn.metadata("room"), Some(serde_json::json!("lobby")));
        let in_lobby = conn.with_metadata(|m| m.get("room") == Some(&serde_json::json!("lobby")));
        assert!(in_lobby);
    }
}
