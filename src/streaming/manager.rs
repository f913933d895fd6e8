use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::StreamError;
use crate::ids::ClientId;

use super::connection::{ConnectionState, DuplexConnection, PushConnection};
use super::frame::close_code;

/// Connection variant, mirroring the two registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionVariant {
    Duplex,
    Push,
}

/// Observer of connection lifecycle events. Callbacks run synchronously on
/// the connection's coroutine and must not block.
pub trait ConnectionObserver: Send + Sync {
    fn opened(&self, variant: ConnectionVariant, id: ClientId) {
        let _ = (variant, id);
    }
    fn closed(&self, variant: ConnectionVariant, id: ClientId) {
        let _ = (variant, id);
    }
}

/// Registry of live streaming connections, one keyed map per variant.
///
/// A connection appears in exactly one registry between upgrade and close.
/// Reads (iteration, broadcast) snapshot under the read lock; no
/// cross-connection locks are held during a send.
#[derive(Default)]
pub struct ConnectionManager {
    duplex: RwLock<HashMap<ClientId, Arc<DuplexConnection>>>,
    push: RwLock<HashMap<ClientId, Arc<PushConnection>>>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    fn notify_opened(&self, variant: ConnectionVariant, id: ClientId) {
        for observer in self.observers.read().unwrap().iter() {
            observer.opened(variant, id);
        }
    }

    fn notify_closed(&self, variant: ConnectionVariant, id: ClientId) {
        for observer in self.observers.read().unwrap().iter() {
            observer.closed(variant, id);
        }
    }

    pub fn register_duplex(&self, conn: Arc<DuplexConnection>) {
        let id = conn.id();
        self.duplex.write().unwrap().insert(id, conn);
        self.notify_opened(ConnectionVariant::Duplex, id);
    }

    pub fn register_push(&self, conn: Arc<PushConnection>) {
        let id = conn.id();
        self.push.write().unwrap().insert(id, conn);
        self.notify_opened(ConnectionVariant::Push, id);
    }

    pub fn unregister_duplex(&self, id: ClientId) {
        if self.duplex.write().unwrap().remove(&id).is_some() {
            self.notify_closed(ConnectionVariant::Duplex, id);
        }
    }

    pub fn unregister_push(&self, id: ClientId) {
        if self.push.write().unwrap().remove(&id).is_some() {
            self.notify_closed(ConnectionVariant::Push, id);
        }
    }

    pub fn duplex_connection(&self, id: ClientId) -> Option<Arc<DuplexConnection>> {
        self.duplex.read().unwrap().get(&id).cloned()
    }

    pub fn push_connection(&self, id: ClientId) -> Option<Arc<PushConnection>> {
        self.push.read().unwrap().get(&id).cloned()
    }

    /// Snapshot of live duplex connections.
    pub fn duplex_connections(&self) -> Vec<Arc<DuplexConnection>> {
        self.duplex.read().unwrap().values().cloned().collect()
    }

    /// Snapshot of live push connections.
    pub fn push_connections(&self) -> Vec<Arc<PushConnection>> {
        self.push.read().unwrap().values().cloned().collect()
    }

    pub fn count(&self, variant: ConnectionVariant) -> usize {
        match variant {
            ConnectionVariant::Duplex => self.duplex.read().unwrap().len(),
            ConnectionVariant::Push => self.push.read().unwrap().len(),
        }
    }

    /// Broadcast a message to every open duplex connection.
    ///
    /// Best-effort per connection: enqueue failures are logged, slow
    /// consumers are closed by their own send path, and the broadcast
    /// continues. Returns the number of successful enqueues.
    pub fn broadcast_duplex<T: Serialize>(&self, message: &T) -> usize {
        self.broadcast_duplex_filtered(message, |_| true)
    }

    /// Broadcast to duplex connections whose metadata satisfies the
    /// predicate.
    pub fn broadcast_duplex_filtered<T: Serialize>(
        &self,
        message: &T,
        predicate: impl Fn(&HashMap<String, Value>) -> bool,
    ) -> usize {
        let mut delivered = 0;
        for conn in self.duplex_connections() {
            if conn.state() != ConnectionState::Open {
                continue;
            }
            if !conn.with_metadata(&predicate) {
                continue;
            }
            match conn.send(message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        client_id = %conn.id(),
                        error = %err,
                        "Broadcast enqueue failed"
                    );
                }
            }
        }
        delivered
    }

    /// Broadcast an event to every open push connection.
    pub fn broadcast_push<T: Serialize>(&self, event: &str, data: &T) -> usize {
        self.broadcast_push_filtered(event, data, |_| true)
    }

    /// Broadcast to push connections whose metadata satisfies the
    /// predicate.
    pub fn broadcast_push_filtered<T: Serialize>(
        &self,
        event: &str,
        data: &T,
        predicate: impl Fn(&HashMap<String, Value>) -> bool,
    ) -> usize {
        let mut delivered = 0;
        for conn in self.push_connections() {
            if conn.state() != ConnectionState::Open {
                continue;
            }
            if !conn.with_metadata(&predicate) {
                continue;
            }
            match conn.send_event(event, data) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        client_id = %conn.id(),
                        error = %err,
                        "Broadcast enqueue failed"
                    );
                }
            }
        }
        delivered
    }

    /// Graceful shutdown: notify every connection, transition them to
    /// `Closing`, wait up to `grace` for writers to drain, then drop the
    /// remainder from the registries.
    pub fn shutdown(&self, grace: Duration) {
        info!(
            duplex = self.count(ConnectionVariant::Duplex),
            push = self.count(ConnectionVariant::Push),
            grace_ms = grace.as_millis() as u64,
            "Connection manager shutting down"
        );

        for conn in self.duplex_connections() {
            let _ = conn.send(&json!({ "type": "server_shutdown" }));
            conn.close(close_code::GOING_AWAY, "server shutdown");
        }
        for conn in self.push_connections() {
            let _ = conn.send_event("shutdown", &json!({}));
            conn.close();
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.duplex.read().unwrap().is_empty() && self.push.read().unwrap().is_empty() {
                return;
            }
            may::coroutine::sleep(Duration::from_millis(10));
        }

        // Force-close stragglers: drop them from the registries so the
        // process can exit; their writers observe the closed state.
        let leftover_duplex: Vec<ClientId> =
            self.duplex.read().unwrap().keys().copied().collect();
        for id in leftover_duplex {
            warn!(client_id = %id, "Force-closing duplex connection");
            self.unregister_duplex(id);
        }
        let leftover_push: Vec<ClientId> = self.push.read().unwrap().keys().copied().collect();
        for id in leftover_push {
            warn!(client_id = %id, "Force-closing push connection");
            self.unregister_push(id);
        }
    }

    /// Enqueue a message to one duplex connection by client id.
    pub fn send_to(&self, id: ClientId, message: &impl Serialize) -> Result<(), StreamError> {
        let conn = self
            .duplex_connection(id)
            .ok_or(StreamError::Closed)?;
        conn.send(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::connection::{outbox, OutboundFrame, RequestSnapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open_duplex(capacity: usize) -> (
        Arc<DuplexConnection>,
        crate::streaming::connection::OutboxReceiver<OutboundFrame>,
    ) {
        let (tx, rx) = outbox(capacity);
        let conn = Arc::new(DuplexConnection::new(
            HashMap::new(),
            RequestSnapshot {
                method: http::Method::GET,
                path: "/ws".to_string(),
                headers: HashMap::new(),
            },
            "127.0.0.1:1234".parse().unwrap(),
            tx,
        ));
        conn.advance(ConnectionState::Open);
        (conn, rx)
    }

    #[test]
    fn register_iterate_unregister() {
        let manager = ConnectionManager::new();
        let (conn, _rx) = open_duplex(8);
        let id = conn.id();
        manager.register_duplex(conn);
        assert_eq!(manager.count(ConnectionVariant::Duplex), 1);
        assert!(manager.duplex_connection(id).is_some());
        manager.unregister_duplex(id);
        assert_eq!(manager.count(ConnectionVariant::Duplex), 0);
    }

    #[test]
    fn broadcast_skips_slow_consumer_and_continues() {
        let manager = ConnectionManager::new();
        let (fast, fast_rx) = open_duplex(8);
        let (slow, _slow_rx) = open_duplex(1);
        manager.register_duplex(Arc::clone(&fast));
        manager.register_duplex(Arc::clone(&slow));

        // First broadcast fills the slow queue; second overflows it.
        assert_eq!(manager.broadcast_duplex(&json!({"seq": 1})), 2);
        assert_eq!(manager.broadcast_duplex(&json!({"seq": 2})), 1);

        assert_eq!(slow.state(), ConnectionState::Closing);
        assert_eq!(fast.state(), ConnectionState::Open);

        // The fast consumer got both messages in order.
        assert!(matches!(fast_rx.recv(), Some(OutboundFrame::Text(t)) if t.contains("1")));
        assert!(matches!(fast_rx.recv(), Some(OutboundFrame::Text(t)) if t.contains("2")));
    }

    #[test]
    fn filtered_broadcast_consults_metadata() {
        let manager = ConnectionManager::new();
        let (a, _a_rx) = open_duplex(8);
        let (b, _b_rx) = open_duplex(8);
        a.set_metadata("room", json!("lobby"));
        b.set_metadata("room", json!("kitchen"));
        manager.register_duplex(a);
        manager.register_duplex(b);

        let delivered = manager.broadcast_duplex_filtered(&json!({"hello": true}), |meta| {
            meta.get("room") == Some(&json!("lobby"))
        });
        assert_eq!(delivered, 1);
    }

    #[test]
    fn observers_see_lifecycle_events() {
        #[derive(Default)]
        struct Counter {
            opened: AtomicUsize,
            closed: AtomicUsize,
        }
        impl ConnectionObserver for Counter {
            fn opened(&self, _variant: ConnectionVariant, _id: ClientId) {
                self.opened.fetch_add(1, Ordering::Relaxed);
            }
            fn closed(&self, _variant: ConnectionVariant, _id: ClientId) {
                self.closed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let manager = ConnectionManager::new();
        let counter = Arc::new(Counter::default());
        manager.add_observer(Arc::clone(&counter) as Arc<dyn ConnectionObserver>);

        let (conn, _rx) = open_duplex(8);
        let id = conn.id();
        manager.register_duplex(conn);
        manager.unregister_duplex(id);
        assert_eq!(counter.opened.load(Ordering::Relaxed), 1);
        assert_eq!(counter.closed.load(Ordering::Relaxed), 1);
    }
}
