use may::net::TcpStream;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::router::RouteMatch;

use super::connection::{outbox, ConnectionState, PushConnection, PushFrame, RequestSnapshot};
use super::manager::ConnectionManager;
use crate::server::RequestHead;

/// Registration data for a push (SSE) route.
#[derive(Clone, Default)]
pub struct PushRoute {
    on_open: Option<Arc<dyn Fn(&Arc<PushConnection>) + Send + Sync>>,
}

impl PushRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook invoked once the connection is registered and open; typical
    /// producers capture the `Arc` and feed events from elsewhere.
    pub fn on_open(mut self, hook: impl Fn(&Arc<PushConnection>) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }
}

/// Serialize one SSE event block: `event:` line, `data:` line, blank-line
/// terminator.
pub fn format_event(name: &str, data: &str) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}

/// Heartbeat comment line keeping intermediaries from timing out the
/// stream.
pub fn heartbeat() -> &'static str {
    ": ping\n\n"
}

/// Serve a push connection. The calling coroutine becomes the single
/// writer; a ticker coroutine enqueues heartbeats. Returns when the peer
/// disconnects or the connection is closed server-side.
pub(crate) fn serve(
    stream: TcpStream,
    head: &RequestHead,
    route_match: &RouteMatch,
    route: Arc<PushRoute>,
    manager: Arc<ConnectionManager>,
    config: StreamConfig,
) -> Result<(), StreamError> {
    let mut stream = stream;
    stream.set_write_timeout(Some(config.write_deadline))?;
    stream.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: text/event-stream\r\n\
          Cache-Control: no-cache\r\n\
          Connection: keep-alive\r\n\r\n",
    )?;

    let peer_addr = stream.peer_addr()?;
    let (tx, rx) = outbox::<PushFrame>(config.write_queue_depth);
    let conn = Arc::new(PushConnection::new(
        route_match.path_params_map(),
        RequestSnapshot {
            method: head.method.clone(),
            path: head.path.clone(),
            headers: head.headers.clone(),
        },
        peer_addr,
        tx,
    ));
    conn.advance(ConnectionState::Open);
    manager.register_push(Arc::clone(&conn));

    info!(
        client_id = %conn.id(),
        path = %head.path,
        peer_addr = %peer_addr,
        "Push connection open"
    );

    // Ticker: heartbeat comments on the configured interval.
    {
        let conn = Arc::clone(&conn);
        may::go!(move || loop {
            may::coroutine::sleep(config.ping_interval);
            if conn.state() != ConnectionState::Open {
                break;
            }
            if conn.enqueue_control(PushFrame::Heartbeat).is_err() {
                break;
            }
        });
    }

    if let Some(hook) = &route.on_open {
        hook(&conn);
    }

    // Writer loop: this coroutine is the sole socket writer.
    while let Some(item) = rx.recv() {
        let result = match &item {
            PushFrame::Event { name, data } => {
                stream.write_all(format_event(name, data).as_bytes())
            }
            PushFrame::Heartbeat => stream.write_all(heartbeat().as_bytes()),
            PushFrame::Close => break,
        };
        if let Err(err) = result {
            debug!(client_id = %conn.id(), error = %err, "Push write failed");
            break;
        }
        if stream.flush().is_err() {
            break;
        }
    }

    conn.advance(ConnectionState::Closed);
    let _ = stream.shutdown(std::net::Shutdown::Both);
    manager.unregister_push(conn.id());
    info!(client_id = %conn.id(), "Push connection closed");
    Ok(())
}
