use may::net::TcpStream;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::binder::{bind, Bindable, BindInput};
use crate::config::StreamConfig;
use crate::error::{HandlerError, StreamError};
use crate::router::RouteMatch;

use super::connection::{
    outbox, ConnectionState, DuplexConnection, OutboundFrame, RequestSnapshot,
};
use super::frame::{self, close_code, MessageReader, WsMessage};
use super::manager::ConnectionManager;
use crate::server::RequestHead;

static NO_PARAMS: Lazy<HashMap<String, String>> = Lazy::new(HashMap::new);

/// A decoded inbound message handed to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct TypedMessage<T> {
    /// The wire `type` discriminator that selected this handler.
    pub msg_type: String,
    pub data: T,
}

/// Typed handler for one inbound message type on a duplex route.
///
/// The message type's binder descriptor is sourced from the payload body
/// only. A returned reply is enqueued on the same connection; an error is
/// reported to the peer as an in-band envelope and never closes the
/// connection by itself.
pub trait MessageHandler: Send + Sync + 'static {
    type Message: Bindable;
    type Reply: Serialize + Send + 'static;

    fn on_message(
        &self,
        conn: &Arc<DuplexConnection>,
        msg: TypedMessage<Self::Message>,
    ) -> Result<Option<Self::Reply>, HandlerError>;
}

trait ErasedMessageHandler: Send + Sync {
    fn call(
        &self,
        conn: &Arc<DuplexConnection>,
        msg_type: &str,
        payload: &Value,
    ) -> Result<Option<Value>, HandlerError>;
}

impl<H: MessageHandler> ErasedMessageHandler for H {
    fn call(
        &self,
        conn: &Arc<DuplexConnection>,
        msg_type: &str,
        payload: &Value,
    ) -> Result<Option<Value>, HandlerError> {
        let input = BindInput {
            path_params: &NO_PARAMS,
            query_params: &[],
            headers: &NO_PARAMS,
            body: Some(payload),
        };
        let data: H::Message = bind(&input).map_err(HandlerError::from)?;
        let reply = self.on_message(
            conn,
            TypedMessage {
                msg_type: msg_type.to_string(),
                data,
            },
        )?;
        reply
            .map(|r| serde_json::to_value(r))
            .transpose()
            .map_err(|e| HandlerError::internal(format!("unserializable reply: {e}")))
    }
}

/// Message-type dispatch table for one duplex route.
#[derive(Clone, Default)]
pub struct DuplexRoute {
    handlers: HashMap<String, Arc<dyn ErasedMessageHandler>>,
    on_open: Option<Arc<dyn Fn(&Arc<DuplexConnection>) + Send + Sync>>,
}

impl DuplexRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for messages with `{"type": msg_type, ...}`.
    pub fn on<H: MessageHandler>(mut self, msg_type: &str, handler: H) -> Self {
        self.handlers.insert(msg_type.to_string(), Arc::new(handler));
        self
    }

    /// Hook invoked once the connection is registered and open.
    pub fn on_open(mut self, hook: impl Fn(&Arc<DuplexConnection>) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    pub fn message_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// In-band error envelope: `{type:"error", error:{code,message,details?}}`.
fn error_notice(err: &HandlerError) -> String {
    let mut notice = json!({ "type": "error" });
    if let Value::Object(map) = err.envelope() {
        if let Some(inner) = map.get("error") {
            notice["error"] = inner.clone();
        }
    }
    notice.to_string()
}

/// Serve an upgraded duplex connection.
///
/// The calling coroutine becomes the reader; a writer coroutine drains the
/// bounded outbox (sole socket writer) and a ticker coroutine emits pings
/// and enforces the pong deadline. Returns once the reader loop ends; the
/// writer owns teardown and manager removal.
pub(crate) fn serve(
    stream: TcpStream,
    head: &RequestHead,
    route_match: &RouteMatch,
    route: Arc<DuplexRoute>,
    manager: Arc<ConnectionManager>,
    config: StreamConfig,
) -> Result<(), StreamError> {
    let mut stream = stream;
    let key = match frame::validate_upgrade(&head.method, &head.headers) {
        Ok(key) => key,
        Err(err) => {
            let body = crate::error::envelope("bad_request", &err.to_string(), None).to_string();
            let _ = write!(
                stream,
                "HTTP/1.1 400 Bad Request\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            return Err(err);
        }
    };

    stream.write_all(frame::accept_response(&key).as_bytes())?;
    stream.set_read_timeout(Some(config.read_deadline))?;
    stream.set_write_timeout(Some(config.write_deadline))?;

    let peer_addr = stream.peer_addr()?;
    let (tx, rx) = outbox::<OutboundFrame>(config.write_queue_depth);
    let conn = Arc::new(DuplexConnection::new(
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
    conn.record_pong();
    manager.register_duplex(Arc::clone(&conn));

    info!(
        client_id = %conn.id(),
        path = %head.path,
        peer_addr = %peer_addr,
        "Duplex connection open"
    );

    let mut read_half = stream.try_clone()?;

    // Writer: the only coroutine that touches the socket after upgrade
    // writes, draining the FIFO one frame at a time.
    {
        let conn = Arc::clone(&conn);
        let manager = Arc::clone(&manager);
        may::go!(move || {
            let mut write_half = stream;
            while let Some(item) = rx.recv() {
                let result = match &item {
                    OutboundFrame::Text(text) => frame::write_text(&mut write_half, text),
                    OutboundFrame::Ping => frame::write_ping(&mut write_half, b""),
                    OutboundFrame::Pong(payload) => frame::write_pong(&mut write_half, payload),
                    OutboundFrame::Close { code, reason } => {
                        let _ = frame::write_close(&mut write_half, *code, reason);
                        break;
                    }
                };
                if let Err(err) = result {
                    debug!(client_id = %conn.id(), error = %err, "Duplex write failed");
                    break;
                }
            }
            conn.advance(ConnectionState::Closed);
            let _ = write_half.shutdown(std::net::Shutdown::Both);
            manager.unregister_duplex(conn.id());
            info!(client_id = %conn.id(), "Duplex connection closed");
        });
    }

    // Ticker: heartbeat pings and pong-deadline enforcement.
    {
        let conn = Arc::clone(&conn);
        let pong_deadline_ms = config.pong_deadline.as_millis() as u64;
        may::go!(move || loop {
            may::coroutine::sleep(config.ping_interval);
            if conn.state() != ConnectionState::Open {
                break;
            }
            if conn.pong_age_ms() > pong_deadline_ms {
                warn!(client_id = %conn.id(), "Pong deadline missed");
                conn.close(close_code::INTERNAL, "pong timeout");
                break;
            }
            if conn.enqueue_control(OutboundFrame::Ping).is_err() {
                break;
            }
        });
    }

    if let Some(hook) = &route.on_open {
        hook(&conn);
    }

    // Reader loop: decode, dispatch, enqueue replies.
    let mut reader = MessageReader::new();
    loop {
        match reader.next(&mut read_half) {
            Ok(WsMessage::Text(text)) => dispatch_message(&route, &conn, &text),
            Ok(WsMessage::Binary(_)) => {
                let err = HandlerError::bad_request("binary frames are not supported");
                let _ = conn.enqueue_control(OutboundFrame::Text(error_notice(&err)));
            }
            Ok(WsMessage::Ping(payload)) => {
                let _ = conn.enqueue_control(OutboundFrame::Pong(payload));
            }
            Ok(WsMessage::Pong(_)) => conn.record_pong(),
            Ok(WsMessage::Close(code, _)) => {
                debug!(client_id = %conn.id(), code = ?code, "Peer initiated close");
                conn.close(close_code::NORMAL, "");
                break;
            }
            Err(StreamError::Io(err)) => {
                debug!(client_id = %conn.id(), error = %err, "Duplex read ended");
                conn.close(close_code::NORMAL, "");
                break;
            }
            Err(err) => {
                // Protocol violations and oversize frames are fatal.
                warn!(client_id = %conn.id(), error = %err, "Duplex protocol error");
                conn.close(close_code::INTERNAL, "protocol error");
                break;
            }
        }
    }

    Ok(())
}

/// Decode one inbound text message and run its typed handler. Handler and
/// decode failures are reported in-band and never end the connection.
fn dispatch_message(route: &DuplexRoute, conn: &Arc<DuplexConnection>, text: &str) {
    let payload: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            let err = HandlerError::bad_request("message payload must be a JSON object");
            let _ = conn.enqueue_control(OutboundFrame::Text(error_notice(&err)));
            return;
        }
    };

    let msg_type = match payload.get("type").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => {
            let err = HandlerError::bad_request("message must carry a string \"type\" field");
            let _ = conn.enqueue_control(OutboundFrame::Text(error_notice(&err)));
            return;
        }
    };

    let handler = match route.handlers.get(&msg_type) {
        Some(h) => h,
        None => {
            let err = HandlerError::bad_request(format!("unknown message type {msg_type:?}"));
            let _ = conn.enqueue_control(OutboundFrame::Text(error_notice(&err)));
            return;
        }
    };

    match handler.call(conn, &msg_type, &payload) {
        Ok(Some(reply)) => {
            // Serialized reply rides the data queue; a full queue closes
            // the connection as a slow consumer.
            let _ = conn.send_text(reply.to_string());
        }
        Ok(None) => {}
        Err(err) => {
            debug!(
                client_id = %conn.id(),
                msg_type = %msg_type,
                error = %err,
                "Message handler error"
            );
            let _ = conn.enqueue_control(OutboundFrame::Text(error_notice(&err)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{Descriptor, FieldKind, FieldSpec};

    #[derive(serde::Deserialize)]
    struct Echo {
        text: String,
    }

    impl Bindable for Echo {
        fn descriptor() -> Descriptor {
            Descriptor::new("Echo").field(FieldSpec::body("text", FieldKind::Str))
        }
    }

    #[derive(Serialize)]
    struct EchoReply {
        r#type: &'static str,
        text: String,
    }

    struct EchoHandler;

    impl MessageHandler for EchoHandler {
        type Message = Echo;
        type Reply = EchoReply;

        fn on_message(
            &self,
            _conn: &Arc<DuplexConnection>,
            msg: TypedMessage<Echo>,
        ) -> Result<Option<EchoReply>, HandlerError> {
            Ok(Some(EchoReply {
                r#type: "echo",
                text: msg.data.text.to_uppercase(),
            }))
        }
    }

    #[test]
    fn erased_handler_binds_from_body_and_replies() {
        let route = DuplexRoute::new().on("echo", EchoHandler);
        let handler = route.handlers.get("echo").unwrap();

        let (tx, _rx) = outbox(8);
        let conn = Arc::new(DuplexConnection::new(
            HashMap::new(),
            RequestSnapshot {
                method: http::Method::GET,
                path: "/ws".to_string(),
                headers: HashMap::new(),
            },
            "127.0.0.1:9999".parse().unwrap(),
            tx,
        ));

        let payload = json!({ "type": "echo", "text": "hi" });
        let reply = handler.call(&conn, "echo", &payload).unwrap().unwrap();
        assert_eq!(reply, json!({ "type": "echo", "text": "HI" }));
    }

    #[test]
    fn bind_failure_surfaces_as_validation_error() {
        let route = DuplexRoute::new().on("echo", EchoHandler);
        let handler = route.handlers.get("echo").unwrap();

        let (tx, _rx) = outbox(8);
        let conn = Arc::new(DuplexConnection::new(
            HashMap::new(),
            RequestSnapshot {
                method: http::Method::GET,
                path: "/ws".to_string(),
                headers: HashMap::new(),
            },
            "127.0.0.1:9999".parse().unwrap(),
            tx,
        ));

        let payload = json!({ "type": "echo" });
        let err = handler.call(&conn, "echo", &payload).unwrap_err();
        assert_eq!(err.status(), 400);
        let notice: Value = serde_json::from_str(&error_notice(&err)).unwrap();
        assert_eq!(notice["type"], "error");
        assert_eq!(notice["error"]["code"], "validation_failed");
    }
}
