use std::io;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde::{Deserialize, Serialize};
use switchboard::binder::{Bindable, Descriptor, FieldKind, FieldSpec};
use switchboard::error::HandlerError;
use switchboard::middleware::TracingMiddleware;
use switchboard::server::{AppService, HttpServer};
use switchboard::streaming::{DuplexConnection, DuplexRoute, MessageHandler, PushRoute, TypedMessage};
use switchboard::typed::{Handler, TypedRequest};
use switchboard::RouterConfig;

#[derive(Deserialize)]
struct GreetRequest {
    name: String,
    shout: Option<bool>,
}

impl Bindable for GreetRequest {
    fn descriptor() -> Descriptor {
        Descriptor::new("GreetRequest")
            .field(FieldSpec::path("name", FieldKind::Str))
            .field(FieldSpec::query("shout", FieldKind::Bool).optional())
    }
}

#[derive(Serialize)]
struct GreetResponse {
    greeting: String,
}

struct GreetHandler;

impl Handler for GreetHandler {
    type Request = GreetRequest;
    type Response = GreetResponse;

    fn handle(&self, req: TypedRequest<GreetRequest>) -> Result<GreetResponse, HandlerError> {
        let mut greeting = format!("hello, {}", req.data.name);
        if req.data.shout.unwrap_or(false) {
            greeting = greeting.to_uppercase();
        }
        Ok(GreetResponse { greeting })
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    text: String,
}

impl Bindable for ChatMessage {
    fn descriptor() -> Descriptor {
        Descriptor::new("ChatMessage").field(FieldSpec::body("text", FieldKind::Str))
    }
}

#[derive(Serialize)]
struct ChatReply {
    r#type: &'static str,
    text: String,
}

struct EchoHandler;

impl MessageHandler for EchoHandler {
    type Message = ChatMessage;
    type Reply = ChatReply;

    fn on_message(
        &self,
        _conn: &Arc<DuplexConnection>,
        msg: TypedMessage<ChatMessage>,
    ) -> Result<Option<ChatReply>, HandlerError> {
        Ok(Some(ChatReply {
            r#type: "echo",
            text: msg.data.text.to_uppercase(),
        }))
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let service = AppService::new(RouterConfig::new());
    service.use_middleware(Arc::new(TracingMiddleware));

    unsafe {
        service
            .route_typed(Method::GET, "/greet/:name", "greet", GreetHandler)
            .expect("route registration");
    }

    service
        .duplex("/ws/chat", "chat", DuplexRoute::new().on("echo", EchoHandler))
        .expect("duplex registration");

    service
        .push(
            "/events/ticker",
            "ticker",
            PushRoute::new().on_open(|conn| {
                let conn = Arc::clone(conn);
                may::go!(move || {
                    for n in 0.. {
                        may::coroutine::sleep(Duration::from_secs(1));
                        if conn.send_event("tick", &serde_json::json!({ "n": n })).is_err() {
                            break;
                        }
                    }
                });
            }),
        )
        .expect("push registration");

    service.router.read().unwrap().dump_routes();

    let server = HttpServer(service).start("0.0.0.0:8080")?;
    println!("listening on {}", server.addr());
    server
        .join()
        .map_err(|e| io::Error::other(format!("server exited with error: {e:?}")))?;
    Ok(())
}
