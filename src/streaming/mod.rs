//! # Streaming Module
//!
//! Long-lived connections: duplex message streams (WebSocket) and push
//! event streams (Server-Sent Events).
//!
//! ## Overview
//!
//! A streaming route is a normal route whose terminal performs a protocol
//! upgrade instead of replying once. After upgrade the connection is
//! registered with the [`ConnectionManager`] for its lifetime and served by
//! dedicated coroutines:
//!
//! - **Duplex**: a reader decodes inbound JSON messages and dispatches them
//!   to typed [`MessageHandler`]s; a writer drains the bounded outbox (the
//!   only coroutine that writes to the socket); a ticker emits pings and
//!   enforces the pong deadline.
//! - **Push**: a single writer serializes `event:`/`data:` blocks and
//!   heartbeat comments.
//!
//! ## Ordering & backpressure
//!
//! Within one connection, outputs arrive in enqueue order (single writer
//! draining a FIFO). Outboxes are bounded; a full queue fails the send with
//! `SlowConsumer` and closes the connection (duplex close code 1013) rather
//! than blocking producers.
//!
//! ## Wire protocols
//!
//! Duplex carries JSON text frames: inbound `{type, ...}` selects the
//! handler; outbound replies are the typed response directly, and handler
//! errors travel in-band as `{type:"error", error:{code,message,details}}`.
//! Push emits `event: <name>` / `data: <json>` blocks with a blank-line
//! terminator and `: ping` heartbeat comments.

mod connection;
mod duplex;
mod frame;
mod manager;
mod push;

pub use connection::{ConnectionState, DuplexConnection, PushConnection, RequestSnapshot};
pub use duplex::{DuplexRoute, MessageHandler, TypedMessage};
pub use frame::{
    accept_key, accept_response, close_code, validate_upgrade, write_close, write_frame,
    write_text, write_text_masked, MessageReader, WsMessage, MAX_FRAME_SIZE, MAX_MESSAGE_SIZE,
};
pub use manager::{ConnectionManager, ConnectionObserver, ConnectionVariant};
pub use push::{format_event, heartbeat, PushRoute};

pub(crate) use duplex::serve as serve_duplex;
pub(crate) use push::serve as serve_push;
