//! # Server Module
//!
//! The HTTP/1.1 server built directly on `may` coroutine sockets.
//!
//! ## Overview
//!
//! This module contains:
//! - [`HttpServer`] — accept loop spawning one coroutine per connection
//! - [`AppService`] — registration surface and per-request orchestration
//! - Request head parsing and response writing
//!
//! ## Architecture
//!
//! ```text
//! TCP connection → HttpConn (head + body) → Router::resolve
//!     → Dispatcher (HTTP)         → response writer
//!     → streaming::serve_duplex   (socket handed off)
//!     → streaming::serve_push     (socket handed off)
//! ```
//!
//! The server owns the raw socket rather than embedding an HTTP server
//! crate so streaming routes can take the connection over after the
//! upgrade handshake. Keep-alive is honored for plain requests; an
//! upgraded socket never returns to the keep-alive loop.

/// HTTP server and handle.
pub mod http_server;
/// Request head parsing and query decoding.
pub mod request;
/// Response serialization.
pub mod response;
/// Application service orchestrating router, dispatcher and streams.
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_query_params, HttpConn, RequestHead};
pub use response::{write_redirect, write_response};
pub use service::AppService;
