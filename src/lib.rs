//! # Switchboard
//!
//! A coroutine-based HTTP routing and dispatch engine: radix-tree route
//! matching with redirect recovery, typed parameter binding, middleware
//! chains with sub-router grouping, and long-lived duplex (WebSocket) and
//! push (SSE) streams with a shared connection manager.
//!
//! ## Architecture
//!
//! ```text
//! request → server → router (radix trees, redirects, 405)
//!                  → middleware chain → dispatcher → handler coroutine
//!                  → streaming core → connection manager
//! ```
//!
//! Handlers run as long-lived `may` coroutines fed over channels; route
//! matching is lock-free after registration. Opinionated handlers declare
//! typed request/response shapes and let the binder decode and validate
//! path, query, header and body fields from cached descriptors.

pub mod binder;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod middleware;
pub mod router;
pub mod server;
pub mod streaming;
pub mod typed;

pub use config::{RouterConfig, RuntimeConfig, StreamConfig};
pub use error::{ErrorKind, FieldError, HandlerError, RouteError, StreamError};
pub use ids::{ClientId, RequestId};
pub use router::{RouteKind, RouteMatch, Router};
pub use server::{AppService, HttpServer, ServerHandle};
