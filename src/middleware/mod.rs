//! # Middleware Module
//!
//! Handler wrapping via before/after hooks and per-route chains.
//!
//! A middleware observes requests on the way in and responses on the way
//! out. Chains are materialized when a route is registered: the router's
//! stack is snapshotted into the route's [`MiddlewareChain`], so adding
//! middleware later never retroactively wraps existing routes, and
//! sub-router stacks stay isolated from their parents and siblings.
//!
//! For a chain registered as `[A, B, C]`, `before` hooks run A, B, C and
//! `after` hooks run C, B, A — A observes the request first and the
//! response last, the same shape as the wrapping `A(B(C(handler)))`.

mod core;
mod metrics;
mod tracing;

pub use core::{Middleware, MiddlewareChain};
pub use metrics::MetricsMiddleware;
pub use tracing::TracingMiddleware;
