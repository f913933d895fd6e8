//! # Dispatcher Module
//!
//! Coroutine-based request handler dispatch.
//!
//! ## Overview
//!
//! The dispatcher manages the registry of handler coroutines and feeds
//! matched requests to them over channels:
//!
//! - Each handler runs in its own long-lived coroutine
//! - Requests travel over an MPSC channel; responses come back on a
//!   per-request reply channel
//! - The matched route's middleware chain runs around the exchange
//! - Handler panics are caught (when the recoverer is enabled) and become
//!   500 envelopes instead of killing the coroutine
//!
//! ## Request Flow
//!
//! 1. The router matches the request and yields route metadata
//! 2. The dispatcher looks up the handler's sender by name
//! 3. Chain `before` hooks run; an early response short-circuits
//! 4. The request is sent to the handler coroutine and the dispatcher
//!    blocks on the reply channel (coroutine-aware, the OS thread is free)
//! 5. Chain `after` hooks run in reverse and the response is returned
//!
//! Stack size for handler coroutines comes from `SWBD_STACK_SIZE`
//! (see [`crate::config::RuntimeConfig`]).

mod core;

pub use core::{
    default_method_not_allowed, default_not_found, Dispatcher, HandlerRequest, HandlerResponse,
    HandlerSender,
};
