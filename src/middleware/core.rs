use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::{HandlerRequest, HandlerResponse};

/// Middleware trait for intercepting requests and responses.
///
/// # Example
///
/// ```rust,ignore
/// use switchboard::middleware::Middleware;
///
/// struct RequestCounter(std::sync::atomic::AtomicUsize);
///
/// impl Middleware for RequestCounter {
///     fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         None // continue to the handler
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    /// Called before the request reaches the handler.
    ///
    /// Returning `Some` short-circuits the chain: deeper middleware and the
    /// handler never see the request, and the returned response flows back
    /// out through the `after` hooks that already ran.
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        None
    }

    /// Called after the handler (or a short-circuiting `before`) produced a
    /// response. May modify the response in place.
    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _latency: Duration) {}
}

/// Ordered middleware snapshot attached to a route at registration.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    entries: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(entries: Vec<Arc<dyn Middleware>>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `before` hooks in registration order. Returns the number of
    /// hooks that executed and, when one short-circuited, its response.
    pub fn run_before(&self, req: &HandlerRequest) -> (usize, Option<HandlerResponse>) {
        for (idx, mw) in self.entries.iter().enumerate() {
            if let Some(resp) = mw.before(req) {
                return (idx + 1, Some(resp));
            }
        }
        (self.entries.len(), None)
    }

    /// Run `after` hooks in reverse order for the `ran` middlewares whose
    /// `before` executed, so the outermost middleware sees the response
    /// last.
    pub fn run_after(
        &self,
        ran: usize,
        req: &HandlerRequest,
        res: &mut HandlerResponse,
        latency: Duration,
    ) {
        for mw in self.entries.iter().take(ran).rev() {
            mw.after(req, res, latency);
        }
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.entries.len())
            .finish()
    }
}
