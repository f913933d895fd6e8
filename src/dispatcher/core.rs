use http::Method;
use may::coroutine;
use may::sync::mpsc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::binder::BindInput;
use crate::config::RuntimeConfig;
use crate::error::{envelope, HandlerError};
use crate::ids::RequestId;
use crate::router::RouteMatch;

/// Request data passed to a handler coroutine.
///
/// Carries everything extracted from the HTTP request plus the reply
/// channel. Handlers must send exactly one response per request.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// Unique request ID for tracing and correlation.
    pub request_id: RequestId,
    pub method: Method,
    /// The matched route pattern (captures unexpanded), stable per route.
    pub path: String,
    pub handler_name: String,
    /// Path parameters captured by the router.
    pub path_params: HashMap<String, String>,
    /// Query parameters in wire order; repeated keys are preserved.
    pub query_params: Vec<(String, String)>,
    /// Headers with lowercased names.
    pub headers: HashMap<String, String>,
    /// Request body parsed as JSON, when present.
    pub body: Option<Value>,
    /// Channel for sending the response back to the dispatcher.
    pub reply_tx: mpsc::Sender<HandlerResponse>,
}

impl HandlerRequest {
    /// Last occurrence of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header lookup by lowercased name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Binder view over this request.
    #[must_use]
    pub fn bind_input(&self) -> BindInput<'_> {
        BindInput {
            path_params: &self.path_params,
            query_params: &self.query_params,
            headers: &self.headers,
            body: self.body.as_ref(),
        }
    }
}

/// Response sent back from a handler coroutine.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl HandlerResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Envelope response for a classified handler error.
    pub fn from_error(err: &HandlerError) -> Self {
        Self::new(err.status(), err.envelope())
    }
}

/// Default 404 response body.
pub fn default_not_found(method: &Method, path: &str) -> HandlerResponse {
    HandlerResponse::new(
        404,
        envelope(
            "not_found",
            &format!("no route for {method} {path}"),
            None,
        ),
    )
}

/// Default 405 response carrying the `Allow` header.
pub fn default_method_not_allowed(
    method: &Method,
    path: &str,
    allow: &[Method],
) -> HandlerResponse {
    let allow_value = allow
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    HandlerResponse::new(
        405,
        envelope(
            "method_not_allowed",
            &format!("{method} not allowed for {path}"),
            None,
        ),
    )
    .with_header("Allow", allow_value)
}

/// Type alias for a channel sender that feeds a handler coroutine.
pub type HandlerSender = mpsc::Sender<HandlerRequest>;

/// Dispatcher routing matched requests to registered handler coroutines.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: HashMap<String, HandlerSender>,
    /// Convert handler panics to 500 envelopes instead of killing the
    /// coroutine.
    recoverer: bool,
    stack_size: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_runtime(RuntimeConfig::from_env())
    }

    pub fn with_runtime(runtime: RuntimeConfig) -> Self {
        Dispatcher {
            handlers: HashMap::new(),
            recoverer: true,
            stack_size: runtime.stack_size,
        }
    }

    /// Enable or disable panic recovery for subsequently spawned handlers.
    pub fn set_recoverer(&mut self, enabled: bool) {
        self.recoverer = enabled;
    }

    pub(crate) fn recoverer(&self) -> bool {
        self.recoverer
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Install a pre-spawned handler sender under `name`.
    ///
    /// Replacing an existing handler drops the old sender, which closes its
    /// channel and lets the old coroutine exit on its next receive.
    pub fn insert_sender(&mut self, name: &str, sender: HandlerSender) {
        if self.handlers.remove(name).is_some() {
            warn!(
                handler_name = %name,
                "Replaced existing handler; old coroutine will exit"
            );
        }
        info!(
            handler_name = %name,
            total_handlers = self.handlers.len() + 1,
            "Handler registered"
        );
        self.handlers.insert(name.to_string(), sender);
    }

    /// Register a handler function, spawning its coroutine.
    ///
    /// # Safety
    ///
    /// Spawning a `may` coroutine is unsafe by the runtime's contract; the
    /// caller must ensure the runtime is initialized and that the handler
    /// sends a response through the reply channel for every request.
    pub unsafe fn register_handler<F>(&mut self, name: &str, handler_fn: F)
    where
        F: Fn(HandlerRequest) + Send + Clone + 'static,
    {
        let (tx, rx) = mpsc::channel::<HandlerRequest>();
        let stack_size = self.stack_size;
        let recoverer = self.recoverer;
        let spawn_name = name.to_string();

        let spawn_result = coroutine::Builder::new()
            .stack_size(stack_size)
            .spawn(move || {
                debug!(handler_name = %spawn_name, stack_size, "Handler coroutine start");
                for req in rx.iter() {
                    run_one(&handler_fn, req, recoverer);
                }
            });

        if let Err(e) = spawn_result {
            error!(
                handler_name = %name,
                error = %e,
                stack_size,
                "Failed to spawn handler coroutine"
            );
            return;
        }

        self.insert_sender(name, tx);
    }

    /// Dispatch a matched request to its handler.
    ///
    /// Runs the route's middleware chain around the channel exchange.
    /// Returns `None` when no handler is registered under the matched
    /// route's name.
    pub fn dispatch(
        &self,
        route_match: RouteMatch,
        body: Option<Value>,
        headers: HashMap<String, String>,
        query_params: Vec<(String, String)>,
    ) -> Option<HandlerResponse> {
        self.dispatch_with_request_id(route_match, body, headers, query_params, RequestId::new())
    }

    /// Dispatch with a caller-provided request ID for correlation.
    pub fn dispatch_with_request_id(
        &self,
        route_match: RouteMatch,
        body: Option<Value>,
        headers: HashMap<String, String>,
        query_params: Vec<(String, String)>,
        request_id: RequestId,
    ) -> Option<HandlerResponse> {
        let handler_name = route_match.route.handler_name.to_string();
        let tx = match self.handlers.get(&handler_name) {
            Some(tx) => tx,
            None => {
                error!(
                    handler_name = %handler_name,
                    available_handlers = self.handlers.len(),
                    "Handler not found"
                );
                return None;
            }
        };

        let chain = Arc::clone(&route_match.route.chain);
        let (reply_tx, reply_rx) = mpsc::channel();
        let request = HandlerRequest {
            request_id,
            method: route_match.route.method.clone(),
            path: route_match.route.pattern.clone(),
            handler_name,
            path_params: route_match.path_params_map(),
            query_params,
            headers,
            body,
            reply_tx,
        };

        let start = Instant::now();
        let (ran, early) = chain.run_before(&request);

        let mut response = match early {
            Some(resp) => {
                debug!(
                    request_id = %request.request_id,
                    handler_name = %request.handler_name,
                    "Middleware returned early response"
                );
                resp
            }
            None => {
                info!(
                    request_id = %request.request_id,
                    handler_name = %request.handler_name,
                    method = %request.method,
                    path = %request.path,
                    "Request dispatched to handler"
                );
                if let Err(e) = tx.send(request.clone()) {
                    error!(
                        request_id = %request.request_id,
                        handler_name = %request.handler_name,
                        error = %e,
                        "Failed to send request to handler"
                    );
                    return None;
                }
                match reply_rx.recv() {
                    Ok(resp) => resp,
                    Err(_) => {
                        // Channel closed without a reply: the handler
                        // coroutine died mid-request.
                        error!(
                            request_id = %request.request_id,
                            handler_name = %request.handler_name,
                            "Handler channel closed without a response"
                        );
                        HandlerResponse::from_error(&HandlerError::unavailable(format!(
                            "handler {} is not responding",
                            request.handler_name
                        )))
                    }
                }
            }
        };

        let latency = start.elapsed();
        chain.run_after(ran, &request, &mut response, latency);

        debug!(
            request_id = %request.request_id,
            status = response.status,
            latency_ms = latency.as_millis() as u64,
            "Response ready"
        );

        Some(response)
    }
}

/// Execute one request inside the handler coroutine, recovering from
/// panics when enabled.
fn run_one<F>(handler_fn: &F, req: HandlerRequest, recoverer: bool)
where
    F: Fn(HandlerRequest),
{
    let reply_tx = req.reply_tx.clone();
    let handler_name = req.handler_name.clone();
    let request_id = req.request_id;

    if !recoverer {
        handler_fn(req);
        return;
    }

    let start = Instant::now();
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        handler_fn(req);
    })) {
        let panic_message = format!("{panic:?}");
        let backtrace = std::backtrace::Backtrace::capture();
        error!(
            request_id = %request_id,
            handler_name = %handler_name,
            panic_message = %panic_message,
            backtrace = %backtrace,
            "Handler panicked"
        );
        let _ = reply_tx.send(HandlerResponse::new(
            500,
            envelope("internal", "handler panicked", None),
        ));
    } else {
        debug!(
            request_id = %request_id,
            handler_name = %handler_name,
            execution_time_ms = start.elapsed().as_millis() as u64,
            "Handler execution complete"
        );
    }
}
