use http::Method;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error};

use crate::binder::{bind, descriptor_for, Bindable, HandlerDescriptor};
use crate::dispatcher::{Dispatcher, HandlerRequest, HandlerResponse, HandlerSender};
use crate::error::{envelope, HandlerError};
use crate::ids::RequestId;

/// Trait implemented by opinionated handlers.
///
/// The request type's descriptor drives decoding; the response type is
/// serialized as the top-level JSON document with no wrapping.
pub trait Handler: Send + 'static {
    type Request: Bindable;
    type Response: Serialize + Send + 'static;

    fn handle(&self, req: TypedRequest<Self::Request>) -> Result<Self::Response, HandlerError>;
}

/// Typed request passed to a [`Handler`], carrying the decoded data plus
/// the request metadata a handler usually wants.
#[derive(Debug, Clone)]
pub struct TypedRequest<T> {
    pub request_id: RequestId,
    pub method: Method,
    /// Matched route pattern.
    pub path: String,
    pub path_params: HashMap<String, String>,
    /// Decoded and validated request data.
    pub data: T,
}

/// Compute the observer-facing descriptor for a handler type.
pub fn handler_descriptor<H: Handler>() -> HandlerDescriptor {
    HandlerDescriptor {
        request: descriptor_for::<H::Request>(),
        response_type: std::any::type_name::<H::Response>(),
    }
}

/// Spawn a typed handler coroutine and return its request sender.
///
/// # Safety
///
/// Spawning a `may` coroutine is unsafe by the runtime's contract; the
/// caller must ensure the runtime is initialized.
///
/// # Errors
///
/// Returns the spawn error when the coroutine cannot be created (e.g.
/// stack exhaustion); no handler is left registered in that case.
pub unsafe fn spawn_typed<H>(
    handler: H,
    stack_size: usize,
    recoverer: bool,
) -> std::io::Result<HandlerSender>
where
    H: Handler,
{
    let (tx, rx) = may::sync::mpsc::channel::<HandlerRequest>();

    let spawn_result = may::coroutine::Builder::new()
        .stack_size(stack_size)
        .spawn(move || {
            for req in rx.iter() {
                let reply_tx = req.reply_tx.clone();
                let handler_name = req.handler_name.clone();
                let request_id = req.request_id;

                if recoverer {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        process(&handler, req);
                    }));
                    if let Err(panic) = result {
                        error!(
                            request_id = %request_id,
                            handler_name = %handler_name,
                            panic_message = %format!("{panic:?}"),
                            "Typed handler panicked"
                        );
                        let _ = reply_tx.send(HandlerResponse::new(
                            500,
                            envelope("internal", "handler panicked", None),
                        ));
                    }
                } else {
                    process(&handler, req);
                }
            }
        });

    spawn_result.map(|_| tx)
}

/// Bind, call and encode one request.
fn process<H: Handler>(handler: &H, req: HandlerRequest) {
    let reply_tx = req.reply_tx.clone();

    let data: H::Request = match bind(&req.bind_input()) {
        Ok(data) => data,
        Err(failure) => {
            debug!(
                request_id = %req.request_id,
                handler_name = %req.handler_name,
                invalid_fields = failure.errors.len(),
                "Request failed validation"
            );
            let err: HandlerError = failure.into();
            let _ = reply_tx.send(HandlerResponse::from_error(&err));
            return;
        }
    };

    let created = req.method == Method::POST;
    let typed = TypedRequest {
        request_id: req.request_id,
        method: req.method,
        path: req.path,
        path_params: req.path_params,
        data,
    };

    match handler.handle(typed) {
        Ok(response) => {
            let status = if created { 201 } else { 200 };
            match serde_json::to_value(response) {
                Ok(body) => {
                    let _ = reply_tx.send(HandlerResponse::new(status, body));
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize typed response");
                    let _ = reply_tx.send(HandlerResponse::new(
                        500,
                        envelope("internal", "failed to serialize response", None),
                    ));
                }
            }
        }
        Err(err) => {
            let _ = reply_tx.send(HandlerResponse::from_error(&err));
        }
    }
}

impl Dispatcher {
    /// Register a typed handler, spawning its coroutine under `name`.
    ///
    /// # Safety
    ///
    /// Spawning a `may` coroutine is unsafe by the runtime's contract; the
    /// caller must ensure the runtime is initialized.
    pub unsafe fn register_typed<H>(&mut self, name: &str, handler: H)
    where
        H: Handler,
    {
        match spawn_typed(handler, self.stack_size(), self.recoverer()) {
            Ok(sender) => self.insert_sender(name, sender),
            Err(e) => {
                error!(
                    handler_name = %name,
                    error = %e,
                    stack_size = self.stack_size(),
                    "Failed to spawn typed handler coroutine"
                );
            }
        }
    }
}
