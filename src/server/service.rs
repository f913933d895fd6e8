use http::Method;
use may::net::TcpStream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::binder::HandlerDescriptor;
use crate::config::RouterConfig;
use crate::dispatcher::{
    default_method_not_allowed, default_not_found, Dispatcher, HandlerRequest, HandlerResponse,
};
use crate::error::{envelope, RouteError};
use crate::ids::RequestId;
use crate::middleware::Middleware;
use crate::router::{
    Annotations, MountRequest, MountedHandler, RouteKind, RouteObserver, RouteResolution, Router,
};
use crate::streaming::{
    ConnectionManager, ConnectionObserver, DuplexRoute, PushRoute,
};
use crate::typed::{handler_descriptor, Handler};

use super::request::{parse_query_params, HttpConn};
use super::response::{write_redirect, write_response};

/// Application service wiring router, dispatcher, streaming routes and the
/// connection manager into one request-handling unit.
#[derive(Clone)]
pub struct AppService {
    pub router: Arc<RwLock<Router>>,
    pub dispatcher: Arc<RwLock<Dispatcher>>,
    pub manager: Arc<ConnectionManager>,
    config: RouterConfig,
    duplex_routes: Arc<RwLock<HashMap<String, Arc<DuplexRoute>>>>,
    push_routes: Arc<RwLock<HashMap<String, Arc<PushRoute>>>>,
}

impl AppService {
    pub fn new(config: RouterConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        dispatcher.set_recoverer(config.recoverer);
        Self {
            router: Arc::new(RwLock::new(Router::new(config.clone()))),
            dispatcher: Arc::new(RwLock::new(dispatcher)),
            manager: Arc::new(ConnectionManager::new()),
            config,
            duplex_routes: Arc::new(RwLock::new(HashMap::new())),
            push_routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Append a middleware to the router stack for subsequent
    /// registrations.
    pub fn use_middleware(&self, mw: Arc<dyn Middleware>) {
        self.router.write().unwrap().use_middleware(mw);
    }

    pub fn add_route_observer(&self, observer: Arc<dyn RouteObserver>) {
        self.router.write().unwrap().add_observer(observer);
    }

    pub fn add_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.manager.add_observer(observer);
    }

    /// Register a raw handler function.
    ///
    /// # Safety
    ///
    /// Spawns a `may` coroutine; the runtime must be initialized.
    pub unsafe fn route<F>(
        &self,
        method: Method,
        path: &str,
        handler_name: &str,
        handler_fn: F,
    ) -> Result<(), RouteError>
    where
        F: Fn(HandlerRequest) + Send + Clone + 'static,
    {
        self.router
            .write()
            .unwrap()
            .register(method, path, handler_name)?;
        self.dispatcher
            .write()
            .unwrap()
            .register_handler(handler_name, handler_fn);
        Ok(())
    }

    /// Register an opinionated typed handler; its descriptor is handed to
    /// route observers.
    ///
    /// # Safety
    ///
    /// Spawns a `may` coroutine; the runtime must be initialized.
    pub unsafe fn route_typed<H: Handler>(
        &self,
        method: Method,
        path: &str,
        handler_name: &str,
        handler: H,
    ) -> Result<(), RouteError> {
        self.route_typed_annotated(method, path, handler_name, handler, Annotations::default())
    }

    /// [`AppService::route_typed`] with documentation annotations.
    ///
    /// # Safety
    ///
    /// Spawns a `may` coroutine; the runtime must be initialized.
    pub unsafe fn route_typed_annotated<H: Handler>(
        &self,
        method: Method,
        path: &str,
        handler_name: &str,
        handler: H,
        annotations: Annotations,
    ) -> Result<(), RouteError> {
        let descriptor: Arc<HandlerDescriptor> = Arc::new(handler_descriptor::<H>());
        self.router.write().unwrap().register_with(
            method,
            path,
            handler_name,
            RouteKind::Http,
            Some(descriptor),
            annotations,
        )?;
        self.dispatcher
            .write()
            .unwrap()
            .register_typed(handler_name, handler);
        Ok(())
    }

    /// Register a duplex (WebSocket) stream route.
    pub fn duplex(&self, path: &str, name: &str, route: DuplexRoute) -> Result<(), RouteError> {
        self.router.write().unwrap().register_with(
            Method::GET,
            path,
            name,
            RouteKind::Duplex,
            None,
            Annotations::default(),
        )?;
        self.duplex_routes
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::new(route));
        Ok(())
    }

    /// Register a push (SSE) stream route.
    pub fn push(&self, path: &str, name: &str, route: PushRoute) -> Result<(), RouteError> {
        self.router.write().unwrap().register_with(
            Method::GET,
            path,
            name,
            RouteKind::Push,
            None,
            Annotations::default(),
        )?;
        self.push_routes
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::new(route));
        Ok(())
    }

    /// Mount an opaque handler under a prefix.
    pub fn mount(&self, prefix: &str, handler: Arc<dyn MountedHandler>) -> Result<(), RouteError> {
        self.router.write().unwrap().mount(prefix, handler)
    }

    /// Gracefully close all streaming connections.
    pub fn shutdown(&self, grace: Duration) {
        self.manager.shutdown(grace);
    }

    /// Serve one client connection until close or upgrade.
    pub(crate) fn handle_connection(&self, stream: TcpStream) {
        let mut conn = HttpConn::new(stream);
        loop {
            let head = match conn.read_head() {
                Ok(Some(head)) => head,
                Ok(None) => return,
                Err(err) => {
                    debug!(error = %err, "Failed to read request head");
                    return;
                }
            };

            let body_bytes = match conn.read_body(head.content_length()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(error = %err, "Failed to read request body");
                    return;
                }
            };
            let body: Option<Value> = if body_bytes.is_empty() {
                None
            } else {
                serde_json::from_slice(&body_bytes).ok()
            };

            let keep_alive = !head.wants_close();
            let resolution = {
                let router = self.router.read().unwrap();
                router.resolve(&head.method, &head.path)
            };

            match resolution {
                RouteResolution::Matched(route_match)
                    if route_match.route.kind == RouteKind::Duplex =>
                {
                    let name = route_match.route.handler_name.to_string();
                    let Some(route) = self.duplex_routes.read().unwrap().get(&name).cloned()
                    else {
                        error!(handler_name = %name, "Duplex route has no registration");
                        return;
                    };
                    let stream = conn.into_inner();
                    if let Err(err) = crate::streaming::serve_duplex(
                        stream,
                        &head,
                        &route_match,
                        route,
                        Arc::clone(&self.manager),
                        self.config.stream,
                    ) {
                        debug!(error = %err, "Duplex session ended with error");
                    }
                    return;
                }
                RouteResolution::Matched(route_match)
                    if route_match.route.kind == RouteKind::Push =>
                {
                    let name = route_match.route.handler_name.to_string();
                    let Some(route) = self.push_routes.read().unwrap().get(&name).cloned() else {
                        error!(handler_name = %name, "Push route has no registration");
                        return;
                    };
                    let stream = conn.into_inner();
                    if let Err(err) = crate::streaming::serve_push(
                        stream,
                        &head,
                        &route_match,
                        route,
                        Arc::clone(&self.manager),
                        self.config.stream,
                    ) {
                        debug!(error = %err, "Push session ended with error");
                    }
                    return;
                }
                RouteResolution::Matched(route_match) => {
                    let query_params = parse_query_params(head.raw_query.as_deref());
                    let request_id = RequestId::from_header_or_new(head.header("x-request-id"));
                    let response = {
                        let dispatcher = self.dispatcher.read().unwrap();
                        dispatcher.dispatch_with_request_id(
                            route_match,
                            body,
                            head.headers.clone(),
                            query_params,
                            request_id,
                        )
                    };
                    let response = response.unwrap_or_else(|| {
                        HandlerResponse::new(
                            500,
                            envelope("internal", "handler not registered", None),
                        )
                    });
                    if self.write(&mut conn, &response, keep_alive).is_err() {
                        return;
                    }
                }
                RouteResolution::Redirect { location } => {
                    // Redirects keep the query string.
                    let location = match &head.raw_query {
                        Some(q) => format!("{location}?{q}"),
                        None => location,
                    };
                    if write_redirect(conn.stream_mut(), &location, keep_alive).is_err() {
                        return;
                    }
                }
                RouteResolution::MethodNotAllowed { allow } => {
                    let response = match &self.config.method_not_allowed {
                        Some(hook) => hook(&head.method, &head.path, &allow),
                        None => default_method_not_allowed(&head.method, &head.path, &allow),
                    };
                    if self.write(&mut conn, &response, keep_alive).is_err() {
                        return;
                    }
                }
                RouteResolution::Mounted {
                    handler,
                    stripped_path,
                } => {
                    let query_params = parse_query_params(head.raw_query.as_deref());
                    let response = handler.handle(MountRequest {
                        method: &head.method,
                        path: &stripped_path,
                        headers: &head.headers,
                        query_params: &query_params,
                        body: body.as_ref(),
                    });
                    if self.write(&mut conn, &response, keep_alive).is_err() {
                        return;
                    }
                }
                RouteResolution::NotFound => {
                    let response = match &self.config.not_found {
                        Some(hook) => hook(&head.method, &head.path),
                        None => default_not_found(&head.method, &head.path),
                    };
                    if self.write(&mut conn, &response, keep_alive).is_err() {
                        return;
                    }
                }
            }

            if !keep_alive {
                return;
            }
        }
    }

    fn write(
        &self,
        conn: &mut HttpConn<TcpStream>,
        response: &HandlerResponse,
        keep_alive: bool,
    ) -> std::io::Result<()> {
        write_response(conn.stream_mut(), response, keep_alive).map_err(|err| {
            warn!(error = %err, "Failed to write response");
            err
        })
    }
}
