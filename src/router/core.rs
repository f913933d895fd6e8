use http::Method;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::binder::HandlerDescriptor;
use crate::config::RouterConfig;
use crate::dispatcher::HandlerResponse;
use crate::error::RouteError;
use crate::middleware::{Middleware, MiddlewareChain};

use super::observer::{RouteEvent, RouteObserver};
use super::tree::Node;

/// Maximum number of captured parameters before heap allocation. Most REST
/// paths carry at most a handful of captures, so the common case stays on
/// the stack.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Captured (name, value) pairs in match order. Names come from the static
/// route tree, so they ride as `Arc<str>` clones; values are per-request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Kind of terminal a route resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Plain request/response handler.
    Http,
    /// Bidirectional message stream (WebSocket upgrade).
    Duplex,
    /// Server-push event stream (SSE).
    Push,
}

/// Optional documentation metadata handed to route observers.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Metadata for one registered route.
#[derive(Clone)]
pub struct RouteMeta {
    pub method: Method,
    /// Registered pattern including captures (e.g. `/users/:id`).
    pub pattern: String,
    /// Name keying the dispatcher's handler registry.
    pub handler_name: Arc<str>,
    pub kind: RouteKind,
    /// Middleware chain snapshot taken at registration time.
    pub chain: Arc<MiddlewareChain>,
    /// Present for opinionated handlers; consumed by observers.
    pub descriptor: Option<Arc<HandlerDescriptor>>,
    pub annotations: Annotations,
}

impl RouteMeta {
    pub fn new(method: Method, pattern: impl Into<String>, handler_name: &str) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            handler_name: Arc::from(handler_name),
            kind: RouteKind::Http,
            chain: Arc::new(MiddlewareChain::empty()),
            descriptor: None,
            annotations: Annotations::default(),
        }
    }
}

impl std::fmt::Debug for RouteMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMeta")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("handler_name", &self.handler_name)
            .field("kind", &self.kind)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// Result of successfully matching a request path to a route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteMeta>,
    /// Path parameters in match order.
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Get a captured parameter by name, last occurrence winning.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Copy captures into a map for handler consumption. Allocates; use
    /// [`RouteMatch::get_path_param`] on the hot path.
    #[must_use]
    pub fn path_params_map(&self) -> HashMap<String, String> {
        self.path_params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// Outcome of resolving a method + path against the routing tables.
pub enum RouteResolution {
    Matched(RouteMatch),
    /// Emit a 301 to the canonical location.
    Redirect { location: String },
    /// Path resolves under other methods; reply 405 with `Allow`.
    MethodNotAllowed { allow: Vec<Method> },
    /// An opaque mounted handler claims the path.
    Mounted {
        handler: Arc<dyn MountedHandler>,
        /// Request path with the mount prefix stripped (always begins `/`).
        stripped_path: String,
    },
    NotFound,
}

impl std::fmt::Debug for RouteResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteResolution::Matched(m) => f.debug_tuple("Matched").field(m).finish(),
            RouteResolution::Redirect { location } => {
                f.debug_struct("Redirect").field("location", location).finish()
            }
            RouteResolution::MethodNotAllowed { allow } => f
                .debug_struct("MethodNotAllowed")
                .field("allow", allow)
                .finish(),
            RouteResolution::Mounted { stripped_path, .. } => f
                .debug_struct("Mounted")
                .field("stripped_path", stripped_path)
                .finish(),
            RouteResolution::NotFound => write!(f, "NotFound"),
        }
    }
}

/// Borrowed request view handed to a mounted handler. Mounted handlers are
/// opaque: they see the stripped path and receive no middleware wrapping.
#[derive(Debug, Clone, Copy)]
pub struct MountRequest<'a> {
    pub method: &'a Method,
    /// Path with the mount prefix removed.
    pub path: &'a str,
    pub headers: &'a HashMap<String, String>,
    pub query_params: &'a [(String, String)],
    pub body: Option<&'a Value>,
}

/// An opaque handler attached under a path prefix.
pub trait MountedHandler: Send + Sync {
    fn handle(&self, req: MountRequest<'_>) -> HandlerResponse;
}

impl<F> MountedHandler for F
where
    F: Fn(MountRequest<'_>) -> HandlerResponse + Send + Sync,
{
    fn handle(&self, req: MountRequest<'_>) -> HandlerResponse {
        self(req)
    }
}

struct Mount {
    prefix: String,
    handler: Arc<dyn MountedHandler>,
}

#[derive(Clone, Default)]
struct StaticEntry {
    canonical: String,
    /// Two registered paths differ only in case; suppressed to avoid a
    /// nondeterministic redirect target.
    ambiguous: bool,
}

/// Request router: one radix tree per HTTP method plus redirect recovery,
/// sub-router grouping and opaque mounts.
///
/// The tree set is built during registration and read-only at dispatch
/// time; [`Router::resolve`] takes `&self` and no locks.
pub struct Router {
    trees: HashMap<Method, Node>,
    /// Per-method case-folded index of fully static paths.
    static_index: HashMap<Method, HashMap<String, StaticEntry>>,
    mounts: Vec<Mount>,
    stack: Vec<Arc<dyn Middleware>>,
    observers: Vec<Arc<dyn RouteObserver>>,
    config: RouterConfig,
}

impl Router {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            trees: HashMap::new(),
            static_index: HashMap::new(),
            mounts: Vec::new(),
            stack: Vec::new(),
            observers: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Append a middleware to the stack. Only routes registered afterwards
    /// observe it; existing chains are untouched.
    pub fn use_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.stack.push(mw);
    }

    /// Register an observer notified on every subsequent route
    /// registration. Observers run synchronously at registration time and
    /// never participate in dispatch.
    pub fn add_observer(&mut self, observer: Arc<dyn RouteObserver>) {
        self.observers.push(observer);
    }

    /// Register a plain HTTP route.
    pub fn register(
        &mut self,
        method: Method,
        path: &str,
        handler_name: &str,
    ) -> Result<(), RouteError> {
        self.register_with(
            method,
            path,
            handler_name,
            RouteKind::Http,
            None,
            Annotations::default(),
        )
    }

    pub fn get(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::GET, path, handler_name)
    }

    pub fn post(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::POST, path, handler_name)
    }

    pub fn put(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::PUT, path, handler_name)
    }

    pub fn delete(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::DELETE, path, handler_name)
    }

    pub fn patch(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::PATCH, path, handler_name)
    }

    pub fn head(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::HEAD, path, handler_name)
    }

    pub fn options(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::OPTIONS, path, handler_name)
    }

    /// Full registration surface: route kind, binder descriptor and
    /// documentation annotations.
    pub fn register_with(
        &mut self,
        method: Method,
        path: &str,
        handler_name: &str,
        kind: RouteKind,
        descriptor: Option<Arc<HandlerDescriptor>>,
        annotations: Annotations,
    ) -> Result<(), RouteError> {
        let stack = self.stack.clone();
        self.register_meta(method, path, handler_name, kind, descriptor, annotations, stack)
    }

    #[allow(clippy::too_many_arguments)]
    fn register_meta(
        &mut self,
        method: Method,
        path: &str,
        handler_name: &str,
        kind: RouteKind,
        descriptor: Option<Arc<HandlerDescriptor>>,
        annotations: Annotations,
        stack: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouteError> {
        let segments = validate_pattern(path)?;

        let meta = Arc::new(RouteMeta {
            method: method.clone(),
            pattern: path.to_string(),
            handler_name: Arc::from(handler_name),
            kind,
            chain: Arc::new(MiddlewareChain::new(stack)),
            descriptor,
            annotations,
        });

        let tree = self.trees.entry(method.clone()).or_insert_with(Node::root);
        tree.insert(&segments, Arc::clone(&meta))
            .map_err(|reason| RouteError::Conflict {
                method: method.clone(),
                path: path.to_string(),
                reason,
            })?;

        if is_static_pattern(path) {
            let index = self.static_index.entry(method.clone()).or_default();
            let entry = index.entry(path.to_ascii_lowercase()).or_default();
            if entry.canonical.is_empty() {
                entry.canonical = path.to_string();
            } else if entry.canonical != path {
                entry.ambiguous = true;
            }
        }

        debug!(
            method = %meta.method,
            pattern = %meta.pattern,
            handler_name = %meta.handler_name,
            kind = ?meta.kind,
            chain_len = meta.chain.len(),
            "Route registered"
        );

        let event = RouteEvent {
            method: &meta.method,
            pattern: &meta.pattern,
            kind: meta.kind,
            descriptor: meta.descriptor.as_deref(),
            annotations: &meta.annotations,
        };
        for observer in &self.observers {
            observer.route_registered(&event);
        }

        Ok(())
    }

    /// Create a sub-router bound to `prefix`. The group inherits a copy of
    /// the current middleware stack; later additions to either side do not
    /// leak across.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        let stack = self.stack.clone();
        RouterGroup {
            router: self,
            prefix: prefix.trim_end_matches('/').to_string(),
            stack,
        }
    }

    /// Attach an opaque handler under `prefix`. Requests whose path equals
    /// the prefix or begins with `prefix + "/"` are forwarded with the
    /// prefix stripped and no middleware wrapping.
    pub fn mount(
        &mut self,
        prefix: &str,
        handler: Arc<dyn MountedHandler>,
    ) -> Result<(), RouteError> {
        if !prefix.starts_with('/') || prefix.len() < 2 {
            return Err(RouteError::InvalidPath {
                path: prefix.to_string(),
                reason: "mount prefix must begin with / and name a segment".to_string(),
            });
        }
        let prefix = prefix.trim_end_matches('/').to_string();
        if self.mounts.iter().any(|m| m.prefix == prefix) {
            return Err(RouteError::Conflict {
                method: Method::GET,
                path: prefix,
                reason: "a handler is already mounted at this prefix".to_string(),
            });
        }
        info!(prefix = %prefix, "Handler mounted");
        self.mounts.push(Mount { prefix, handler });
        Ok(())
    }

    /// Resolve a request. Recovery order on a tree miss: trailing-slash
    /// redirect, case-insensitive fixed-path redirect, mounts, 405
    /// computation, not-found.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> RouteResolution {
        if let Some(tree) = self.trees.get(method) {
            if let Some((route, path_params)) = tree.lookup(path) {
                return RouteResolution::Matched(RouteMatch { route, path_params });
            }
        }

        if self.config.trailing_slash_redirect {
            if let Some(location) = self.trailing_slash_candidate(method, path) {
                debug!(method = %method, path = %path, location = %location, "Trailing-slash redirect");
                return RouteResolution::Redirect { location };
            }
        }

        if self.config.fixed_path_redirect {
            if let Some(location) = self.fixed_path_candidate(method, path) {
                debug!(method = %method, path = %path, location = %location, "Fixed-path redirect");
                return RouteResolution::Redirect { location };
            }
        }

        if let Some((handler, stripped)) = self.mount_for(path) {
            return RouteResolution::Mounted {
                handler,
                stripped_path: stripped,
            };
        }

        let allow = self.allowed_methods(method, path);
        if !allow.is_empty() {
            return RouteResolution::MethodNotAllowed { allow };
        }

        RouteResolution::NotFound
    }

    fn trailing_slash_candidate(&self, method: &Method, path: &str) -> Option<String> {
        let tree = self.trees.get(method)?;
        let toggled = toggle_trailing_slash(path)?;
        tree.has_terminal(&toggled).then_some(toggled)
    }

    fn fixed_path_candidate(&self, method: &Method, path: &str) -> Option<String> {
        let index = self.static_index.get(method)?;
        let probe = |p: &str| -> Option<String> {
            let entry = index.get(&p.to_ascii_lowercase())?;
            (!entry.ambiguous).then(|| entry.canonical.clone())
        };
        if let Some(canonical) = probe(path) {
            return Some(canonical);
        }
        // Combine with trailing-slash recovery when enabled.
        if self.config.trailing_slash_redirect {
            if let Some(toggled) = toggle_trailing_slash(path) {
                return probe(&toggled);
            }
        }
        None
    }

    fn mount_for(&self, path: &str) -> Option<(Arc<dyn MountedHandler>, String)> {
        let best = self
            .mounts
            .iter()
            .filter(|m| {
                path == m.prefix || path.starts_with(&format!("{}/", m.prefix))
            })
            .max_by_key(|m| m.prefix.len())?;
        let stripped = &path[best.prefix.len()..];
        let stripped = if stripped.is_empty() { "/" } else { stripped };
        Some((Arc::clone(&best.handler), stripped.to_string()))
    }

    fn allowed_methods(&self, requested: &Method, path: &str) -> Vec<Method> {
        let mut allow: Vec<Method> = self
            .trees
            .iter()
            .filter(|(m, _)| *m != requested)
            .filter(|(_, tree)| tree.has_terminal(path))
            .map(|(m, _)| m.clone())
            .collect();
        allow.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allow
    }

    /// Every registered route, for diagnostics and observer backfill.
    #[must_use]
    pub fn routes(&self) -> Vec<Arc<RouteMeta>> {
        let mut out = Vec::new();
        for tree in self.trees.values() {
            tree.collect_terminals(&mut out);
        }
        out.sort_by(|a, b| {
            (a.pattern.as_str(), a.method.as_str()).cmp(&(b.pattern.as_str(), b.method.as_str()))
        });
        out
    }

    /// Log the routing table at info level.
    pub fn dump_routes(&self) {
        let routes = self.routes();
        info!(routes_count = routes.len(), "Routing table loaded");
        for route in routes {
            info!(
                method = %route.method,
                pattern = %route.pattern,
                handler_name = %route.handler_name,
                kind = ?route.kind,
                "route"
            );
        }
    }
}

/// Sub-router view bound to a parent [`Router`] with a path prefix and an
/// inherited middleware stack snapshot.
pub struct RouterGroup<'r> {
    router: &'r mut Router,
    prefix: String,
    stack: Vec<Arc<dyn Middleware>>,
}

impl RouterGroup<'_> {
    /// Append a middleware to this group only. The parent router and
    /// sibling groups are unaffected.
    pub fn use_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.stack.push(mw);
    }

    /// Register a route under the group's prefix with the group's stack.
    pub fn register(
        &mut self,
        method: Method,
        path: &str,
        handler_name: &str,
    ) -> Result<(), RouteError> {
        let full = format!("{}{}", self.prefix, path);
        self.router.register_meta(
            method,
            &full,
            handler_name,
            RouteKind::Http,
            None,
            Annotations::default(),
            self.stack.clone(),
        )
    }

    pub fn get(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::GET, path, handler_name)
    }

    pub fn post(&mut self, path: &str, handler_name: &str) -> Result<(), RouteError> {
        self.register(Method::POST, path, handler_name)
    }

    /// Nest a further group; prefixes concatenate and the child receives a
    /// copy of this group's stack as of now.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        RouterGroup {
            prefix: format!("{}{}", self.prefix, prefix.trim_end_matches('/')),
            stack: self.stack.clone(),
            router: &mut *self.router,
        }
    }
}

/// Validate a registration pattern and split it into tree segments.
fn validate_pattern(path: &str) -> Result<Vec<&str>, RouteError> {
    let invalid = |reason: &str| RouteError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("must begin with /"));
    }
    let trimmed = &path[1..];
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid("parameter capture needs a name"));
            }
        }
        if let Some(name) = segment.strip_prefix('*') {
            if name.is_empty() {
                return Err(invalid("wildcard capture needs a name"));
            }
            if idx != segments.len() - 1 {
                return Err(invalid("wildcard must be the final segment"));
            }
        }
    }
    Ok(segments)
}

/// Returns true when the pattern contains no captures and so belongs in
/// the case-insensitive fixed-path index.
fn is_static_pattern(path: &str) -> bool {
    !path.split('/').any(|s| s.starts_with(':') || s.starts_with('*'))
}

/// The canonical counterpart of a path that differs only by its trailing
/// slash; `None` for the root.
fn toggle_trailing_slash(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    if let Some(stripped) = path.strip_suffix('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("{path}/"))
    }
}
