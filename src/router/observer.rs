use http::Method;

use crate::binder::HandlerDescriptor;

use super::core::{Annotations, RouteKind};

/// Registration event handed to observers: everything a documentation or
/// schema component needs to describe the route.
#[derive(Debug, Clone, Copy)]
pub struct RouteEvent<'a> {
    pub method: &'a Method,
    pub pattern: &'a str,
    pub kind: RouteKind,
    /// Request/response type identities and declared fields, when the
    /// route was registered through an opinionated handler.
    pub descriptor: Option<&'a HandlerDescriptor>,
    pub annotations: &'a Annotations,
}

/// Observer of route registrations.
///
/// Called synchronously while the route is registered, never during
/// dispatch; implementations must not block.
pub trait RouteObserver: Send + Sync {
    fn route_registered(&self, event: &RouteEvent<'_>);
}
