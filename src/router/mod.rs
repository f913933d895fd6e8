//! # Router Module
//!
//! Path matching and route resolution for the dispatch engine.
//!
//! ## Overview
//!
//! The router is responsible for:
//! - Maintaining one radix tree per HTTP method
//! - Matching incoming requests and capturing path parameters
//! - Recovery via trailing-slash and case-insensitive fixed-path redirects
//! - Computing 405 responses from sibling method trees
//! - Sub-router grouping with prefix concatenation and middleware
//!   inheritance, and opaque mounts
//!
//! ## Architecture
//!
//! Registration splits a pattern on `/` and inserts one tree node per
//! segment. `:name` creates the node's single parameter child, `*name` a
//! terminal wildcard child. Lookup walks the tree with static-first
//! priority and backtracks out of failed subtrees, so a request segment
//! that matches a static child is never routed to a parameter or wildcard
//! child of the same node.
//!
//! The tree is built during registration behind a write lock and read-only
//! afterwards; lookups take no locks and allocate only captured values.
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchboard::router::Router;
//! use switchboard::config::RouterConfig;
//! use http::Method;
//!
//! let mut router = Router::new(RouterConfig::new());
//! router.get("/users/:id", "get_user")?;
//!
//! match router.resolve(&Method::GET, "/users/42") {
//!     RouteResolution::Matched(m) => {
//!         assert_eq!(m.get_path_param("id"), Some("42"));
//!     }
//!     _ => unreachable!(),
//! }
//! ```

mod core;
mod observer;
mod tree;

pub use core::{
    Annotations, MountRequest, MountedHandler, ParamVec, RouteKind, RouteMatch, RouteMeta,
    RouteResolution, Router, RouterGroup, MAX_INLINE_PARAMS,
};
pub use observer::{RouteEvent, RouteObserver};
