use std::sync::Arc;

use super::core::{ParamVec, RouteMeta};

/// Node in the per-method radix tree.
///
/// Each node carries the literal segment it matches (empty for the root and
/// for capture nodes), ordered static children, at most one parameter child
/// and at most one wildcard child. Wildcard nodes are terminal and never
/// grow children.
#[derive(Clone, Default)]
pub(crate) struct Node {
    /// Literal path segment (without slashes); empty for root and captures.
    segment: String,
    /// Static children in insertion order.
    children: Vec<Node>,
    /// Single-segment parameter child (`:name`), if any.
    param_child: Option<Box<Node>>,
    /// Trailing wildcard child (`*name`), if any.
    wildcard_child: Option<Box<Node>>,
    /// Captured name for parameter/wildcard nodes.
    capture: Option<Arc<str>>,
    /// Handler reference when this node terminates a registered path.
    terminal: Option<Arc<RouteMeta>>,
}

impl Node {
    pub(crate) fn root() -> Self {
        Node::default()
    }

    fn new_static(segment: &str) -> Self {
        Node {
            segment: segment.to_string(),
            ..Node::default()
        }
    }

    fn new_capture(name: &str) -> Self {
        Node {
            capture: Some(Arc::from(name)),
            ..Node::default()
        }
    }

    /// Insert a route under this node. `segments` must already be validated
    /// by the router (non-empty literals, named captures, wildcard last).
    /// Conflicts are reported as a reason string; the router attaches the
    /// method and path.
    pub(crate) fn insert(
        &mut self,
        segments: &[&str],
        meta: Arc<RouteMeta>,
    ) -> Result<(), String> {
        let Some((segment, remaining)) = segments.split_first() else {
            if self.terminal.is_some() {
                return Err("a handler is already registered for this path".to_string());
            }
            self.terminal = Some(meta);
            return Ok(());
        };

        if let Some(name) = segment.strip_prefix(':') {
            let param = match &mut self.param_child {
                Some(existing) => {
                    if existing.capture.as_deref() != Some(name) {
                        return Err(format!(
                            "parameter name conflict: :{} already registered here",
                            existing.capture.as_deref().unwrap_or("")
                        ));
                    }
                    existing
                }
                slot @ None => slot.insert(Box::new(Node::new_capture(name))),
            };
            return param.insert(remaining, meta);
        }

        if let Some(name) = segment.strip_prefix('*') {
            if !remaining.is_empty() {
                return Err("wildcard must be the final segment".to_string());
            }
            let wild = match &mut self.wildcard_child {
                Some(existing) => {
                    if existing.capture.as_deref() != Some(name) {
                        return Err(format!(
                            "wildcard name conflict: *{} already registered here",
                            existing.capture.as_deref().unwrap_or("")
                        ));
                    }
                    existing
                }
                slot @ None => slot.insert(Box::new(Node::new_capture(name))),
            };
            if wild.terminal.is_some() {
                return Err("a handler is already registered for this path".to_string());
            }
            wild.terminal = Some(meta);
            return Ok(());
        }

        let child = match self.children.iter_mut().position(|c| c.segment == *segment) {
            Some(idx) => &mut self.children[idx],
            None => {
                self.children.push(Node::new_static(segment));
                self.children.last_mut().expect("just pushed")
            }
        };
        child.insert(remaining, meta)
    }

    /// Walk the tree for `path`, capturing parameters. Resolution priority
    /// at each node: exact static child, parameter child, wildcard child.
    /// The search backtracks out of static or parameter subtrees that fail
    /// deeper down.
    pub(crate) fn lookup(&self, path: &str) -> Option<(Arc<RouteMeta>, ParamVec)> {
        let mut params = ParamVec::new();
        let segments = split_path(path);
        let found = self.search(&segments, &mut params)?;
        Some((found, params))
    }

    /// Lookup that discards captures; used by redirect and 405 probing.
    pub(crate) fn has_terminal(&self, path: &str) -> bool {
        let mut params = ParamVec::new();
        self.search(&split_path(path), &mut params).is_some()
    }

    fn search(&self, segments: &[&str], params: &mut ParamVec) -> Option<Arc<RouteMeta>> {
        let Some((segment, remaining)) = segments.split_first() else {
            return self.terminal.clone();
        };

        for child in &self.children {
            if child.segment == *segment {
                if let Some(found) = child.search(remaining, params) {
                    return Some(found);
                }
                break;
            }
        }

        if !segment.is_empty() {
            if let Some(param) = &self.param_child {
                params.push((param.capture_name(), (*segment).to_string()));
                if let Some(found) = param.search(remaining, params) {
                    return Some(found);
                }
                params.pop();
            }
        }

        if let Some(wild) = &self.wildcard_child {
            if let Some(found) = wild.terminal.clone() {
                params.push((wild.capture_name(), segments.join("/")));
                return Some(found);
            }
        }

        None
    }

    fn capture_name(&self) -> Arc<str> {
        self.capture.clone().unwrap_or_else(|| Arc::from(""))
    }

    /// Collect every terminal under this node, for diagnostics and routing
    /// table dumps.
    pub(crate) fn collect_terminals(&self, out: &mut Vec<Arc<RouteMeta>>) {
        if let Some(meta) = &self.terminal {
            out.push(Arc::clone(meta));
        }
        for child in &self.children {
            child.collect_terminals(out);
        }
        if let Some(param) = &self.param_child {
            param.collect_terminals(out);
        }
        if let Some(wild) = &self.wildcard_child {
            wild.collect_terminals(out);
        }
    }
}

/// Split a request path into match segments. The leading empty segment is
/// dropped; interior and trailing empties are preserved so `/a/b/` does not
/// match a route registered as `/a/b`.
fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn meta(method: Method, pattern: &str, handler: &str) -> Arc<RouteMeta> {
        Arc::new(RouteMeta::new(method, pattern, handler))
    }

    fn insert(node: &mut Node, pattern: &str, handler: &str) {
        let m = meta(Method::GET, pattern, handler);
        let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
        let segments: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };
        node.insert(&segments, m).unwrap();
    }

    fn handler_for(node: &Node, path: &str) -> Option<String> {
        node.lookup(path)
            .map(|(m, _)| m.handler_name.to_string())
    }

    #[test]
    fn static_param_and_wildcard_priority() {
        let mut root = Node::root();
        insert(&mut root, "/users/admin", "get_admin");
        insert(&mut root, "/users/:id", "get_user");
        insert(&mut root, "/users/*rest", "catch_all");

        assert_eq!(handler_for(&root, "/users/admin").as_deref(), Some("get_admin"));
        assert_eq!(handler_for(&root, "/users/42").as_deref(), Some("get_user"));

        let (m, params) = root.lookup("/users/42/extra").unwrap();
        assert_eq!(&*m.handler_name, "catch_all");
        assert_eq!(params[0].1, "42/extra");
        assert_eq!(&*params[0].0, "rest");
    }

    #[test]
    fn captures_multiple_parameters_in_order() {
        let mut root = Node::root();
        insert(&mut root, "/users/:id/posts/:post_id", "get_post");

        let (m, params) = root.lookup("/users/42/posts/hello").unwrap();
        assert_eq!(&*m.handler_name, "get_post");
        assert_eq!(&*params[0].0, "id");
        assert_eq!(params[0].1, "42");
        assert_eq!(&*params[1].0, "post_id");
        assert_eq!(params[1].1, "hello");
    }

    #[test]
    fn backtracks_from_static_subtree_to_param() {
        let mut root = Node::root();
        insert(&mut root, "/files/static/logo", "logo");
        insert(&mut root, "/files/:name", "by_name");

        // "static" matches the static child but that subtree has no
        // terminal for a single segment, so the search falls back.
        assert_eq!(handler_for(&root, "/files/static").as_deref(), Some("by_name"));
        assert_eq!(
            handler_for(&root, "/files/static/logo").as_deref(),
            Some("logo")
        );
    }

    #[test]
    fn trailing_slash_does_not_match_slashless_route() {
        let mut root = Node::root();
        insert(&mut root, "/a/b", "ab");
        assert!(root.lookup("/a/b/").is_none());
        assert!(root.lookup("/a/b").is_some());
    }

    #[test]
    fn root_path_is_addressable() {
        let mut root = Node::root();
        insert(&mut root, "/", "index");
        assert_eq!(handler_for(&root, "/").as_deref(), Some("index"));
    }

    #[test]
    fn duplicate_terminal_is_a_conflict() {
        let mut root = Node::root();
        insert(&mut root, "/pets", "list_pets");
        let err = root
            .insert(&["pets"], meta(Method::GET, "/pets", "other"))
            .unwrap_err();
        assert!(err.contains("already registered"));
    }

    #[test]
    fn conflicting_param_names_rejected() {
        let mut root = Node::root();
        insert(&mut root, "/users/:id/posts", "posts");
        let err = root
            .insert(
                &["users", ":user_id", "comments"],
                meta(Method::GET, "/users/:user_id/comments", "comments"),
            )
            .unwrap_err();
        assert!(err.contains("parameter name conflict"));
    }

    #[test]
    fn wildcard_must_be_last() {
        let mut root = Node::root();
        let err = root
            .insert(
                &["files", "*rest", "tail"],
                meta(Method::GET, "/files/*rest/tail", "bad"),
            )
            .unwrap_err();
        assert!(err.contains("final segment"));
    }

    #[test]
    fn param_does_not_capture_empty_segment() {
        let mut root = Node::root();
        insert(&mut root, "/users/:id", "get_user");
        assert!(root.lookup("/users/").is_none());
    }
}
