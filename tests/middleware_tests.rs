use http::Method;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard::config::RouterConfig;
use switchboard::dispatcher::{Dispatcher, HandlerRequest, HandlerResponse};
use switchboard::middleware::{MetricsMiddleware, Middleware};
use switchboard::router::{RouteResolution, Router};

/// Records its label on every hook so tests can assert ordering.
struct Recording {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Recording {
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        self.log.lock().unwrap().push(format!("before:{}", self.label));
        None
    }

    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _latency: Duration) {
        self.log.lock().unwrap().push(format!("after:{}", self.label));
    }
}

/// Short-circuits every request with a 403.
struct Gate;

impl Middleware for Gate {
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        Some(HandlerResponse::new(
            403,
            serde_json::json!({ "error": { "code": "forbidden", "message": "gated" } }),
        ))
    }
}

fn echo_ok(req: HandlerRequest) {
    let _ = req
        .reply_tx
        .send(HandlerResponse::ok(serde_json::json!({ "ok": true })));
}

fn resolve(router: &Router, method: Method, path: &str) -> switchboard::router::RouteMatch {
    match router.resolve(&method, path) {
        RouteResolution::Matched(m) => m,
        other => panic!("expected match, got {other:?}"),
    }
}

#[test]
fn chain_wraps_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(RouterConfig::new());
    for label in ["A", "B", "C"] {
        router.use_middleware(Arc::new(Recording {
            label,
            log: Arc::clone(&log),
        }));
    }
    router.get("/wrapped", "wrapped").unwrap();

    let mut dispatcher = Dispatcher::new();
    unsafe {
        dispatcher.register_handler("wrapped", echo_ok);
    }

    let m = resolve(&router, Method::GET, "/wrapped");
    let resp = dispatcher
        .dispatch(m, None, Default::default(), Vec::new())
        .unwrap();
    assert_eq!(resp.status, 200);

    // A first on the way in, last on the way out.
    let recorded = log.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec![
            "before:A", "before:B", "before:C",
            "after:C", "after:B", "after:A",
        ]
    );
}

#[test]
fn early_response_skips_handler_and_deeper_hooks() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(RouterConfig::new());
    router.use_middleware(Arc::new(Recording {
        label: "A",
        log: Arc::clone(&log),
    }));
    router.use_middleware(Arc::new(Gate));
    router.use_middleware(Arc::new(Recording {
        label: "C",
        log: Arc::clone(&log),
    }));
    router.get("/gated", "gated").unwrap();

    let mut dispatcher = Dispatcher::new();
    unsafe {
        dispatcher.register_handler("gated", |req: HandlerRequest| {
            panic!("handler must not run, got {}", req.path);
        });
    }

    let m = resolve(&router, Method::GET, "/gated");
    let resp = dispatcher
        .dispatch(m, None, Default::default(), Vec::new())
        .unwrap();
    assert_eq!(resp.status, 403);

    // C's before never ran; A still observed the response.
    let recorded = log.lock().unwrap().clone();
    assert_eq!(recorded, vec!["before:A", "after:A"]);
}

#[test]
fn use_is_not_retroactive() {
    let mut router = Router::new(RouterConfig::new());
    router.get("/before", "h_before").unwrap();
    router.use_middleware(Arc::new(Gate));
    router.get("/after", "h_after").unwrap();

    let mut dispatcher = Dispatcher::new();
    unsafe {
        dispatcher.register_handler("h_before", echo_ok);
        dispatcher.register_handler("h_after", echo_ok);
    }

    let m = resolve(&router, Method::GET, "/before");
    let resp = dispatcher
        .dispatch(m, None, Default::default(), Vec::new())
        .unwrap();
    assert_eq!(resp.status, 200);

    let m = resolve(&router, Method::GET, "/after");
    let resp = dispatcher
        .dispatch(m, None, Default::default(), Vec::new())
        .unwrap();
    assert_eq!(resp.status, 403);
}

#[test]
fn group_middleware_stays_isolated() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(RouterConfig::new());
    router.use_middleware(Arc::new(Recording {
        label: "parent",
        log: Arc::clone(&log),
    }));

    {
        let mut admin = router.group("/admin");
        admin.use_middleware(Arc::new(Recording {
            label: "admin",
            log: Arc::clone(&log),
        }));
        admin.get("/panel", "panel").unwrap();
    }
    // Sibling group created afterwards sees only the parent stack.
    {
        let mut public = router.group("/public");
        public.get("/page", "page").unwrap();
    }
    router.get("/root", "root").unwrap();

    let mut dispatcher = Dispatcher::new();
    unsafe {
        dispatcher.register_handler("panel", echo_ok);
        dispatcher.register_handler("page", echo_ok);
        dispatcher.register_handler("root", echo_ok);
    }

    let m = resolve(&router, Method::GET, "/admin/panel");
    dispatcher
        .dispatch(m, None, Default::default(), Vec::new())
        .unwrap();
    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["before:parent", "before:admin", "after:admin", "after:parent"]
    );

    log.lock().unwrap().clear();
    let m = resolve(&router, Method::GET, "/public/page");
    dispatcher
        .dispatch(m, None, Default::default(), Vec::new())
        .unwrap();
    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["before:parent", "after:parent"]
    );
}

#[test]
fn metrics_middleware_counts_requests() {
    let metrics = Arc::new(MetricsMiddleware::new());
    let mut router = Router::new(RouterConfig::new());
    router.use_middleware(Arc::clone(&metrics) as Arc<dyn Middleware>);
    router.get("/counted", "counted").unwrap();

    let mut dispatcher = Dispatcher::new();
    unsafe {
        dispatcher.register_handler("counted", echo_ok);
    }

    for _ in 0..3 {
        let m = resolve(&router, Method::GET, "/counted");
        dispatcher
            .dispatch(m, None, Default::default(), Vec::new())
            .unwrap();
    }
    assert_eq!(metrics.request_count(), 3);
    assert!(metrics.average_latency() > Duration::from_nanos(0));
    assert_eq!(metrics.error_count(), 0);
}
