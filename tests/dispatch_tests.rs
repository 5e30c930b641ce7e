//! Dispatcher behavior without a network: requests go straight into
//! [`App::dispatch`].
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, Response, StatusCode};
use serde_json::Value;

use waypoint::middleware::{RateLimit, recovery};
use waypoint::{App, Middleware, middleware_fn};

fn get(uri: &str) -> Request<Bytes> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

fn peer(addr: &str) -> Option<SocketAddr> {
    Some(addr.parse().unwrap())
}

/// Collects a buffered dispatch response. The body is already in memory, so a
/// throwaway current-thread runtime is enough to drive it.
fn body_text(response: Response<Body>) -> String {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let bytes = runtime
        .block_on(axum::body::to_bytes(response.into_body(), usize::MAX))
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn recorder(id: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Middleware {
    let log = log.clone();
    middleware_fn(move |ctx| {
        log.lock().unwrap().push(id);
        ctx.next()
    })
}

#[test]
fn test_param_equals_path_segment() {
    let app = App::new();
    app.get("/users/:id", |ctx| {
        let id = ctx.param("id").unwrap().to_string();
        ctx.text(StatusCode::OK, id)
    });

    for id in ["42", "abc", "with-dash", "%20encoded"] {
        let response = app.dispatch(get(&format!("/users/{id}")), None);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response), id);
    }
}

#[test]
fn test_registration_order_shadows_literal_route() {
    let app = App::new();
    app.get("/a/:x", |ctx| {
        let x = ctx.param("x").unwrap().to_string();
        ctx.text(StatusCode::OK, format!("param:{x}"))
    });
    app.get("/a/fixed", |ctx| ctx.text(StatusCode::OK, "literal"));

    let response = app.dispatch(get("/a/fixed"), None);
    assert_eq!(body_text(response), "param:fixed");
}

#[test]
fn test_middleware_runs_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let app = App::new();
    for id in ["first", "second", "third", "fourth"] {
        app.use_middleware(recorder(id, &log));
    }
    let handler_log = log.clone();
    app.get("/", move |ctx| {
        handler_log.lock().unwrap().push("handler");
        ctx.status(StatusCode::NO_CONTENT)
    });

    let response = app.dispatch(get("/"), None);
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first", "second", "third", "fourth", "handler"]
    );
}

#[test]
fn test_short_circuit_skips_rest_of_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let app = App::new();
    app.use_middleware(recorder("before", &log));
    app.use_middleware(middleware_fn(|ctx| ctx.text(StatusCode::FORBIDDEN, "halt")));
    app.use_middleware(recorder("after", &log));
    let handler_log = log.clone();
    app.get("/", move |ctx| {
        handler_log.lock().unwrap().push("handler");
        ctx.text(StatusCode::OK, "handler")
    });

    let response = app.dispatch(get("/"), None);
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response), "halt");
    assert_eq!(*log.lock().unwrap(), vec!["before"]);
}

#[test]
fn test_rate_limit_window() {
    let app = App::new();
    let limit = RateLimit::new(2, Duration::from_secs(1)).unwrap();
    app.use_middleware(limit.middleware());
    app.get("/", |ctx| ctx.text(StatusCode::OK, "ok"));

    let client = peer("198.51.100.7:40000");
    assert_eq!(app.dispatch(get("/"), client).status(), StatusCode::OK);
    assert_eq!(app.dispatch(get("/"), client).status(), StatusCode::OK);
    assert_eq!(
        app.dispatch(get("/"), client).status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // A different client has its own window.
    assert_eq!(
        app.dispatch(get("/"), peer("198.51.100.8:40000")).status(),
        StatusCode::OK
    );

    std::thread::sleep(Duration::from_millis(1100));
    assert_eq!(app.dispatch(get("/"), client).status(), StatusCode::OK);
}

#[test]
fn test_recovery_first_converts_panic() {
    let app = App::new();
    app.use_middleware(recovery());
    app.get("/boom", |_ctx| panic!("handler fault"));
    app.get("/ok", |ctx| ctx.text(StatusCode::OK, "still here"));

    let response = app.dispatch(get("/boom"), None);
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response), "Internal Server Error");

    let response = app.dispatch(get("/ok"), None);
    assert_eq!(body_text(response), "still here");
}

#[test]
fn test_unmatched_path_has_no_side_effects() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = App::new();
    let counter = calls.clone();
    app.use_middleware(middleware_fn(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        ctx.next()
    }));
    let counter = calls.clone();
    app.get("/registered", move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        ctx.text(StatusCode::OK, "ok")
    });

    let response = app.dispatch(get("/unregistered"), None);
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_str(&body_text(response)).unwrap();
    assert_eq!(body["error"], "route_not_found");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_dispatch_respects_limit() {
    let app = Arc::new(App::new());
    let limit = RateLimit::new(10, Duration::from_secs(60)).unwrap();
    app.use_middleware(limit.middleware());
    app.get("/", |ctx| ctx.text(StatusCode::OK, "ok"));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let app = app.clone();
            std::thread::spawn(move || {
                (0..10)
                    .filter(|_| {
                        app.dispatch(get("/"), peer("192.0.2.50:1234")).status() == StatusCode::OK
                    })
                    .count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 10);
}

#[test]
fn test_routes_added_while_serving_are_visible() {
    let app = Arc::new(App::new());
    assert_eq!(
        app.dispatch(get("/late"), None).status(),
        StatusCode::NOT_FOUND
    );

    let registrar = app.clone();
    std::thread::spawn(move || {
        registrar.get("/late", |ctx| ctx.text(StatusCode::OK, "late"));
    })
    .join()
    .unwrap();

    assert_eq!(app.dispatch(get("/late"), None).status(), StatusCode::OK);
}
