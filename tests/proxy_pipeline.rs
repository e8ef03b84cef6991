//! Proxy Pipeline End-to-End Tests
//!
//! The full request path against mock upstreams: routing, explainability
//! headers, failover, admission rejections, and outcome accounting.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::header::{HeaderValue, CONTENT_LENGTH};
use axum::http::{Method, StatusCode};
use chrono::Utc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cellgate::admission::{Admission, AdmissionController};
use cellgate::circuit::{CircuitBreakerSet, CircuitGuard, CircuitState};
use cellgate::config::{validator, ConfigDocument, ConfigSource, ConfigStore, SnapshotReader};
use cellgate::health::{HealthMonitor, HealthView};
use cellgate::proxy::ProxyEngine;

struct TestPlane {
    engine: ProxyEngine,
    circuits: Arc<CircuitBreakerSet>,
    admission: Arc<AdmissionController>,
    health: Arc<HealthMonitor>,
}

fn plane(snapshot_json: &str) -> TestPlane {
    let document = ConfigDocument::from_json(snapshot_json).unwrap();
    let snapshot = validator::validate(&document, ConfigSource::File, Utc::now()).unwrap();
    let store = Arc::new(ConfigStore::new(snapshot));

    let health = Arc::new(HealthMonitor::new(reqwest::Client::new()));
    let circuits = Arc::new(CircuitBreakerSet::new());
    let admission = Arc::new(AdmissionController::new());
    let current = store.current();
    health.apply_snapshot(&current);
    circuits.apply_snapshot(&current);
    admission.apply_snapshot(&current);

    let engine = ProxyEngine::new(
        Arc::clone(&store) as Arc<dyn SnapshotReader>,
        Arc::clone(&health) as Arc<dyn HealthView>,
        Arc::clone(&circuits) as Arc<dyn CircuitGuard>,
        Arc::clone(&admission) as Arc<dyn Admission>,
    );

    TestPlane {
        engine,
        circuits,
        admission,
        health,
    }
}

fn client_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))
}

fn get_request(routing_key: Option<&str>, target: &str) -> Request {
    let mut request = Request::new(Body::empty());
    *request.uri_mut() = target.parse().unwrap();
    if let Some(routing_key) = routing_key {
        request.headers_mut().insert(
            "x-routing-key",
            HeaderValue::from_str(routing_key).unwrap(),
        );
    }
    request
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// A dedicated key is proxied to its placement with explainability
/// headers attached.
#[tokio::test]
async fn test_dedicated_routing_succeeds() {
    let visa = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("visa-ok"))
        .expect(1)
        .mount(&visa)
        .await;
    let tier3 = MockServer::start().await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}"}},
                "tier3": {{"url": "{}"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri(),
        tier3.uri()
    ));

    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("visa"), "/x"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-routed-to").unwrap(), "visa");
    assert_eq!(response.headers().get("x-route-reason").unwrap(), "dedicated");
    assert_eq!(response.headers().get("x-circuit-state").unwrap(), "closed");
    assert!(response.headers().get("x-failover-reason").is_none());

    let rid = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(rid.len(), 32);
    assert!(rid.chars().all(|c| c.is_ascii_hexdigit()));

    assert_eq!(body_string(response).await, "visa-ok");
}

/// An unknown key falls back to the default placement.
#[tokio::test]
async fn test_unknown_key_uses_default() {
    let visa = MockServer::start().await;
    let tier3 = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("t3-ok"))
        .expect(1)
        .mount(&tier3)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}"}},
                "tier3": {{"url": "{}"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri(),
        tier3.uri()
    ));

    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("nobody"), "/x"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-routed-to").unwrap(), "tier3");
    assert_eq!(response.headers().get("x-route-reason").unwrap(), "default");
    assert_eq!(body_string(response).await, "t3-ok");
}

/// A missing routing key is a 400 and no upstream is contacted.
#[tokio::test]
async fn test_missing_routing_key_is_400() {
    let tier3 = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&tier3)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{}},
            "placements": {{"tier3": {{"url": "{}"}}}},
            "defaultPlacement": "tier3"
        }}"#,
        tier3.uri()
    ));

    let response = plane
        .engine
        .handle(client_ip(), get_request(None, "/x"))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("missing_routing_key"));
}

/// Repeated 5xx trips the breaker; the next request is diverted to the
/// fallback with the trip visible in the headers.
#[tokio::test]
async fn test_circuit_trips_to_fallback() {
    let tier1 = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&tier1)
        .await;
    let tier3 = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("t3-ok"))
        .mount(&tier3)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"acme": "tier1"}},
            "placements": {{
                "tier1": {{
                    "url": "{}",
                    "fallback": "tier3",
                    "circuit_breaker": {{"failure_threshold": 3, "timeout": "30s"}}
                }},
                "tier3": {{"url": "{}"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        tier1.uri(),
        tier3.uri()
    ));

    for _ in 0..3 {
        let response = plane
            .engine
            .handle(client_ip(), get_request(Some("acme"), "/x"))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get("x-routed-to").unwrap(), "tier1");
    }
    assert_eq!(plane.circuits.state("tier1"), CircuitState::Open);

    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("acme"), "/x"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-routed-to").unwrap(), "tier3");
    assert_eq!(response.headers().get("x-route-reason").unwrap(), "tier");
    assert_eq!(
        response.headers().get("x-failover-reason").unwrap(),
        "circuit_open"
    );
    assert_eq!(response.headers().get("x-circuit-state").unwrap(), "open");
    assert_eq!(body_string(response).await, "t3-ok");
}

/// A 4xx reply is an upstream decision, not an upstream failure: it resets
/// the consecutive-failure count.
#[tokio::test]
async fn test_4xx_is_circuit_success() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fail"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/client-error"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{
                    "url": "{}",
                    "circuit_breaker": {{"failure_threshold": 2, "timeout": "30s"}}
                }},
                "tier3": {{"url": "http://u-t3"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        upstream.uri()
    ));

    let send = |target: &'static str| {
        let engine = &plane.engine;
        async move { engine.handle(client_ip(), get_request(Some("visa"), target)).await }
    };

    let response = send("/fail").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(plane.circuits.state("visa"), CircuitState::Closed);

    // The 404 is proxied verbatim and resets the failure count
    let response = send("/client-error").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(plane.circuits.state("visa"), CircuitState::Closed);

    let response = send("/fail").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(plane.circuits.state("visa"), CircuitState::Closed);

    let response = send("/fail").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(plane.circuits.state("visa"), CircuitState::Open);
}

/// An oversized declared body is rejected before the upstream is dialed.
#[tokio::test]
async fn test_body_over_cap_is_413() {
    let visa = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&visa)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}", "max_request_body_bytes": 1024}},
                "tier3": {{"url": "http://u-t3"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri()
    ));

    let mut request = get_request(Some("visa"), "/upload");
    *request.method_mut() = Method::POST;
    request
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from_static("2048"));

    let response = plane.engine.handle(client_ip(), request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_string(response).await;
    assert!(body.contains("body_size_limit"));
}

/// A placement at its concurrency limit sheds load with 429.
#[tokio::test]
async fn test_concurrency_limit_is_429() {
    let visa = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&visa)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}", "concurrency_limit": 1}},
                "tier3": {{"url": "http://u-t3"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri()
    ));

    // Hold visa's only slot
    let held = plane.admission.try_acquire("visa");
    assert!(held.is_admitted());

    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("visa"), "/x"))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(body_string(response).await.contains("concurrency_limit"));

    // Releasing the slot restores service
    drop(held);
    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("visa"), "/x"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

/// The slot taken for a proxied request is released once its response body
/// is consumed.
#[tokio::test]
async fn test_admission_slot_released_after_response() {
    let visa = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&visa)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}", "concurrency_limit": 1}},
                "tier3": {{"url": "http://u-t3"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri()
    ));

    for _ in 0..4 {
        let response = plane
            .engine
            .handle(client_ip(), get_request(Some("visa"), "/x"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        // Draining the body drops the permit riding the stream
        let _ = body_string(response).await;
        assert!(plane.admission.try_acquire("visa").is_admitted());
    }
}

/// An unhealthy placement diverts to its fallback with the reason exposed.
#[tokio::test]
async fn test_unhealthy_placement_fails_over() {
    let visa = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&visa)
        .await;
    let tier3 = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("t3-ok"))
        .mount(&tier3)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{
                    "url": "{}",
                    "fallback": "tier3",
                    "health_check": {{"path": "/health", "interval": "25ms", "timeout": "1s"}}
                }},
                "tier3": {{"url": "{}"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri(),
        tier3.uri()
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        plane.health.state("visa"),
        cellgate::health::HealthState::Unhealthy
    );

    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("visa"), "/x"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-routed-to").unwrap(), "tier3");
    assert_eq!(
        response.headers().get("x-failover-reason").unwrap(),
        "upstream_unhealthy"
    );
    plane.health.shutdown();
}

/// Forwarding headers: the request id and routing key cross the proxy, and
/// the client address joins the forwarded chain.
#[tokio::test]
async fn test_forwarding_headers_reach_upstream() {
    let visa = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-request-id", "11112222333344445555666677778888"))
        .and(header("x-routing-key", "visa"))
        .and(header("x-forwarded-for", "192.0.2.7"))
        .and(header("x-forwarded-proto", "http"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&visa)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}"}},
                "tier3": {{"url": "http://u-t3"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri()
    ));

    let mut request = get_request(Some("visa"), "/x");
    request.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_static("11112222333344445555666677778888"),
    );

    let response = plane.engine.handle(client_ip(), request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "11112222333344445555666677778888"
    );
}

/// The request body streams through to the upstream.
#[tokio::test]
async fn test_request_body_streams_upstream() {
    let visa = MockServer::start().await;
    Mock::given(method("POST"))
        .and(wiremock::matchers::body_string("hello cell"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&visa)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}"}},
                "tier3": {{"url": "http://u-t3"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri()
    ));

    let mut request = Request::new(Body::from("hello cell"));
    *request.method_mut() = Method::POST;
    *request.uri_mut() = "/ingest".parse().unwrap();
    request
        .headers_mut()
        .insert("x-routing-key", HeaderValue::from_static("visa"));

    let response = plane.engine.handle(client_ip(), request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

/// An unreachable upstream is a 502 and counts as a circuit failure.
#[tokio::test]
async fn test_unreachable_upstream_is_502() {
    let plane = plane(
        r#"{
            "version": "1",
            "routingTable": {"visa": "visa"},
            "placements": {
                "visa": {
                    "url": "http://127.0.0.1:1",
                    "circuit_breaker": {"failure_threshold": 1, "timeout": "30s"}
                },
                "tier3": {"url": "http://u-t3"}
            },
            "defaultPlacement": "tier3"
        }"#,
    );

    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("visa"), "/x"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_string(response).await.contains("upstream_transport_error"));
    assert_eq!(plane.circuits.state("visa"), CircuitState::Open);
}

/// Query strings are forwarded verbatim.
#[tokio::test]
async fn test_query_string_forwarded() {
    let visa = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(wiremock::matchers::query_param("q", "cells"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&visa)
        .await;

    let plane = plane(&format!(
        r#"{{
            "version": "1",
            "routingTable": {{"visa": "visa"}},
            "placements": {{
                "visa": {{"url": "{}"}},
                "tier3": {{"url": "http://u-t3"}}
            }},
            "defaultPlacement": "tier3"
        }}"#,
        visa.uri()
    ));

    let response = plane
        .engine
        .handle(client_ip(), get_request(Some("visa"), "/search?q=cells"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
