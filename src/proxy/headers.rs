//! # Header Rewriting
//!
//! Routing and explainability headers, forwarding headers, and the
//! hop-by-hop set that never crosses the proxy.

use std::net::IpAddr;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

use crate::circuit::CircuitState;
use crate::routing::RouteReason;

use super::engine::FailoverReason;

/// Required inbound routing key.
pub const X_ROUTING_KEY: &str = "x-routing-key";
/// Propagated or generated request identifier.
pub const X_REQUEST_ID: &str = "x-request-id";
/// Final placement the request was sent to.
pub const X_ROUTED_TO: &str = "x-routed-to";
/// Why the original routing decision chose its placement.
pub const X_ROUTE_REASON: &str = "x-route-reason";
/// Why the request was diverted, when it was.
pub const X_FAILOVER_REASON: &str = "x-failover-reason";
/// Breaker state attached to the response.
pub const X_CIRCUIT_STATE: &str = "x-circuit-state";
/// Client address chain.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Inbound scheme.
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// The inbound request id, or a fresh 128-bit hex identifier.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

/// The inbound routing key, if present and non-empty.
pub fn routing_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_ROUTING_KEY)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// The declared body length, if any.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Build the header map for the upstream request.
///
/// Inbound headers are copied verbatim (the routing key included) except
/// hop-by-hop headers, `Host` (derived from the placement URL), and framing
/// headers (the body is re-framed as a stream). The proxy then sets
/// `X-Request-Id`, appends the client address to `X-Forwarded-For`, and
/// sets `X-Forwarded-Proto`.
pub fn build_upstream_headers(
    inbound: &HeaderMap,
    rid: &str,
    client_ip: IpAddr,
    proto: &str,
) -> HeaderMap {
    let mut upstream = HeaderMap::with_capacity(inbound.len() + 3);

    for (name, value) in inbound {
        if is_hop_by_hop(name) {
            continue;
        }
        // Host comes from the placement URL, framing is re-derived from the
        // streamed body, and the proxy owns the forwarding headers below.
        let owned_by_proxy = matches!(name.as_str(), "host" | "content-length")
            || name.as_str() == X_REQUEST_ID
            || name.as_str() == X_FORWARDED_FOR
            || name.as_str() == X_FORWARDED_PROTO;
        if owned_by_proxy {
            continue;
        }
        upstream.append(name.clone(), value.clone());
    }

    insert(&mut upstream, X_REQUEST_ID, rid);

    let forwarded_for = match inbound
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.to_string(),
    };
    insert(&mut upstream, X_FORWARDED_FOR, &forwarded_for);
    insert(&mut upstream, X_FORWARDED_PROTO, proto);

    upstream
}

/// Copy upstream response headers, dropping the hop-by-hop set.
pub fn copy_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut response = HeaderMap::with_capacity(upstream.len() + 5);
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            response.append(name.clone(), value.clone());
        }
    }
    response
}

/// Attach the explainability headers to a response.
pub fn decorate_response(
    headers: &mut HeaderMap,
    rid: &str,
    routed_to: &str,
    route_reason: RouteReason,
    failover: Option<FailoverReason>,
    circuit_state: CircuitState,
) {
    insert(headers, X_REQUEST_ID, rid);
    insert(headers, X_ROUTED_TO, routed_to);
    insert(headers, X_ROUTE_REASON, route_reason.as_str());
    if let Some(reason) = failover {
        insert(headers, X_FAILOVER_REASON, reason.as_str());
    }
    insert(headers, X_CIRCUIT_STATE, circuit_state.as_str());
}

/// Insert a header, dropping values that are not valid header text.
fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
