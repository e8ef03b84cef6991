//! # Proxy Engine
//!
//! The per-request pipeline: resolve, admit, check the breaker and health,
//! divert one step on failure, stream the request upstream, stream the
//! response back, and account the outcome against the placement that was
//! actually contacted. Failover is deterministic and never cascades: a
//! request is diverted at most once, and the fallback's own breaker and
//! health are not consulted.
//!
//! The engine holds one snapshot handle for the whole request; a config
//! publish mid-request does not change the decision. The admission slot
//! taken at the top of the pipeline travels with the response body stream,
//! so it is released when the response finishes (or the client goes away),
//! on every path.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::response::Response;
use futures_util::StreamExt;

use crate::admission::{Admission, AdmissionOutcome, AdmissionPermit};
use crate::circuit::{CircuitGuard, CircuitState};
use crate::config::SnapshotReader;
use crate::health::{HealthState, HealthView};
use crate::observability::RequestRecord;
use crate::routing;

use super::errors::ProxyError;
use super::headers;

/// Why a request was diverted from its resolved placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverReason {
    /// The placement's breaker was open
    CircuitOpen,
    /// The placement's endpoint was marked unhealthy
    UpstreamUnhealthy,
}

impl FailoverReason {
    /// Returns the string representation used in logs and headers
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverReason::CircuitOpen => "circuit_open",
            FailoverReason::UpstreamUnhealthy => "upstream_unhealthy",
        }
    }
}

/// Upstream deadlines. Timeouts are the only backpressure on the upstream.
#[derive(Debug, Clone, Copy)]
pub struct ProxyTimeouts {
    /// TCP connect deadline
    pub connect: Duration,
    /// Response-header deadline; exceeding it is a 504
    pub header: Duration,
    /// Whole-request deadline, body streaming included
    pub request: Duration,
}

impl Default for ProxyTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            header: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

/// The streaming reverse proxy.
pub struct ProxyEngine {
    store: Arc<dyn SnapshotReader>,
    health: Arc<dyn HealthView>,
    circuits: Arc<dyn CircuitGuard>,
    admission: Arc<dyn Admission>,
    client: reqwest::Client,
    timeouts: ProxyTimeouts,
}

impl ProxyEngine {
    /// Create an engine with the default deadlines.
    pub fn new(
        store: Arc<dyn SnapshotReader>,
        health: Arc<dyn HealthView>,
        circuits: Arc<dyn CircuitGuard>,
        admission: Arc<dyn Admission>,
    ) -> Self {
        Self::with_timeouts(store, health, circuits, admission, ProxyTimeouts::default())
    }

    /// Create an engine with explicit deadlines.
    pub fn with_timeouts(
        store: Arc<dyn SnapshotReader>,
        health: Arc<dyn HealthView>,
        circuits: Arc<dyn CircuitGuard>,
        admission: Arc<dyn Admission>,
        timeouts: ProxyTimeouts,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("upstream HTTP client construction");

        Self {
            store,
            health,
            circuits,
            admission,
            client,
            timeouts,
        }
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, client_ip: IpAddr, request: Request) -> Response {
        let rid = headers::request_id(request.headers());
        let mut record =
            RequestRecord::new(&rid, request.method().as_str(), request.uri().path());

        // Routing key is mandatory
        let routing_key = match headers::routing_key(request.headers()) {
            Some(routing_key) => routing_key,
            None => {
                let error = ProxyError::MissingRoutingKey;
                let response = error_response(&error, &rid);
                record.finish(response.status().as_u16());
                return response;
            }
        };
        record.set_routing_key(&routing_key);

        // One snapshot handle for the whole request
        let snapshot = self.store.current();
        let decision = match routing::resolve(&routing_key, &snapshot) {
            Ok(decision) => decision,
            Err(e) => {
                let error = ProxyError::Internal(e);
                let response = error_response(&error, &rid);
                record.finish(response.status().as_u16());
                return response;
            }
        };

        let mut pk = decision.placement.clone();
        let mut failover: Option<FailoverReason> = None;
        record.set_route(&pk, decision.reason.as_str());

        // Admission is charged against the resolved placement, before any
        // failover, and released when the response stream finishes
        let permit = match self.admission.try_acquire(&pk) {
            AdmissionOutcome::Admitted(permit) => permit,
            AdmissionOutcome::Rejected => {
                let error = ProxyError::LoadShed(pk.clone());
                let mut response = error_response(&error, &rid);
                headers::decorate_response(
                    response.headers_mut(),
                    &rid,
                    &pk,
                    decision.reason,
                    None,
                    self.circuits.state(&pk),
                );
                record.finish(response.status().as_u16());
                return response;
            }
        };

        if let Some(length) = headers::content_length(request.headers()) {
            if length > 0 && !self.admission.check_body_size(&pk, length) {
                let error = ProxyError::PayloadTooLarge {
                    placement: pk.clone(),
                };
                let mut response = error_response(&error, &rid);
                headers::decorate_response(
                    response.headers_mut(),
                    &rid,
                    &pk,
                    decision.reason,
                    None,
                    self.circuits.state(&pk),
                );
                record.finish(response.status().as_u16());
                return response;
            }
        }

        // Breaker check; an open breaker diverts to the configured fallback
        // or resolves the request with 503
        let mut tripped_state: Option<CircuitState> = None;
        if !self.circuits.allow(&pk) {
            match snapshot.placement(&pk).and_then(|p| p.fallback.clone()) {
                Some(fallback) => {
                    tripped_state = Some(CircuitState::Open);
                    failover = Some(FailoverReason::CircuitOpen);
                    pk = fallback;
                }
                None => {
                    let error = ProxyError::CircuitOpen(pk.clone());
                    let mut response = error_response(&error, &rid);
                    headers::decorate_response(
                        response.headers_mut(),
                        &rid,
                        &pk,
                        decision.reason,
                        None,
                        CircuitState::Open,
                    );
                    record.finish(response.status().as_u16());
                    return response;
                }
            }
        }

        // Health check; failover is one step, so a request already diverted
        // by the breaker is not diverted again
        if failover.is_none() && self.health.state(&pk) == HealthState::Unhealthy {
            if let Some(fallback) = snapshot.placement(&pk).and_then(|p| p.fallback.clone()) {
                failover = Some(FailoverReason::UpstreamUnhealthy);
                pk = fallback;
            } else if pk != snapshot.default_placement {
                failover = Some(FailoverReason::UpstreamUnhealthy);
                pk = snapshot.default_placement.clone();
            }
            // The default placement with no fallback is attempted as-is
        }

        if let Some(reason) = failover {
            record.set_failover(reason.as_str());
            record.set_route(&pk, decision.reason.as_str());
        }

        let endpoint = match snapshot.placement(&pk) {
            Some(placement) => placement.url.clone(),
            None => {
                // Fallbacks are validated to exist; this cannot occur
                let error =
                    ProxyError::Internal(routing::ResolveError::MissingPlacement(pk.clone()));
                let response = error_response(&error, &rid);
                record.finish(response.status().as_u16());
                return response;
            }
        };

        // Build the upstream request: method, path, and query verbatim;
        // scheme and authority from the placement; body streamed through
        let method = request.method().clone();
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let upstream_url = format!("{}{}", endpoint.as_str().trim_end_matches('/'), path_and_query);
        let proto = request.uri().scheme_str().unwrap_or("http").to_string();

        let (parts, body) = request.into_parts();
        let upstream_headers =
            headers::build_upstream_headers(&parts.headers, &rid, client_ip, &proto);
        let upstream_body = reqwest::Body::wrap_stream(body.into_data_stream());

        let dispatch = self
            .client
            .request(method, upstream_url)
            .headers(upstream_headers)
            .body(upstream_body)
            .timeout(self.timeouts.request)
            .send();

        let upstream_response = match tokio::time::timeout(self.timeouts.header, dispatch).await {
            Ok(Ok(upstream_response)) => upstream_response,
            Ok(Err(e)) => {
                // Connect refused, DNS failure, connect deadline, TLS error
                self.circuits.record_failure(&pk);
                let error = ProxyError::Transport(e.to_string());
                let mut response = error_response(&error, &rid);
                headers::decorate_response(
                    response.headers_mut(),
                    &rid,
                    &pk,
                    decision.reason,
                    failover,
                    self.circuits.state(&pk),
                );
                record.finish(response.status().as_u16());
                return response;
            }
            Err(_) => {
                self.circuits.record_failure(&pk);
                let error = ProxyError::HeaderTimeout;
                let mut response = error_response(&error, &rid);
                headers::decorate_response(
                    response.headers_mut(),
                    &rid,
                    &pk,
                    decision.reason,
                    failover,
                    self.circuits.state(&pk),
                );
                record.finish(response.status().as_u16());
                return response;
            }
        };

        // Outcome accounting against the placement actually contacted:
        // 5xx and transport failures trip the breaker, 4xx does not
        let status = upstream_response.status();
        if status.is_server_error() {
            self.circuits.record_failure(&pk);
        } else {
            self.circuits.record_success(&pk);
        }

        let mut response_headers = headers::copy_response_headers(upstream_response.headers());
        let circuit_state = tripped_state.unwrap_or_else(|| self.circuits.state(&pk));
        headers::decorate_response(
            &mut response_headers,
            &rid,
            &pk,
            decision.reason,
            failover,
            circuit_state,
        );

        // The permit rides the body stream so the slot stays held until the
        // response is fully streamed (or the client disconnects)
        let body_stream = upstream_response.bytes_stream().map(move |chunk| {
            let _held: &AdmissionPermit = &permit;
            chunk
        });

        let mut response = Response::new(Body::from_stream(body_stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;

        record.finish(status.as_u16());
        response
    }
}

/// A resolved-error response: JSON body naming the error and reason code.
fn error_response(error: &ProxyError, rid: &str) -> Response {
    let body = serde_json::json!({
        "error": error.to_string(),
        "reason": error.reason(),
    })
    .to_string();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = error.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(rid) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(headers::X_REQUEST_ID), value);
    }
    response
}
