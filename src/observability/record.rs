//! # Request Completion Records
//!
//! Every request that enters the proxy pipeline produces exactly one
//! structured log record, on every exit path. The record captures its start
//! time at creation, is armed when the request is admitted, and is disarmed
//! by `finish`; if the handler future is dropped before finishing (client
//! disconnect, shutdown), the `Drop` impl emits the record with the status
//! marked as client-canceled and the elapsed time measured the same way.

use std::time::Instant;

use super::logger::Logger;

/// Final status marker used when the client went away before a response
/// could be written.
pub const STATUS_CLIENT_CANCELED: &str = "client_canceled";

/// Accumulates the fields of one request's completion record.
#[derive(Debug)]
pub struct RequestRecord {
    started: Instant,
    request_id: String,
    method: String,
    path: String,
    routing_key: String,
    placement: String,
    route_reason: String,
    failover_reason: String,
    status: String,
    duration_ms: String,
    finished: bool,
}

impl RequestRecord {
    /// Start a record for one inbound request.
    pub fn new(request_id: &str, method: &str, path: &str) -> Self {
        Self {
            started: Instant::now(),
            request_id: request_id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            routing_key: String::new(),
            placement: String::new(),
            route_reason: String::new(),
            failover_reason: String::new(),
            status: String::new(),
            duration_ms: String::new(),
            finished: false,
        }
    }

    /// Record the routing key once it has been read from the request.
    pub fn set_routing_key(&mut self, routing_key: &str) {
        self.routing_key = routing_key.to_string();
    }

    /// Record the routing decision (final placement and original reason).
    pub fn set_route(&mut self, placement: &str, route_reason: &str) {
        self.placement = placement.to_string();
        self.route_reason = route_reason.to_string();
    }

    /// Record that failover diverted the request.
    pub fn set_failover(&mut self, failover_reason: &str) {
        self.failover_reason = failover_reason.to_string();
    }

    /// Emit the completion record with the final status.
    pub fn finish(mut self, status: u16) {
        self.status = status.to_string();
        self.duration_ms = self.started.elapsed().as_millis().to_string();
        self.finished = true;
        self.emit();
    }

    fn emit(&self) {
        Logger::info(
            "REQUEST_COMPLETED",
            &[
                ("request_id", &self.request_id),
                ("method", &self.method),
                ("path", &self.path),
                ("routing_key", &self.routing_key),
                ("placement", &self.placement),
                ("route_reason", &self.route_reason),
                ("failover_reason", &self.failover_reason),
                ("status", &self.status),
                ("duration_ms", &self.duration_ms),
            ],
        );
    }
}

impl Drop for RequestRecord {
    fn drop(&mut self) {
        if !self.finished {
            self.status = STATUS_CLIENT_CANCELED.to_string();
            self.duration_ms = self.started.elapsed().as_millis().to_string();
            self.emit();
        }
    }
}
