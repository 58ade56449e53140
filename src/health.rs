//! Health endpoint for the proxy
//!
//! `/health` is answered by the shim itself: it probes the backend's own
//! health endpoint with a short bound and reports the combined liveness.

use crate::client::BackendClient;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Result of probing the backend's health endpoint.
///
/// Reachable-but-unhealthy and unreachable are distinct outcomes here even
/// though both map to a 503 externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Backend answered its health endpoint with 200
    Online,
    /// Backend answered with a non-200 status
    Degraded(StatusCode),
    /// Backend is unreachable or the probe failed or timed out
    Offline,
}

/// JSON body of the shim's health response
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub backend: &'static str,
}

impl HealthReport {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"status":"{}","backend":"{}"}}"#,
                self.status, self.backend
            )
        })
    }
}

impl ProbeOutcome {
    /// External mapping: only Online is 200, everything else is 503
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProbeOutcome::Online => StatusCode::OK,
            ProbeOutcome::Degraded(_) | ProbeOutcome::Offline => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn report(&self) -> HealthReport {
        match self {
            ProbeOutcome::Online => HealthReport {
                status: "healthy",
                backend: "online",
            },
            ProbeOutcome::Degraded(_) => HealthReport {
                status: "unhealthy",
                backend: "error",
            },
            ProbeOutcome::Offline => HealthReport {
                status: "unhealthy",
                backend: "offline",
            },
        }
    }
}

/// Probe the backend's health endpoint with the given bound
pub async fn probe_backend(client: &BackendClient, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, client.probe()).await {
        Ok(Ok(StatusCode::OK)) => ProbeOutcome::Online,
        Ok(Ok(status)) => {
            debug!(%status, "Backend health endpoint returned non-200");
            ProbeOutcome::Degraded(status)
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Backend health probe failed");
            ProbeOutcome::Offline
        }
        Err(_) => {
            debug!(timeout_secs = timeout.as_secs(), "Backend health probe timed out");
            ProbeOutcome::Offline
        }
    }
}

/// Build the HTTP response for a probe outcome
pub fn probe_response(outcome: ProbeOutcome) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = outcome.report().to_json();

    Response::builder()
        .status(outcome.status_code())
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
