//! The reverse proxy listener
//!
//! Accepts every method on every path and relays it to the supervised
//! backend's loopback address. `/health` is reserved and answered by the
//! shim itself. A failure in one request never takes down the listener.

use crate::client::{BackendClient, ClientError};
use crate::config::BackendConfig;
use crate::error::{json_error_response, GatewayErrorCode};
use crate::health;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderMap};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Path reserved for the shim's own health endpoint
const HEALTH_PATH: &str = "/health";

/// Response headers the serving layer recomputes; forwarding the backend's
/// values would produce framing mismatches.
const STRIPPED_RESPONSE_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// The reverse proxy server
pub struct ProxyServer {
    bind_addr: SocketAddr,
    client: Arc<BackendClient>,
    request_timeout: Duration,
    health_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    pub fn new(
        bind_addr: SocketAddr,
        backend: &BackendConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let client = Arc::new(BackendClient::new(backend.port, &backend.health_path));
        Self {
            bind_addr,
            client,
            request_timeout: backend.request_timeout(),
            health_timeout: backend.health_timeout(),
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(
            addr = %self.bind_addr,
            backend_port = self.client.port(),
            "Proxy server listening"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let client = Arc::clone(&self.client);
                            let request_timeout = self.request_timeout;
                            let health_timeout = self.health_timeout;

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream,
                                    client,
                                    request_timeout,
                                    health_timeout,
                                )
                                .await
                                {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    client: Arc<BackendClient>,
    request_timeout: Duration,
    health_timeout: Duration,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let client = Arc::clone(&client);
        async move { handle_request(req, client, request_timeout, health_timeout).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    client: Arc<BackendClient>,
    request_timeout: Duration,
    health_timeout: Duration,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // Request id is for log correlation only; forwarded headers stay untouched
    let request_id = Uuid::new_v4().to_string();

    // The health endpoint is intercepted, never forwarded
    if req.uri().path() == HEALTH_PATH {
        let outcome = health::probe_backend(&client, health_timeout).await;
        debug!(request_id, ?outcome, "Health probe");
        return Ok(health::probe_response(outcome));
    }

    debug!(method = %req.method(), uri = %req.uri(), request_id, "Incoming request");

    // The backend must not see the external Host; the client layer sets the
    // loopback authority instead.
    req.headers_mut().remove(header::HOST);

    let result = tokio::time::timeout(request_timeout, client.forward(req)).await;

    match result {
        Ok(Ok(mut response)) => {
            strip_framing_headers(response.headers_mut());
            debug!(status = %response.status(), request_id, "Relayed backend response");
            Ok(response)
        }
        Ok(Err(ClientError::Client(e))) => {
            // Log detailed error internally, return generic message externally
            error!(error = %e, request_id, "Failed to reach backend");
            Ok(json_error_response(
                GatewayErrorCode::BackendUnavailable,
                "Backend unavailable",
            ))
        }
        Ok(Err(e)) => {
            error!(error = %e, request_id, "Internal error while forwarding request");
            Ok(json_error_response(
                GatewayErrorCode::InternalError,
                "Internal server error",
            ))
        }
        Err(_) => {
            warn!(
                timeout_secs = request_timeout.as_secs(),
                request_id, "Backend did not respond in time"
            );
            Ok(json_error_response(
                GatewayErrorCode::BackendUnavailable,
                "Backend unavailable",
            ))
        }
    }
}

/// Remove the response headers the serving layer recomputes
fn strip_framing_headers(headers: &mut HeaderMap) {
    for name in &STRIPPED_RESPONSE_HEADERS {
        headers.remove(name);
    }
}
