//! Loopback HTTP client for the supervised backend
//!
//! One pooled client forwards proxied requests, a dedicated client with an
//! `Empty` body type issues health probes. Neither follows redirects; a 3xx
//! from the backend is relayed to the caller untouched.

use http_body_util::{combinators::BoxBody, BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

/// Error type for backend client operations
#[derive(Debug)]
pub enum ClientError {
    /// Error from the HTTP client (connect failure, reset, protocol error)
    Client(hyper_util::client::legacy::Error),
    /// Error building a request
    RequestBuild(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Client(e) => write!(f, "Client error: {}", e),
            ClientError::RequestBuild(s) => write!(f, "Request build error: {}", s),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<hyper_util::client::legacy::Error> for ClientError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ClientError::Client(err)
    }
}

/// HTTP client for the backend's fixed loopback address
pub struct BackendClient {
    /// Main client for relaying proxied requests
    client: Client<HttpConnector, Incoming>,
    /// Dedicated client for health probes (uses Empty body type)
    probe_client: Client<HttpConnector, Empty<Bytes>>,
    port: u16,
    health_path: String,
}

impl BackendClient {
    /// Create a client for the backend listening on the given loopback port
    pub fn new(port: u16, health_path: &str) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new()).build(connector.clone());
        let probe_client = Client::builder(TokioExecutor::new()).build(connector);

        debug!(port, health_path, "Backend client initialized");

        Self {
            client,
            probe_client,
            port,
            health_path: health_path.to_string(),
        }
    }

    /// The loopback port this client targets
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Relay a request to the backend, preserving method, path, query,
    /// headers, and body exactly as given.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ClientError> {
        let uri = format!(
            "http://127.0.0.1:{}{}",
            self.port,
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
        );

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&uri);

        for (key, value) in parts.headers.iter() {
            builder = builder.header(key, value);
        }

        let backend_req = builder
            .body(body)
            .map_err(|e| ClientError::RequestBuild(e.to_string()))?;

        let response = self.client.request(backend_req).await?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }

    /// Query the backend's own health endpoint, returning its status code
    pub async fn probe(&self) -> Result<StatusCode, ClientError> {
        let uri = format!("http://127.0.0.1:{}{}", self.port, self.health_path);

        let req = Request::builder()
            .method("GET")
            .uri(&uri)
            .body(Empty::<Bytes>::new())
            .map_err(|e| ClientError::RequestBuild(e.to_string()))?;

        let response = self.probe_client.request(req).await?;
        Ok(response.status())
    }
}
