//! Integration tests for Shimgate
//!
//! Each test runs the proxy against an in-process mock backend speaking raw
//! HTTP/1.1 over TCP, so forwarding semantics are observed end to end.

use std::net::SocketAddr;
use std::time::Duration;

use shimgate::config::BackendConfig;
use shimgate::proxy::ProxyServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Spawn a mock backend that echoes requests back.
///
/// Behavior by path:
/// - `/health`: 200 "ok" when `healthy`, 500 otherwise
/// - `/error`: 500 "backend error"
/// - `/redirect`: 302 with a Location header
/// - anything else: 200 with the received request (method, target, headers,
///   body) echoed in the response body
///
/// Every response carries `X-Mock-Server: true` and a bogus
/// `Content-Encoding: gzip` so tests can observe header pass-through and
/// framing-header stripping.
async fn spawn_mock_backend(port: u16, healthy: bool) {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("mock backend bind");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                handle_mock_connection(stream, healthy).await;
            });
        }
    });
}

async fn handle_mock_connection(mut stream: TcpStream, healthy: bool) {
    let mut buf = Vec::new();
    let mut temp = [0u8; 1024];

    // Read until end of headers
    let header_end = loop {
        let n = match stream.read(&mut temp).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        buf.extend_from_slice(&temp[..n]);

        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > 16384 {
            return;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or("GET / HTTP/1.1");
    let parts: Vec<&str> = request_line.split(' ').collect();
    let (method, target) = if parts.len() >= 2 {
        (parts[0], parts[1])
    } else {
        ("GET", "/")
    };

    let header_lines: Vec<&str> = lines.collect();
    let content_length: usize = header_lines
        .iter()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    // Read the remainder of the body
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = match stream.read(&mut temp).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => return,
        };
        body.extend_from_slice(&temp[..n]);
    }

    let path = target.split('?').next().unwrap_or(target);
    let (status_line, location, response_body) = match path {
        "/health" => {
            if healthy {
                ("200 OK", None, "ok".to_string())
            } else {
                ("500 Internal Server Error", None, "unhealthy".to_string())
            }
        }
        "/error" => ("500 Internal Server Error", None, "backend error".to_string()),
        "/redirect" => ("302 Found", Some("/next"), String::new()),
        _ => {
            let echo = format!(
                "{} {}\n{}\n\n{}",
                method,
                target,
                header_lines.join("\n"),
                String::from_utf8_lossy(&body)
            );
            ("200 OK", None, echo)
        }
    };

    let location_header = location
        .map(|l| format!("Location: {}\r\n", l))
        .unwrap_or_default();

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Content-Encoding: gzip\r\n\
         X-Mock-Server: true\r\n\
         {}Connection: close\r\n\
         \r\n\
         {}",
        status_line,
        response_body.len(),
        location_header,
        response_body
    );

    let _ = stream.write_all(response.as_bytes()).await;
}

/// Start the proxy on `proxy_port` targeting `backend_port`.
///
/// Returns the shutdown sender; tests must keep it alive for the proxy's
/// lifetime.
async fn start_proxy(proxy_port: u16, backend_port: u16) -> watch::Sender<bool> {
    let backend = BackendConfig::new("true", backend_port);
    let bind_addr: SocketAddr = format!("127.0.0.1:{}", proxy_port).parse().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let proxy = ProxyServer::new(bind_addr, &backend, shutdown_rx);

    tokio::spawn(async move {
        let _ = proxy.run().await;
    });

    assert!(
        wait_for_port(proxy_port, Duration::from_secs(5)).await,
        "proxy did not start listening"
    );
    shutdown_tx
}

/// Wait for a port to become available (server listening)
async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Send a raw HTTP request and collect the full response
async fn http_request(port: u16, request: &str) -> Result<String, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await?;
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

/// Send a simple HTTP GET and get the response
async fn http_get(port: u16, path: &str) -> Result<String, Box<dyn std::error::Error>> {
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nConnection: close\r\n\r\n",
        path, port
    );
    http_request(port, &request).await
}

/// Split a raw HTTP response into head and body sections
fn split_response(response: &str) -> (&str, &str) {
    response.split_once("\r\n\r\n").unwrap_or((response, ""))
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn test_forwards_post_method_path_and_body() {
    spawn_mock_backend(47101, true).await;
    let _shutdown = start_proxy(47201, 47101).await;

    let body = r#"{"id":1}"#;
    let request = format!(
        "POST /api/orders HTTP/1.1\r\n\
         Host: 127.0.0.1:47201\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );

    let response = http_request(47201, &request).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);

    let (_, resp_body) = split_response(&response);
    // The backend saw the exact method, path, and body
    assert!(resp_body.contains("POST /api/orders"), "got: {}", resp_body);
    assert!(resp_body.contains(r#"{"id":1}"#), "got: {}", resp_body);
}

#[tokio::test]
async fn test_query_string_preserved() {
    spawn_mock_backend(47102, true).await;
    let _shutdown = start_proxy(47202, 47102).await;

    let response = http_get(47202, "/search?q=rust&page=2").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);

    let (_, body) = split_response(&response);
    assert!(body.contains("GET /search?q=rust&page=2"), "got: {}", body);
}

#[tokio::test]
async fn test_host_header_not_forwarded() {
    spawn_mock_backend(47103, true).await;
    let _shutdown = start_proxy(47203, 47103).await;

    let request = "GET /whoami HTTP/1.1\r\n\
                   Host: legacy.example.com\r\n\
                   Connection: close\r\n\
                   \r\n";

    let response = http_request(47203, request).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);

    // The echoed request must not carry the external Host value
    let (_, body) = split_response(&response);
    assert!(
        !body.contains("legacy.example.com"),
        "external Host leaked to backend: {}",
        body
    );
}

#[tokio::test]
async fn test_backend_framing_headers_stripped() {
    spawn_mock_backend(47104, true).await;
    let _shutdown = start_proxy(47204, 47104).await;

    let response = http_get(47204, "/anything").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);

    let (head, _) = split_response(&response);
    let head = head.to_lowercase();
    // The backend's Content-Encoding never reaches the caller
    assert!(!head.contains("content-encoding"), "got: {}", head);
    // Other backend headers pass through
    assert!(head.contains("x-mock-server"), "got: {}", head);
}

#[tokio::test]
async fn test_backend_error_status_relayed() {
    spawn_mock_backend(47105, true).await;
    let _shutdown = start_proxy(47205, 47105).await;

    let response = http_get(47205, "/error").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 500"), "got: {}", response);

    let (_, body) = split_response(&response);
    assert!(body.contains("backend error"), "got: {}", body);
}

#[tokio::test]
async fn test_redirect_not_followed() {
    spawn_mock_backend(47106, true).await;
    let _shutdown = start_proxy(47206, 47106).await;

    let response = http_get(47206, "/redirect").await.unwrap();
    // The 3xx is relayed for the caller to observe, never chased
    assert!(response.starts_with("HTTP/1.1 302"), "got: {}", response);

    let (head, _) = split_response(&response);
    assert!(head.to_lowercase().contains("location:"), "got: {}", head);
}

#[tokio::test]
async fn test_unreachable_backend_returns_503() {
    // Nothing listens on the backend port
    let _shutdown = start_proxy(47207, 47107).await;

    let response = http_get(47207, "/anything").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 503"), "got: {}", response);

    let (head, body) = split_response(&response);
    assert!(head.contains("BACKEND_UNAVAILABLE"), "got: {}", head);
    assert!(body.contains("\"error\":\"Backend unavailable\""), "got: {}", body);
}

// ============================================================================
// Health endpoint
// ============================================================================

#[tokio::test]
async fn test_health_online() {
    spawn_mock_backend(47108, true).await;
    let _shutdown = start_proxy(47208, 47108).await;

    let response = http_get(47208, "/health").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);

    let (_, body) = split_response(&response);
    // The shim answers with its own report, proving /health was intercepted
    assert!(body.contains("\"status\":\"healthy\""), "got: {}", body);
    assert!(body.contains("\"backend\":\"online\""), "got: {}", body);
}

#[tokio::test]
async fn test_health_degraded_backend() {
    spawn_mock_backend(47109, false).await;
    let _shutdown = start_proxy(47209, 47109).await;

    let response = http_get(47209, "/health").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 503"), "got: {}", response);

    let (_, body) = split_response(&response);
    assert!(body.contains("\"status\":\"unhealthy\""), "got: {}", body);
    assert!(body.contains("\"backend\":\"error\""), "got: {}", body);
}

#[tokio::test]
async fn test_health_offline_backend() {
    // Nothing listens on the backend port
    let _shutdown = start_proxy(47210, 47110).await;

    let response = http_get(47210, "/health").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 503"), "got: {}", response);

    let (_, body) = split_response(&response);
    assert!(body.contains("\"status\":\"unhealthy\""), "got: {}", body);
    assert!(body.contains("\"backend\":\"offline\""), "got: {}", body);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_proxy_stops_on_shutdown_signal() {
    spawn_mock_backend(47111, true).await;
    let shutdown = start_proxy(47211, 47111).await;

    // Listener is up
    assert!(wait_for_port(47211, Duration::from_secs(1)).await);

    shutdown.send(true).unwrap();

    // The accept loop exits; new connections are eventually refused
    let start = std::time::Instant::now();
    let mut refused = false;
    while start.elapsed() < Duration::from_secs(5) {
        if TcpStream::connect("127.0.0.1:47211").await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(refused, "proxy kept accepting connections after shutdown");
}
