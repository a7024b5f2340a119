//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves a fixed table of paths. Each route has a status, a body and an
//! optional delay before the response; unknown paths get 404.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    /// Sleep before writing the response (simulates a slow origin).
    pub delay: Duration,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Handle to a running server. The server runs until the process exits.
pub struct TestServer {
    base: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    /// Full URL for `path` (e.g. `url("/a")` → "http://127.0.0.1:12345/a").
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread serving `routes`.
pub fn start(routes: Vec<(&str, Route)>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes: Arc<HashMap<String, Route>> = Arc::new(
        routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect(),
    );
    let hits = Arc::new(AtomicUsize::new(0));
    let server_hits = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            let hits = Arc::clone(&server_hits);
            thread::spawn(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                handle(stream, &routes)
            });
        }
    });
    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

fn handle(mut stream: TcpStream, routes: &HashMap<String, Route>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, path) = parse_request_line(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }
    let not_found = Route::status(404);
    let route = routes.get(path).unwrap_or(&not_found);
    if !route.delay.is_zero() {
        thread::sleep(route.delay);
    }
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n",
        route.status,
        reason(route.status),
        route.body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(&route.body);
}

/// Returns (method, path) from the request line.
fn parse_request_line(request: &str) -> (&str, &str) {
    let line = request.lines().next().unwrap_or("");
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");
    (method, path)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
