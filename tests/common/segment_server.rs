//! Tiny HTTP/1.1 segment server for integration tests.
//!
//! Every connection serves one request and is closed. Routes:
//! - `/size/<n>`: `n` bytes with `Content-Length`
//! - `/nolen/<n>`: `n` bytes, no `Content-Length`, body ends at close
//! - `/abort/<sent>/<declared>`: declares `declared` bytes, sends `sent`, closes
//! - `/slow/<n>/<ms>`: like `/size/<n>` after holding the request for `ms`
//! - anything else: 404

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Deterministic body bytes, so tests can compare file contents.
pub fn body(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 251) as u8).collect()
}

#[derive(Debug, Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

pub struct SegmentServer {
    base: String,
    gauge: Arc<Gauge>,
}

impl SegmentServer {
    /// Binds to an ephemeral port; the accept thread lives until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let gauge = Arc::new(Gauge::default());
        let accept_gauge = Arc::clone(&gauge);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let gauge = Arc::clone(&accept_gauge);
                thread::spawn(move || handle(stream, &gauge));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{port}"),
            gauge,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Most `/slow` requests that were held at the same time.
    pub fn peak_slow(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

fn read_request_path(stream: &mut TcpStream) -> Option<String> {
    let mut req = Vec::new();
    let mut buf = [0u8; 4096];
    while !req.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        req.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&req);
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    parts.next().map(str::to_string)
}

fn numbers(rest: &str) -> Vec<usize> {
    rest.split('/').filter_map(|s| s.parse().ok()).collect()
}

fn handle(mut stream: TcpStream, gauge: &Gauge) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(path) = read_request_path(&mut stream) else {
        return;
    };

    let (head, payload) = if let Some(rest) = path.strip_prefix("/size/") {
        match numbers(rest)[..] {
            [n] => (sized_head(n), body(n)),
            _ => not_found(),
        }
    } else if let Some(rest) = path.strip_prefix("/nolen/") {
        match numbers(rest)[..] {
            [n] => (
                "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string(),
                body(n),
            ),
            _ => not_found(),
        }
    } else if let Some(rest) = path.strip_prefix("/abort/") {
        match numbers(rest)[..] {
            [sent, declared] => (sized_head(declared), body(sent)),
            _ => not_found(),
        }
    } else if let Some(rest) = path.strip_prefix("/slow/") {
        match numbers(rest)[..] {
            [n, ms] => {
                let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
                gauge.peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(ms as u64));
                // Leave the gauge before replying: the client can only start
                // its next request after this one completes.
                gauge.active.fetch_sub(1, Ordering::SeqCst);
                (sized_head(n), body(n))
            }
            _ => not_found(),
        }
    } else {
        not_found()
    };

    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&payload);
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Write);
}

fn sized_head(len: usize) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n")
}

fn not_found() -> (String, Vec<u8>) {
    (
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
        Vec::new(),
    )
}
