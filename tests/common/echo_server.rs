//! Minimal HTTP/1.1 server for integration tests.
//!
//! Routes:
//! - `GET /get`: 200 with a fixed body.
//! - `POST /post`: 200 echoing the request body; the request's declared
//!   `Content-Length` comes back in `X-Request-Content-Length`.
//! - `/status/<code>`: responds with that status code.
//! - `/delay/<ms>`: sleeps before answering 200.
//! - `/stream/<chunks>/<ms>`: 200 whose body arrives in `chunks` pieces
//!   spaced `ms` apart (for pause/resume tests).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const STREAM_CHUNK_SIZE: usize = 1024;

pub struct EchoServer {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
}

impl EchoServer {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start the server on an ephemeral port; it runs until the process exits.
pub fn start() -> EchoServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let counter = Arc::clone(&counter);
            thread::spawn(move || handle(stream, &counter));
        }
    });
    EchoServer {
        url: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

fn handle(mut stream: TcpStream, hits: &AtomicUsize) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(10)));

    let Some(request) = read_request(&mut stream) else {
        return;
    };
    hits.fetch_add(1, Ordering::SeqCst);

    let path = request.path.as_str();
    if path == "/get" {
        respond(&mut stream, 200, "OK", &[], b"hello from the echo server");
    } else if path == "/post" {
        let declared = request
            .content_length
            .map(|n| n.to_string())
            .unwrap_or_else(|| "missing".to_string());
        let extra = format!("X-Request-Content-Length: {}\r\n", declared);
        respond(&mut stream, 200, "OK", &[extra.as_str()], &request.body);
    } else if let Some(code) = path.strip_prefix("/status/") {
        let code: u32 = code.parse().unwrap_or(500);
        respond(&mut stream, code, "Status", &[], b"status endpoint");
    } else if let Some(ms) = path.strip_prefix("/delay/") {
        let ms: u64 = ms.parse().unwrap_or(0);
        thread::sleep(Duration::from_millis(ms));
        respond(&mut stream, 200, "OK", &[], b"slow response");
    } else if let Some(args) = path.strip_prefix("/stream/") {
        let mut parts = args.splitn(2, '/');
        let chunks: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(4);
        let ms: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(100);
        stream_response(&mut stream, chunks, ms);
    } else {
        respond(&mut stream, 404, "Not Found", &[], b"no such route");
    }
}

struct Request {
    path: String,
    content_length: Option<usize>,
    body: Vec<u8>,
}

/// Read the request head (answering `Expect: 100-continue` if present) and
/// then the declared body.
fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        match stream.read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return None,
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let path = request_line.split_whitespace().nth(1)?.to_string();

    let mut content_length = None;
    let mut expects_continue = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
            if name.trim().eq_ignore_ascii_case("expect")
                && value.trim().eq_ignore_ascii_case("100-continue")
            {
                expects_continue = true;
            }
        }
    }

    if expects_continue {
        let _ = stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    let mut body: Vec<u8> = buf[head_end + 4..].to_vec();
    let wanted = content_length.unwrap_or(0);
    while body.len() < wanted {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    body.truncate(wanted);

    Some(Request {
        path,
        content_length,
        body,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn respond(stream: &mut TcpStream, code: u32, reason: &str, extra_headers: &[&str], body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
        code,
        reason,
        body.len(),
        extra_headers.concat()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

/// Byte pattern of the full `/stream` body, for equality checks.
pub fn stream_body(chunks: usize) -> Vec<u8> {
    let mut body = Vec::with_capacity(chunks * STREAM_CHUNK_SIZE);
    for i in 0..chunks {
        body.extend(std::iter::repeat(b'a' + (i % 26) as u8).take(STREAM_CHUNK_SIZE));
    }
    body
}

fn stream_response(stream: &mut TcpStream, chunks: usize, ms: u64) {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        chunks * STREAM_CHUNK_SIZE
    );
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    for i in 0..chunks {
        let chunk = vec![b'a' + (i % 26) as u8; STREAM_CHUNK_SIZE];
        if stream.write_all(&chunk).is_err() {
            return;
        }
        let _ = stream.flush();
        thread::sleep(Duration::from_millis(ms));
    }
}
