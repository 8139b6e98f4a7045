//! Request model: method, URL, raw header lines, body, per-request tunables.

use std::time::Duration;

/// HTTP method. `Other` carries a free-form method name verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Other(String),
}

impl Method {
    /// Map a method name (any case) onto the enum; unknown names become
    /// `Other` with their spelling preserved.
    pub fn from_name(name: &str) -> Method {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            _ => Method::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Other(name) => name,
        }
    }
}

/// One HTTP exchange to perform. Headers are ordered raw `Name: value`
/// lines; duplicates are preserved and sent as given. The body is an opaque
/// buffer handed over whole. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, Method::Get)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(url, Method::Post).with_body(body)
    }

    /// Append one raw header line, e.g. `Content-Type: application/json`.
    pub fn with_header(mut self, line: impl Into<String>) -> Self {
        self.headers.push(line.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Per-request transport tunables. A zero value leaves the corresponding
/// limit unenforced.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestPolicy {
    /// Overall transfer deadline.
    pub timeout: Duration,
    /// DNS + handshake deadline.
    pub connect_timeout: Duration,
    /// Abort when throughput stays below this many bytes/s...
    pub low_speed_limit: u32,
    /// ...for this long.
    pub low_speed_time: Duration,
    /// Upload bandwidth cap, bytes/s.
    pub send_speed_limit: u64,
    /// Download bandwidth cap, bytes/s.
    pub recv_speed_limit: u64,
    /// Transport I/O buffer size, bytes.
    pub buffer_size: usize,
}
