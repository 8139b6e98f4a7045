//! One pending or in-flight HTTP exchange over a transport handle.
//!
//! A `Transfer` binds a request and its policy to a `curl` easy handle and
//! accumulates the response through the transport callbacks. The scheduler
//! detaches the handle while the transfer sits in the multiplex and
//! reassembles it on completion; blocking callers just call
//! [`Transfer::perform_blocking`].

use std::sync::atomic::{AtomicU64, Ordering};

use curl::easy::{Easy2, Handler, List, WriteError};

use crate::config::ClientSettings;
use crate::request::{HttpRequest, Method, RequestPolicy};
use crate::response::{CumulativeTimes, HttpResponse};
use crate::util::now_wall;

/// Largest transport buffer a request policy may ask for.
const MAX_BUFFER_SIZE: usize = 512 * 1024;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Callback state for one attempt: the growing response, the
/// `Content-Length` pre-allocation hint, and the cooperative pause flag.
pub struct TransferHandler {
    response: HttpResponse,
    content_length: Option<usize>,
    pause_requested: bool,
}

impl TransferHandler {
    fn new() -> Self {
        Self {
            response: HttpResponse::default(),
            content_length: None,
            pause_requested: false,
        }
    }

    /// Ask the transport to pause at the next body delivery. The chunk that
    /// triggers the pause is redelivered after unpause, so no bytes are lost.
    pub(crate) fn request_pause(&mut self) {
        self.pause_requested = true;
    }

    pub(crate) fn clear_pause(&mut self) {
        self.pause_requested = false;
    }

    /// Fresh state for the next attempt; the handle identity is untouched.
    fn reset_attempt(&mut self) {
        self.response = HttpResponse::default();
        self.content_length = None;
        self.pause_requested = false;
    }
}

impl Handler for TransferHandler {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.pause_requested {
            return Err(WriteError::Pause);
        }
        if self.response.transfer_info.ttfb == 0.0 {
            self.response.transfer_info.ttfb = now_wall() - self.response.transfer_info.start_at;
        }
        if let Some(hint) = self.content_length {
            if hint > self.response.body.capacity() {
                self.response.body.reserve(hint - self.response.body.len());
            }
        }
        self.response.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn header(&mut self, data: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(data) else {
            return true;
        };
        let line = text.strip_suffix('\n').unwrap_or(text);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with("HTTP/") {
            return true;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.trim().parse::<usize>() {
                    self.content_length = Some(n);
                }
            }
        }
        self.response.headers.push(line.to_string());
        true
    }
}

/// Everything a `Transfer` carries besides the easy handle itself. The
/// scheduler splits a transfer into handle + parts while it is attached to
/// the multiplex.
pub(crate) struct TransferParts {
    pub(crate) request: HttpRequest,
    pub(crate) policy: RequestPolicy,
    pub(crate) settings: ClientSettings,
    pub(crate) token: u64,
}

/// One HTTP exchange bound to a transport handle. Move-only; the handle (and
/// with it the transfer's token identity) survives retry attempts via
/// [`Transfer::reset`].
pub struct Transfer {
    easy: Easy2<TransferHandler>,
    request: HttpRequest,
    policy: RequestPolicy,
    settings: ClientSettings,
    token: u64,
}

impl Transfer {
    /// Acquire a fresh transport handle and apply settings defaults, the
    /// non-zero policy overrides, and the method binding.
    pub fn new(
        request: HttpRequest,
        policy: RequestPolicy,
        settings: &ClientSettings,
    ) -> Result<Self, curl::Error> {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let mut transfer = Self {
            easy: Easy2::new(TransferHandler::new()),
            request,
            policy,
            settings: settings.clone(),
            token,
        };
        transfer.apply_options()?;
        Ok(transfer)
    }

    /// Opaque identity of the underlying handle, stable across retries.
    pub fn token(&self) -> u64 {
        self.token
    }

    fn apply_options(&mut self) -> Result<(), curl::Error> {
        self.settings.apply_easy_defaults(&mut self.easy)?;
        self.easy.url(&self.request.url)?;

        if !self.policy.timeout.is_zero() {
            self.easy.timeout(self.policy.timeout)?;
        }
        if !self.policy.connect_timeout.is_zero() {
            self.easy.connect_timeout(self.policy.connect_timeout)?;
        }
        if self.policy.low_speed_limit > 0 && !self.policy.low_speed_time.is_zero() {
            self.easy.low_speed_limit(self.policy.low_speed_limit)?;
            self.easy.low_speed_time(self.policy.low_speed_time)?;
        }
        if self.policy.send_speed_limit > 0 {
            self.easy.max_send_speed(self.policy.send_speed_limit)?;
        }
        if self.policy.recv_speed_limit > 0 {
            self.easy.max_recv_speed(self.policy.recv_speed_limit)?;
        }
        if self.policy.buffer_size > 0 {
            self.easy.buffer_size(self.policy.buffer_size.clamp(1024, MAX_BUFFER_SIZE))?;
        }

        if !self.request.headers.is_empty() {
            let mut list = List::new();
            for line in &self.request.headers {
                list.append(line)?;
            }
            self.easy.http_headers(list)?;
        }

        match &self.request.method {
            Method::Head => self.easy.nobody(true)?,
            Method::Get => self.easy.get(true)?,
            Method::Post => {
                self.easy.post(true)?;
                self.easy.post_fields_copy(&self.request.body)?;
            }
            other => {
                self.easy
                    .custom_request(&other.as_str().to_ascii_uppercase())?;
                if !self.request.body.is_empty() {
                    self.easy.post_fields_copy(&self.request.body)?;
                }
            }
        }
        Ok(())
    }

    /// Restore the handle to a just-constructed state between retry
    /// attempts. The accumulated response is discarded and all transport
    /// options are re-applied; the token identity is preserved.
    pub fn reset(&mut self) -> Result<(), curl::Error> {
        self.easy.get_mut().reset_attempt();
        self.apply_options()
    }

    /// Execute the exchange to completion on the calling thread, then
    /// finalize and return the response. Never returns partial progress.
    pub fn perform_blocking(&mut self) -> HttpResponse {
        let result = self.easy.perform();
        self.finalize(result.err().as_ref());
        self.take_response()
    }

    /// Snapshot status, error, and per-phase timings from the transport.
    /// Must run exactly once per attempt, after the transport reports the
    /// attempt terminal.
    pub(crate) fn finalize(&mut self, error: Option<&curl::Error>) {
        let status = self.easy.response_code().unwrap_or(0);
        let times = CumulativeTimes {
            namelookup: secs(self.easy.namelookup_time()),
            connect: secs(self.easy.connect_time()),
            appconnect: secs(self.easy.appconnect_time()),
            pretransfer: secs(self.easy.pretransfer_time()),
            starttransfer: secs(self.easy.starttransfer_time()),
            total: secs(self.easy.total_time()),
            redirect: secs(self.easy.redirect_time()),
        };

        let response = &mut self.easy.get_mut().response;
        match error {
            Some(e) => {
                response.status = 0;
                response.error = e.to_string();
            }
            None => response.status = status,
        }
        response.transfer_info.record_phases(&times);
        response.transfer_info.complete_at = now_wall();
    }

    pub fn response(&self) -> &HttpResponse {
        &self.easy.get_ref().response
    }

    /// Move the response out, leaving a fresh one behind.
    pub fn take_response(&mut self) -> HttpResponse {
        std::mem::take(&mut self.easy.get_mut().response)
    }

    /// Peak speeds the transport observed for the last attempt, bytes/s.
    pub(crate) fn speeds(&mut self) -> (f64, f64) {
        let up = self.easy.upload_speed().unwrap_or(0.0);
        let down = self.easy.download_speed().unwrap_or(0.0);
        (up, down)
    }

    pub(crate) fn into_parts(self) -> (Easy2<TransferHandler>, TransferParts) {
        (
            self.easy,
            TransferParts {
                request: self.request,
                policy: self.policy,
                settings: self.settings,
                token: self.token,
            },
        )
    }

    pub(crate) fn from_parts(easy: Easy2<TransferHandler>, parts: TransferParts) -> Self {
        Self {
            easy,
            request: parts.request,
            policy: parts.policy,
            settings: parts.settings,
            token: parts.token,
        }
    }
}

fn secs(time: Result<std::time::Duration, curl::Error>) -> f64 {
    time.map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> TransferHandler {
        TransferHandler::new()
    }

    #[test]
    fn header_lines_are_trimmed_and_stored_raw() {
        let mut h = handler();
        assert!(h.header(b"HTTP/1.1 200 OK\r\n"));
        assert!(h.header(b"Content-Type: text/plain\r\n"));
        assert!(h.header(b"X-Raw: keep  spacing\n"));
        assert!(h.header(b"\r\n"));
        assert_eq!(
            h.response.headers,
            vec!["Content-Type: text/plain", "X-Raw: keep  spacing"]
        );
    }

    #[test]
    fn duplicate_headers_are_preserved_in_order() {
        let mut h = handler();
        h.header(b"Set-Cookie: a=1\r\n");
        h.header(b"Set-Cookie: b=2\r\n");
        assert_eq!(h.response.headers, vec!["Set-Cookie: a=1", "Set-Cookie: b=2"]);
    }

    #[test]
    fn content_length_parsed_case_insensitively() {
        let mut h = handler();
        h.header(b"content-LENGTH:  4096\r\n");
        assert_eq!(h.content_length, Some(4096));
        // garbage values leave the hint untouched
        h.header(b"Content-Length: many\r\n");
        assert_eq!(h.content_length, Some(4096));
    }

    #[test]
    fn write_appends_and_reserves_to_hint() {
        let mut h = handler();
        h.header(b"Content-Length: 1024\r\n");
        let n = h.write(b"abcd").unwrap();
        assert_eq!(n, 4);
        assert_eq!(h.response.body, b"abcd");
        assert!(h.response.body.capacity() >= 1024);
        assert!(h.response.transfer_info.ttfb > 0.0, "first write stamps ttfb");
    }

    #[test]
    fn requested_pause_surfaces_on_next_write() {
        let mut h = handler();
        h.write(b"one").unwrap();
        h.request_pause();
        assert!(matches!(h.write(b"two"), Err(WriteError::Pause)));
        h.clear_pause();
        h.write(b"two").unwrap();
        assert_eq!(h.response.body, b"onetwo");
    }

    #[test]
    fn reset_attempt_clears_accumulated_state() {
        let mut h = handler();
        h.header(b"Content-Length: 10\r\n");
        h.write(b"partial").unwrap();
        h.request_pause();
        h.reset_attempt();
        assert!(h.response.body.is_empty());
        assert!(h.response.headers.is_empty());
        assert_eq!(h.content_length, None);
        h.write(b"fresh").unwrap();
        assert_eq!(h.response.body, b"fresh");
    }

    #[test]
    fn transfers_get_distinct_tokens() {
        let settings = ClientSettings::default();
        let a = Transfer::new(
            HttpRequest::get("http://localhost/"),
            RequestPolicy::default(),
            &settings,
        )
        .unwrap();
        let b = Transfer::new(
            HttpRequest::get("http://localhost/"),
            RequestPolicy::default(),
            &settings,
        )
        .unwrap();
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn reset_preserves_token_identity() {
        let settings = ClientSettings::default();
        let mut t = Transfer::new(
            HttpRequest::get("http://localhost/"),
            RequestPolicy::default(),
            &settings,
        )
        .unwrap();
        let token = t.token();
        t.reset().unwrap();
        assert_eq!(t.token(), token);
    }
}
