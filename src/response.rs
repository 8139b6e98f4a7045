//! Response model and per-phase transfer timings.

use crate::util::now_wall;

/// Timing record for one attempt, in seconds.
///
/// Phase fields are deltas, not cumulative: they are derived by differencing
/// the transport's cumulative counters, so summing the phases recovers the
/// total within rounding.
#[derive(Debug, Clone)]
pub struct TransferInfo {
    /// Wall time at which the attempt started.
    pub start_at: f64,
    /// Name resolution.
    pub dns: f64,
    /// TCP connect.
    pub connect: f64,
    /// TLS handshake; 0 for plaintext.
    pub tls: f64,
    /// From handshake done to the request being ready to send.
    pub pre_transfer: f64,
    /// From start to the first body byte observed by the body callback.
    pub ttfb: f64,
    /// From request ready to the first byte the transport saw.
    pub start_transfer: f64,
    /// Body receive time.
    pub receive: f64,
    /// Whole attempt as reported by the transport.
    pub total: f64,
    /// Time spent following redirects.
    pub redirect: f64,
    /// Wall time at which the attempt finished.
    pub complete_at: f64,
}

impl Default for TransferInfo {
    fn default() -> Self {
        Self {
            start_at: now_wall(),
            dns: 0.0,
            connect: 0.0,
            tls: 0.0,
            pre_transfer: 0.0,
            ttfb: 0.0,
            start_transfer: 0.0,
            receive: 0.0,
            total: 0.0,
            redirect: 0.0,
            complete_at: 0.0,
        }
    }
}

/// Cumulative transport counters, each measured from request creation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CumulativeTimes {
    pub namelookup: f64,
    pub connect: f64,
    pub appconnect: f64,
    pub pretransfer: f64,
    pub starttransfer: f64,
    pub total: f64,
    pub redirect: f64,
}

impl TransferInfo {
    /// Convert cumulative counters into per-phase deltas.
    pub(crate) fn record_phases(&mut self, t: &CumulativeTimes) {
        // appconnect stays 0 for plaintext transfers
        let appconnect = if t.appconnect > 0.0 { t.appconnect } else { t.connect };
        self.dns = t.namelookup;
        self.connect = (t.connect - t.namelookup).max(0.0);
        self.tls = (appconnect - t.connect).max(0.0);
        self.pre_transfer = (t.pretransfer - appconnect).max(0.0);
        self.start_transfer = (t.starttransfer - t.pretransfer).max(0.0);
        self.receive = (t.total - t.starttransfer).max(0.0);
        self.total = t.total;
        self.redirect = t.redirect;
    }
}

/// Outcome of one HTTP exchange.
///
/// A transport-level failure is still a response: `status` is 0 and `error`
/// holds the transport's description. `error` is empty iff the exchange
/// reached a terminal HTTP status (which may itself be 4xx/5xx).
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u32,
    /// Raw `Name: value` lines in arrival order; status lines and blank
    /// separators are stripped.
    pub headers: Vec<String>,
    pub body: Vec<u8>,
    pub error: String,
    pub transfer_info: TransferInfo,
}

impl HttpResponse {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (n, v) = line.split_once(':')?;
            if n.trim().eq_ignore_ascii_case(name) {
                Some(v.trim())
            } else {
                None
            }
        })
    }
}
