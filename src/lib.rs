//! Multiplexed HTTP client engine over libcurl.
//!
//! One worker thread owns a curl multi handle and drives every in-flight
//! transfer; callers submit requests from any thread and await per-transfer
//! futures, with cooperative pause/resume/cancel and a pluggable retry
//! policy scheduled on absolute wall-clock deadlines.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod request;
pub mod response;
pub mod retry;
pub mod transfer;
pub mod util;

pub use client::{HttpClient, State, TransferState};
pub use config::ClientSettings;
pub use error::ClientError;
pub use request::{HttpRequest, Method, RequestPolicy};
pub use response::{HttpResponse, TransferInfo};
pub use retry::{AttemptRecord, RetryContext, RetryPolicy};
pub use transfer::Transfer;
