//! The client: submit-and-await over a single multiplexed worker thread.
//!
//! `HttpClient` spawns one worker that owns the transport multiplex and
//! drives every in-flight transfer. Producers on any thread submit requests
//! through a bounded queue and get back a [`TransferState`] carrying the
//! response future and the pause/resume/cancel triggers.

pub mod state;
mod task;
mod worker;

pub use state::{State, TransferState};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use curl::multi::MultiWaker;
use tokio::sync::oneshot;

use crate::config::ClientSettings;
use crate::error::ClientError;
use crate::request::{HttpRequest, RequestPolicy};
use crate::response::HttpResponse;
use crate::retry::{RetryContext, RetryPolicy};
use crate::transfer::Transfer;
use crate::util::{jitter, now_wall, BoundedSemaphore, SlidingWindow};

use task::{RetryState, TransferTask};

pub(crate) type TaskResult = Result<HttpResponse, ClientError>;

#[derive(Default)]
pub(crate) struct SharedQueues {
    pub(crate) submit: VecDeque<TransferTask>,
    pub(crate) events: VecDeque<u64>,
}

pub(crate) struct SpeedWindows {
    pub(crate) up: SlidingWindow,
    pub(crate) down: SlidingWindow,
}

/// State shared between producer threads, state handles, and the worker.
/// The queue mutex is held only for splice-length operations; the worker
/// never takes it while touching the multiplex.
pub(crate) struct Shared {
    pub(crate) queues: Mutex<SharedQueues>,
    pub(crate) stop: AtomicBool,
    pub(crate) budget: BoundedSemaphore,
    pub(crate) waker: OnceLock<MultiWaker>,
    pub(crate) speeds: Mutex<SpeedWindows>,
    pub(crate) settings: ClientSettings,
}

impl Shared {
    pub(crate) fn new(settings: ClientSettings) -> Self {
        let permits = settings.max_connections.max(1);
        let window = settings.speed_window_size;
        Self {
            queues: Mutex::new(SharedQueues::default()),
            stop: AtomicBool::new(false),
            budget: BoundedSemaphore::new(permits, permits),
            waker: OnceLock::new(),
            speeds: Mutex::new(SpeedWindows {
                up: SlidingWindow::new(window),
                down: SlidingWindow::new(window),
            }),
            settings,
        }
    }

    /// Queue a control event for `token` and interrupt the worker's poll.
    pub(crate) fn push_event(&self, token: u64) {
        self.queues.lock().unwrap().events.push_back(token);
        self.wakeup();
    }

    pub(crate) fn wakeup(&self) {
        if let Some(waker) = self.waker.get() {
            let _ = waker.wakeup();
        }
    }
}

/// Asynchronous HTTP client driving many concurrent transfers on one worker
/// thread. Cheap to share behind an `Arc`; dropping it stops the worker and
/// fails any transfers still in flight.
pub struct HttpClient {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl HttpClient {
    pub fn new() -> Result<Self, ClientError> {
        Self::with_settings(ClientSettings::default())
    }

    pub fn with_settings(settings: ClientSettings) -> Result<Self, ClientError> {
        let shared = Arc::new(Shared::new(settings));
        let (waker_tx, waker_rx) = oneshot::channel();
        let worker = thread::Builder::new()
            .name("httpmux-worker".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker::run(shared, waker_tx)
            })
            .map_err(|e| ClientError::Transport(format!("spawning worker failed: {}", e)))?;
        // The worker creates the multiplex on its own thread and hands back
        // the one piece producers need: the wakeup primitive.
        let waker = waker_rx
            .blocking_recv()
            .map_err(|_| ClientError::Stopped)?;
        let _ = shared.waker.set(waker);
        tracing::info!(
            max_connections = shared.settings.max_connections,
            "http client started"
        );
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.shared.settings
    }

    /// Submit and block until the transfer resolves.
    pub fn request(
        &self,
        request: HttpRequest,
        policy: RequestPolicy,
    ) -> Result<HttpResponse, ClientError> {
        self.send_request(request, policy)?.wait()
    }

    /// Submit and return the transfer's state handle.
    pub fn send_request(
        &self,
        request: HttpRequest,
        policy: RequestPolicy,
    ) -> Result<Arc<TransferState>, ClientError> {
        self.submit(request, policy, None)
    }

    /// Submit with a retry policy and block until the final attempt resolves.
    pub fn request_with_retry(
        &self,
        request: HttpRequest,
        policy: RequestPolicy,
        retry: RetryPolicy,
    ) -> Result<HttpResponse, ClientError> {
        self.send_request_with_retry(request, policy, retry)?.wait()
    }

    /// Submit with a retry policy and return the transfer's state handle.
    pub fn send_request_with_retry(
        &self,
        request: HttpRequest,
        policy: RequestPolicy,
        retry: RetryPolicy,
    ) -> Result<Arc<TransferState>, ClientError> {
        self.submit(request, policy, Some(retry))
    }

    fn submit(
        &self,
        request: HttpRequest,
        policy: RequestPolicy,
        retry: Option<RetryPolicy>,
    ) -> Result<Arc<TransferState>, ClientError> {
        let transfer = Transfer::new(request, policy, &self.shared.settings)?;
        let token = transfer.token();
        let (responder, receiver) = oneshot::channel();
        let state = Arc::new(TransferState::new(
            token,
            Arc::clone(&self.shared),
            receiver,
            retry.is_some(),
        ));
        let retry = retry.map(|policy| RetryState {
            policy,
            context: RetryContext {
                first_attempt_at: now_wall(),
                attempts: Vec::new(),
            },
        });
        let task = TransferTask {
            transfer,
            state: Arc::clone(&state),
            responder,
            retry,
        };

        // Backpressure: a permit per in-flight transfer, then a few ms of
        // smoothing so a burst of producers does not land on one poll cycle.
        self.shared.budget.acquire();
        let smoothing = jitter(0.010).abs();
        if smoothing > 0.0 {
            thread::sleep(Duration::from_secs_f64(smoothing));
        }

        {
            let mut queues = self.shared.queues.lock().unwrap();
            if self.shared.stop.load(Ordering::Acquire) {
                self.shared.budget.release();
                return Err(ClientError::Stopped);
            }
            queues.submit.push_back(task);
        }
        self.shared.wakeup();
        tracing::debug!(token, "transfer submitted");
        Ok(state)
    }

    /// Stop the worker. Every outstanding transfer fails with
    /// [`ClientError::Stopped`]; later submissions are rejected.
    pub fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            tracing::info!("stop requested");
            self.shared.wakeup();
        }
    }

    /// Mean download speed over the last completed transfers, bytes/s.
    pub fn downlink_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().down.mean()
    }

    /// Mean upload speed over the last completed transfers, bytes/s.
    pub fn uplink_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().up.mean()
    }

    /// Fastest download observed in the window, bytes/s.
    pub fn peak_downlink_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().down.max()
    }

    /// Fastest upload observed in the window, bytes/s.
    pub fn peak_uplink_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().up.max()
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
