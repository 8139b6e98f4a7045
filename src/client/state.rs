//! Caller-facing handle for one in-flight transfer: its eventual response,
//! its lifecycle state, and the pause/resume/cancel triggers.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::oneshot;

use crate::client::{Shared, TaskResult};
use crate::error::ClientError;
use crate::response::HttpResponse;

/// Lifecycle of a submitted transfer.
///
/// `Pause` and `Resume` are requests the worker has not observed yet;
/// `Paused` and `Ongoing` are the settled states. `Completed`, `Failed`, and
/// `Cancel` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Pending = 0,
    Ongoing = 1,
    Completed = 2,
    Pause = 3,
    Paused = 4,
    Resume = 5,
    Failed = 6,
    Cancel = 7,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Pending,
            1 => State::Ongoing,
            2 => State::Completed,
            3 => State::Pause,
            4 => State::Paused,
            5 => State::Resume,
            6 => State::Failed,
            _ => State::Cancel,
        }
    }
}

/// Shared between the submitting caller and the scheduler worker. Control
/// operations commit a state transition first and then queue an event keyed
/// on the transfer's token; the worker dispatches on whatever state it
/// observes, so stale or duplicate events are harmless.
pub struct TransferState {
    state: AtomicU8,
    token: u64,
    shared: Arc<Shared>,
    receiver: Mutex<Option<oneshot::Receiver<TaskResult>>>,
    outcome: OnceLock<TaskResult>,
    has_retry: bool,
    attempts: AtomicU32,
}

impl TransferState {
    pub(crate) fn new(
        token: u64,
        shared: Arc<Shared>,
        receiver: oneshot::Receiver<TaskResult>,
        has_retry: bool,
    ) -> Self {
        Self {
            state: AtomicU8::new(State::Ongoing as u8),
            token,
            shared,
            receiver: Mutex::new(Some(receiver)),
            outcome: OnceLock::new(),
            has_retry,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancel the transfer. Idempotent, and overrides any pending pause or
    /// resume; the future fails with [`ClientError::Cancelled`] once the
    /// worker processes the event.
    pub fn cancel(&self) {
        self.state.store(State::Cancel as u8, Ordering::Release);
        self.shared.push_event(self.token);
    }

    /// Request a pause. Silently ignored unless the transfer is `Ongoing`.
    pub fn pause(&self) {
        if self
            .state
            .compare_exchange(
                State::Ongoing as u8,
                State::Pause as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.shared.push_event(self.token);
        }
    }

    /// Request a resume. Silently ignored unless the transfer is `Paused`.
    pub fn resume(&self) {
        if self
            .state
            .compare_exchange(
                State::Paused as u8,
                State::Resume as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.shared.push_event(self.token);
        }
    }

    /// Block until the transfer resolves. The outcome is cached, so any
    /// number of callers may wait and each gets the same result.
    pub fn wait(&self) -> Result<HttpResponse, ClientError> {
        if let Some(result) = self.outcome.get() {
            return result.clone();
        }
        // First waiter receives under the lock; later waiters queue on the
        // lock and then read the cached outcome.
        let mut receiver = self.receiver.lock().unwrap();
        if self.outcome.get().is_none() {
            if let Some(rx) = receiver.take() {
                let result = rx.blocking_recv().unwrap_or(Err(ClientError::Stopped));
                let _ = self.outcome.set(result);
            }
        }
        drop(receiver);
        self.outcome.get().cloned().unwrap_or(Err(ClientError::Stopped))
    }

    /// Whether a retry policy was attached at submission.
    pub fn has_retry(&self) -> bool {
        self.has_retry
    }

    /// Physical attempts completed so far.
    pub fn attempt(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn bump_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;

    fn state_handle() -> (Arc<TransferState>, oneshot::Sender<TaskResult>) {
        let shared = Arc::new(Shared::new(ClientSettings::default()));
        let (tx, rx) = oneshot::channel();
        (Arc::new(TransferState::new(7, shared, rx, false)), tx)
    }

    #[test]
    fn initial_state_is_ongoing() {
        let (state, _tx) = state_handle();
        assert_eq!(state.state(), State::Ongoing);
        assert!(!state.has_retry());
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn pause_only_from_ongoing() {
        let (state, _tx) = state_handle();
        state.pause();
        assert_eq!(state.state(), State::Pause);
        // second pause request is a silent no-op
        state.pause();
        assert_eq!(state.state(), State::Pause);
    }

    #[test]
    fn resume_only_from_paused() {
        let (state, _tx) = state_handle();
        state.resume();
        assert_eq!(state.state(), State::Ongoing, "resume while ongoing ignored");
        state.set_state(State::Paused);
        state.resume();
        assert_eq!(state.state(), State::Resume);
    }

    #[test]
    fn cancel_overrides_and_is_idempotent() {
        let (state, _tx) = state_handle();
        state.pause();
        state.cancel();
        assert_eq!(state.state(), State::Cancel);
        state.cancel();
        assert_eq!(state.state(), State::Cancel);
        state.resume();
        assert_eq!(state.state(), State::Cancel, "no transition out of cancel");
    }

    #[test]
    fn wait_returns_cached_outcome_repeatedly() {
        let (state, tx) = state_handle();
        tx.send(Ok(HttpResponse {
            status: 204,
            ..Default::default()
        }))
        .ok();
        assert_eq!(state.wait().unwrap().status, 204);
        assert_eq!(state.wait().unwrap().status, 204);
    }

    #[test]
    fn wait_maps_dropped_responder_to_stopped() {
        let (state, tx) = state_handle();
        drop(tx);
        assert!(matches!(state.wait(), Err(ClientError::Stopped)));
    }
}
