//! The scheduler worker: one thread, one multiplex handle, every epoch in a
//! fixed order: drive I/O, harvest completions, service due retries, poll,
//! then apply control events and admit new submissions.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use curl::multi::{Easy2Handle, Multi, MultiWaker};
use tokio::sync::oneshot;

use crate::client::state::{State, TransferState};
use crate::client::task::{RetryState, TransferTask};
use crate::client::{Shared, TaskResult};
use crate::error::ClientError;
use crate::transfer::{Transfer, TransferHandler, TransferParts};
use crate::util::now_wall;

/// A transfer attached to the multiplex. The easy handle lives inside the
/// multi; the rest of the transfer rides alongside until detach reassembles
/// them. A token is in this map iff its handle is in the multiplex.
struct ActiveTask {
    handle: Easy2Handle<TransferHandler>,
    parts: TransferParts,
    state: Arc<TransferState>,
    responder: oneshot::Sender<TaskResult>,
    retry: Option<RetryState>,
}

/// Heap entry ordered by absolute due time, earliest first; ties resolve in
/// scheduling order.
struct RetryEntry {
    retry_at: f64,
    seq: u64,
    task: TransferTask,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.retry_at == other.retry_at && self.seq == other.seq
    }
}

impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    // BinaryHeap is a max-heap; invert so the earliest deadline surfaces.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .retry_at
            .total_cmp(&self.retry_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum EventOutcome {
    Handled,
    /// A resume found no free permit; keep the event for a later epoch.
    Deferred,
}

pub(crate) fn run(shared: Arc<Shared>, waker_tx: oneshot::Sender<MultiWaker>) {
    let mut multi = Multi::new();
    if let Err(e) = shared.settings.apply_multi_defaults(&mut multi) {
        tracing::warn!("applying multiplex defaults failed: {}", e);
    }
    if waker_tx.send(multi.waker()).is_err() {
        return;
    }

    let mut active: HashMap<u64, ActiveTask> = HashMap::new();
    let mut retry_queue: BinaryHeap<RetryEntry> = BinaryHeap::new();
    let mut retry_seq: u64 = 0;
    let poll_interval = Duration::from_millis(shared.settings.poll_interval_ms.max(1));

    loop {
        if let Err(e) = multi.perform() {
            tracing::warn!("multiplex perform failed: {}", e);
        }

        // Harvest completions. messages() borrows the handles, so collect
        // first and detach after.
        let mut completed: Vec<(u64, Option<curl::Error>)> = Vec::new();
        multi.messages(|message| {
            for (token, entry) in active.iter() {
                if let Some(result) = message.result_for2(&entry.handle) {
                    completed.push((*token, result.err()));
                    break;
                }
            }
        });
        for (token, error) in completed {
            handle_completion(
                &shared,
                &multi,
                &mut active,
                &mut retry_queue,
                &mut retry_seq,
                token,
                error,
            );
        }

        // Poll budget: the multiplex's own deadline hint, capped by ours.
        let mut timeout = match multi.get_timeout() {
            Ok(Some(hint)) => hint.min(poll_interval),
            _ => poll_interval,
        };

        // Re-admit due retries while permits allow; otherwise make sure the
        // poll wakes in time for the earliest deadline.
        let now = now_wall();
        while let Some(head) = retry_queue.peek() {
            if head.retry_at <= now {
                if !shared.budget.try_acquire() {
                    break;
                }
                if let Some(entry) = retry_queue.pop() {
                    resubmit(&shared, entry.task);
                }
            } else {
                let wait = Duration::from_secs_f64((head.retry_at - now).max(0.0));
                timeout = timeout.min(wait);
                break;
            }
        }

        if let Err(e) = multi.poll(&mut [], timeout) {
            tracing::warn!("multiplex poll failed: {}", e);
        }

        if shared.stop.load(Ordering::Acquire) {
            shutdown(&shared, &multi, active, retry_queue);
            return;
        }

        // Control events, spliced out wholesale; the queue mutex is never
        // held while touching the multiplex.
        let mut events: VecDeque<u64> = {
            let mut queues = shared.queues.lock().unwrap();
            std::mem::take(&mut queues.events)
        };
        while let Some(token) = events.pop_front() {
            match dispatch_event(&shared, &multi, &mut active, token) {
                EventOutcome::Handled => {}
                EventOutcome::Deferred => {
                    let mut queues = shared.queues.lock().unwrap();
                    for pending in events.drain(..).rev() {
                        queues.events.push_front(pending);
                    }
                    queues.events.push_front(token);
                    break;
                }
            }
        }

        // New submissions.
        let submissions: Vec<TransferTask> = {
            let mut queues = shared.queues.lock().unwrap();
            queues.submit.drain(..).collect()
        };
        for task in submissions {
            admit(&shared, &multi, &mut active, task);
        }
    }
}

fn admit(
    shared: &Shared,
    multi: &Multi,
    active: &mut HashMap<u64, ActiveTask>,
    task: TransferTask,
) {
    let TransferTask {
        transfer,
        state,
        responder,
        retry,
    } = task;
    let token = transfer.token();
    let (easy, parts) = transfer.into_parts();
    match multi.add2(easy) {
        Ok(handle) => {
            tracing::debug!(token, "transfer attached to multiplex");
            active.insert(
                token,
                ActiveTask {
                    handle,
                    parts,
                    state,
                    responder,
                    retry,
                },
            );
        }
        Err(e) => {
            tracing::error!(token, "attach to multiplex failed: {}", e);
            shared.budget.release();
            state.set_state(State::Failed);
            let _ = responder.send(Err(ClientError::Transport(e.to_string())));
        }
    }
}

fn handle_completion(
    shared: &Shared,
    multi: &Multi,
    active: &mut HashMap<u64, ActiveTask>,
    retry_queue: &mut BinaryHeap<RetryEntry>,
    retry_seq: &mut u64,
    token: u64,
    error: Option<curl::Error>,
) {
    let Some(entry) = active.remove(&token) else {
        debug_assert!(false, "completion for a token absent from the active map");
        return;
    };
    let ActiveTask {
        handle,
        parts,
        state,
        responder,
        retry,
    } = entry;

    let easy = match multi.remove2(handle) {
        Ok(easy) => easy,
        Err(e) => {
            tracing::error!(token, "detach on completion failed: {}", e);
            shared.budget.release();
            state.set_state(State::Failed);
            let _ = responder.send(Err(ClientError::Transport(e.to_string())));
            return;
        }
    };
    shared.budget.release();

    let mut transfer = Transfer::from_parts(easy, parts);
    let (up, down) = transfer.speeds();
    {
        let mut speeds = shared.speeds.lock().unwrap();
        speeds.up.push(up);
        speeds.down.push(down);
    }

    transfer.finalize(error.as_ref());
    let response = transfer.take_response();
    state.bump_attempt();

    let Some(mut retry) = retry else {
        tracing::debug!(token, status = response.status, "transfer completed");
        state.set_state(State::Completed);
        let _ = responder.send(Ok(response));
        return;
    };

    let now = now_wall();
    retry.context.attempts.push(crate::retry::AttemptRecord {
        response: response.clone(),
        error,
        complete_at: now,
    });

    let retries_done = retry.context.attempt_count().saturating_sub(1);
    let within_budget = retries_done < retry.policy.max_retries;
    let within_deadline = retry.policy.total_timeout <= 0.0
        || (now - retry.context.first_attempt_at) < retry.policy.total_timeout;
    let wants_retry =
        within_budget && within_deadline && (retry.policy.should_retry)(&retry.context);

    if wants_retry {
        let retry_at = (retry.policy.next_retry_time)(&retry.context);
        tracing::debug!(
            token,
            attempt = retry.context.attempt_count(),
            retry_at,
            "scheduling retry"
        );
        *retry_seq += 1;
        retry_queue.push(RetryEntry {
            retry_at,
            seq: *retry_seq,
            task: TransferTask {
                transfer,
                state,
                responder,
                retry: Some(retry),
            },
        });
    } else {
        tracing::debug!(
            token,
            status = response.status,
            attempts = retry.context.attempt_count(),
            "transfer completed after retries"
        );
        state.set_state(State::Completed);
        let _ = responder.send(Ok(response));
    }
}

/// A due retry re-enters through the submit queue with a reset transfer; its
/// permit was taken by the caller of this function.
fn resubmit(shared: &Shared, mut task: TransferTask) {
    let token = task.transfer.token();
    match task.transfer.reset() {
        Ok(()) => {
            tracing::debug!(token, "retry due, resubmitting");
            shared.queues.lock().unwrap().submit.push_back(task);
        }
        Err(e) => {
            tracing::error!(token, "reset before retry failed: {}", e);
            shared.budget.release();
            task.state.set_state(State::Failed);
            let _ = task
                .responder
                .send(Err(ClientError::Transport(e.to_string())));
        }
    }
}

/// Dispatch one control event on the state currently observed, not on the
/// order events were queued; a transfer no longer in the active map has
/// already reached a terminal state and the event is discarded.
fn dispatch_event(
    shared: &Shared,
    multi: &Multi,
    active: &mut HashMap<u64, ActiveTask>,
    token: u64,
) -> EventOutcome {
    let current = match active.get(&token) {
        Some(entry) => entry.state.state(),
        None => {
            tracing::debug!(token, "event for a departed transfer, dropping");
            return EventOutcome::Handled;
        }
    };
    match current {
        State::Cancel => {
            handle_cancel(shared, multi, active, token);
            EventOutcome::Handled
        }
        State::Pause => {
            handle_pause(shared, active, token);
            EventOutcome::Handled
        }
        State::Resume => handle_resume(shared, active, token),
        _ => EventOutcome::Handled,
    }
}

fn handle_cancel(
    shared: &Shared,
    multi: &Multi,
    active: &mut HashMap<u64, ActiveTask>,
    token: u64,
) {
    let Some(entry) = active.remove(&token) else {
        return;
    };
    if let Err(e) = multi.remove2(entry.handle) {
        tracing::warn!(token, "detach on cancel failed: {}", e);
    }
    shared.budget.release();
    let _ = entry.responder.send(Err(ClientError::Cancelled));
    tracing::debug!(token, "transfer cancelled");
}

fn handle_pause(shared: &Shared, active: &mut HashMap<u64, ActiveTask>, token: u64) {
    let Some(entry) = active.get_mut(&token) else {
        return;
    };
    entry.handle.get_mut().request_pause();
    entry.state.set_state(State::Paused);
    // Paused transfers do not count against the active cap.
    shared.budget.release();
    tracing::debug!(token, "transfer paused");
}

fn handle_resume(
    shared: &Shared,
    active: &mut HashMap<u64, ActiveTask>,
    token: u64,
) -> EventOutcome {
    let Some(entry) = active.get_mut(&token) else {
        return EventOutcome::Handled;
    };
    if !shared.budget.try_acquire() {
        tracing::debug!(token, "no permit for resume, deferring");
        return EventOutcome::Deferred;
    }
    entry.handle.get_mut().clear_pause();
    if let Err(e) = entry.handle.unpause_read() {
        tracing::warn!(token, "unpause read failed: {}", e);
    }
    if let Err(e) = entry.handle.unpause_write() {
        tracing::warn!(token, "unpause write failed: {}", e);
    }
    entry.state.set_state(State::Ongoing);
    tracing::debug!(token, "transfer resumed");
    EventOutcome::Handled
}

/// Fail every outstanding future (active, retrying, and still queued), then
/// let the thread exit. Permits are topped up so producers blocked on the
/// budget can observe the stop flag and bail out.
fn shutdown(
    shared: &Shared,
    multi: &Multi,
    active: HashMap<u64, ActiveTask>,
    retry_queue: BinaryHeap<RetryEntry>,
) {
    tracing::info!(
        active = active.len(),
        retrying = retry_queue.len(),
        "client stopping, failing outstanding transfers"
    );
    for (token, entry) in active {
        if let Err(e) = multi.remove2(entry.handle) {
            tracing::warn!(token, "detach on stop failed: {}", e);
        }
        entry.state.set_state(State::Failed);
        let _ = entry.responder.send(Err(ClientError::Stopped));
    }
    for entry in retry_queue {
        entry.task.state.set_state(State::Failed);
        let _ = entry.task.responder.send(Err(ClientError::Stopped));
    }
    let leftover: Vec<TransferTask> = {
        let mut queues = shared.queues.lock().unwrap();
        queues.events.clear();
        queues.submit.drain(..).collect()
    };
    for task in leftover {
        task.state.set_state(State::Failed);
        let _ = task.responder.send(Err(ClientError::Stopped));
    }
    for _ in 0..shared.settings.max_connections {
        shared.budget.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use crate::request::{HttpRequest, RequestPolicy};

    fn entry(retry_at: f64, seq: u64) -> RetryEntry {
        let shared = Arc::new(Shared::new(ClientSettings::default()));
        let transfer = Transfer::new(
            HttpRequest::get("http://localhost/"),
            RequestPolicy::default(),
            &shared.settings,
        )
        .unwrap();
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(TransferState::new(transfer.token(), shared, rx, false));
        RetryEntry {
            retry_at,
            seq,
            task: TransferTask {
                transfer,
                state,
                responder: tx,
                retry: None,
            },
        }
    }

    #[test]
    fn retry_heap_pops_earliest_deadline_first() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(30.0, 1));
        heap.push(entry(10.0, 2));
        heap.push(entry(20.0, 3));
        let order: Vec<f64> = std::iter::from_fn(|| heap.pop().map(|e| e.retry_at)).collect();
        assert_eq!(order, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn retry_heap_breaks_ties_in_scheduling_order() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(5.0, 9));
        heap.push(entry(5.0, 3));
        heap.push(entry(5.0, 6));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![3, 6, 9]);
    }
}
