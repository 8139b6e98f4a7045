//! Scheduler-side bundle for one submission: the transfer, its state
//! handle, the responder for its future, and the optional retry block.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::client::state::TransferState;
use crate::client::TaskResult;
use crate::retry::{RetryContext, RetryPolicy};
use crate::transfer::Transfer;

/// Retry bookkeeping attached at submission. Mutated only by the worker.
pub(crate) struct RetryState {
    pub(crate) policy: RetryPolicy,
    pub(crate) context: RetryContext,
}

/// One submission travelling through the scheduler. Exclusively owned by
/// whichever queue or map currently holds it.
pub(crate) struct TransferTask {
    pub(crate) transfer: Transfer,
    pub(crate) state: Arc<TransferState>,
    pub(crate) responder: oneshot::Sender<TaskResult>,
    pub(crate) retry: Option<RetryState>,
}
