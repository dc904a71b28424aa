use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

use shared::operation::Operation;

/// Pending-operation queue shared between the foreground and the single
/// dispatch worker.
///
/// New work goes in at the front; the worker consumes from the back, so the
/// oldest surviving operation always runs next. An interrupted-but-unfinished
/// operation is requeued at the back, the position it would occupy had it
/// never been popped.
#[derive(Debug, Default)]
pub struct OperationQueue {
    items: Mutex<VecDeque<Operation>>,
    notify: Notify,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Operation>> {
        // A poisoned queue still holds valid operations; keep serving them.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a newly-submitted operation and wakes the worker.
    pub fn push_front(&self, op: Operation) {
        self.items().push_front(op);
        self.notify.notify_one();
    }

    /// Removes and returns the oldest surviving operation. Non-blocking.
    pub fn pop_back(&self) -> Option<Operation> {
        self.items().pop_back()
    }

    /// Re-inserts an operation that was popped but not completed. It will
    /// retry after the currently-pending items rather than starve them.
    pub fn requeue(&self, op: Operation) {
        self.items().push_back(op);
        self.notify.notify_one();
    }

    /// Empties the queue, returning the remaining operations in pop order.
    /// Shutdown persistence only.
    pub fn drain(&self) -> Vec<Operation> {
        let mut items = self.items();
        let mut drained = Vec::with_capacity(items.len());
        while let Some(op) = items.pop_back() {
            drained.push(op);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Parks the worker until a push lands or `poll` elapses, whichever is
    /// first. The bounded wait keeps an undelivered wake-up from stalling
    /// the loop for longer than the polling interval.
    pub(crate) async fn idle_wait(&self, poll: Duration) {
        let _ = timeout(poll, self.notify.notified()).await;
    }
}
