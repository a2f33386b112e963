//! FIFO of job ids shared by the worker pool.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::models::JobId;

#[derive(Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<JobId>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries come back through here too, behind everything already queued.
    pub fn push_back(&self, job_id: JobId) {
        self.items.lock().push_back(job_id);
        self.notify.notify_one();
    }

    /// Next job id, or `None` once `shutdown` fires.
    pub async fn pop(&self, shutdown: &CancellationToken) -> Option<JobId> {
        loop {
            {
                let mut items = self.items.lock();
                if let Some(job_id) = items.pop_front() {
                    if !items.is_empty() {
                        // Hand the remaining work to another idle worker.
                        self.notify.notify_one();
                    }
                    return Some(job_id);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.cancelled() => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
