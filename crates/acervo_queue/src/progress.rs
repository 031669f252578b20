//! Push-mode job observation.
//!
//! One `watch` channel per active job: the newest snapshot supersedes any
//! unread one (coalescing), delivery is at-least-once, and subscribers that
//! reconnect reconcile by reading the current value. Channels are removed
//! once a job reaches a terminal state and its last snapshot was published.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use acervo_protocol::{Job, JobId};
use tokio::sync::watch;

#[derive(Clone, Default)]
pub struct ProgressRegistry {
    inner: Arc<Mutex<HashMap<i64, watch::Sender<Job>>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot, creating the channel on first sight of the job.
    pub fn publish(&self, job: Job) {
        let mut map = self.inner.lock().expect("registry lock");
        match map.get(&job.id.as_i64()) {
            Some(sender) => {
                // send_replace updates the value even with no subscribers
                sender.send_replace(job);
            }
            None => {
                let (sender, _) = watch::channel(job.clone());
                map.insert(job.id.as_i64(), sender);
            }
        }
    }

    /// Subscribe to a job's snapshots. None when the job is not active.
    pub fn subscribe(&self, id: JobId) -> Option<watch::Receiver<Job>> {
        self.inner
            .lock()
            .expect("registry lock")
            .get(&id.as_i64())
            .map(|sender| sender.subscribe())
    }

    /// Publish the final snapshot and drop the channel. Subscribers keep
    /// their receiver; they observe the terminal value and then channel
    /// closure.
    pub fn finish(&self, job: Job) {
        let id = job.id.as_i64();
        self.publish(job);
        self.inner.lock().expect("registry lock").remove(&id);
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("registry lock").len()
    }
}
