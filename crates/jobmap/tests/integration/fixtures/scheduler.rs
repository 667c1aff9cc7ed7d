#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use jobmap::core::{ClusterId, ContentHash};
use jobmap::{ActAck, ActSelector, JobAction, JobDescription, LocalScheduler, Scheduler, SchedulerError};

/// A scheduler that is always down.
#[derive(Default)]
pub struct RejectingScheduler {
    pub attempts: AtomicUsize,
}

impl Scheduler for RejectingScheduler {
    fn submit(&self, _job: &JobDescription, _keys: &[ContentHash]) -> Result<ClusterId, SchedulerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SchedulerError::Unavailable {
            reason: "scheduler is down".to_string(),
        })
    }

    fn act(
        &self,
        _clusters: &[ClusterId],
        _action: JobAction,
        _selector: &ActSelector,
    ) -> Result<ActAck, SchedulerError> {
        Ok(ActAck::default())
    }
}

/// Hands out cluster ids at once but, while lagging, keeps the submissions
/// back from the event log until [`LaggingScheduler::deliver`].
pub struct LaggingScheduler {
    pub inner: Arc<LocalScheduler>,
    lagging: AtomicBool,
    held: Mutex<Vec<(JobDescription, Vec<ContentHash>)>>,
}

impl LaggingScheduler {
    pub fn new(inner: Arc<LocalScheduler>) -> Self {
        Self {
            inner,
            lagging: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn hold_back(&self) {
        self.lagging.store(true, Ordering::SeqCst);
    }

    /// Forward every held submission and stop lagging.
    pub fn deliver(&self) {
        self.lagging.store(false, Ordering::SeqCst);
        let held: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        for (job, keys) in held {
            self.inner.submit(&job, &keys).unwrap();
        }
    }

    fn next_cluster(&self, queued: usize) -> ClusterId {
        let last = self.inner.cluster_ids().last().map_or(0, |id| id.get());
        ClusterId::new(last + queued as u64 + 1)
    }
}

impl Scheduler for LaggingScheduler {
    fn submit(&self, job: &JobDescription, keys: &[ContentHash]) -> Result<ClusterId, SchedulerError> {
        if !self.lagging.load(Ordering::SeqCst) {
            return self.inner.submit(job, keys);
        }
        let mut held = self.held.lock().unwrap();
        let cluster = self.next_cluster(held.len());
        held.push((job.clone(), keys.to_vec()));
        Ok(cluster)
    }

    fn act(
        &self,
        clusters: &[ClusterId],
        action: JobAction,
        selector: &ActSelector,
    ) -> Result<ActAck, SchedulerError> {
        self.inner.act(clusters, action, selector)
    }
}
