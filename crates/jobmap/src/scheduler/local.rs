//! In-process scheduler.
//!
//! Runs components through a [`Worker`] and writes the same event stream a
//! batch system would: SUBMIT per process, then EXECUTE and TERMINATED, with
//! HELD/RELEASED/SUSPENDED/UNSUSPENDED/ABORTED when acted on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::assembler::JobDescription;
use crate::core::{ClusterId, ComponentHold, ContentHash, EventBody, JobEvent, ProcId};
use crate::eventlog::EventLogWriter;
use crate::worker::Worker;

use super::{ActAck, ActSelector, JobAction, Scheduler, SchedulerError};

/// Hold code the batch system uses for user-requested holds.
const USER_HOLD_CODE: i64 = 1;

/// When submitted processes run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Inside `submit`, before it returns.
    Immediate,
    /// On a thread per cluster.
    Background,
    /// Only when [`LocalScheduler::run_pending`] is called.
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProcState {
    Queued,
    Running,
    Held,
    Suspended,
    Done,
    Removed,
}

struct Proc {
    id: ProcId,
    key: ContentHash,
    state: ProcState,
}

struct Cluster {
    job: Arc<JobDescription>,
    writer: Arc<EventLogWriter>,
    procs: Vec<Proc>,
}

struct Inner {
    worker: Worker,
    host: String,
    clusters: Mutex<HashMap<ClusterId, Cluster>>,
    writers: Mutex<HashMap<PathBuf, Arc<EventLogWriter>>>,
    next_cluster: AtomicU64,
    submissions: AtomicUsize,
    shutdown: AtomicBool,
}

pub struct LocalScheduler {
    inner: Arc<Inner>,
    mode: RunMode,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl LocalScheduler {
    pub fn new(worker: Worker, mode: RunMode) -> Self {
        Self::with_first_cluster(worker, mode, 1)
    }

    /// Start numbering clusters at `first`, e.g. to stay clear of ids an
    /// earlier process already wrote to a shared log.
    pub fn with_first_cluster(worker: Worker, mode: RunMode, first: u64) -> Self {
        let host = nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            inner: Arc::new(Inner {
                worker,
                host,
                clusters: Mutex::new(HashMap::new()),
                writers: Mutex::new(HashMap::new()),
                next_cluster: AtomicU64::new(first),
                submissions: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
            mode,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Number of successful `submit` calls.
    pub fn submissions(&self) -> usize {
        self.inner.submissions.load(Ordering::SeqCst)
    }

    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        let mut ids: Vec<_> = lock(&self.inner.clusters).keys().copied().collect();
        ids.sort();
        ids
    }

    /// Run every queued process of every cluster; returns how many ran.
    pub fn run_pending(&self) -> usize {
        let targets = self.inner.queued(None);
        let count = targets.len();
        for (cluster, index) in targets {
            self.inner.run_proc(cluster, index);
        }
        count
    }

    /// Run the queued processes of one cluster.
    pub fn run_cluster(&self, cluster: ClusterId) -> Result<usize, SchedulerError> {
        if !lock(&self.inner.clusters).contains_key(&cluster) {
            return Err(SchedulerError::UnknownCluster { cluster });
        }
        let targets = self.inner.queued(Some(cluster));
        let count = targets.len();
        for (cluster, index) in targets {
            self.inner.run_proc(cluster, index);
        }
        Ok(count)
    }

    /// Start and then evict every queued process without running it.
    pub fn evict_pending(&self) -> Result<usize, SchedulerError> {
        let targets = self.inner.queued(None);
        for &(cluster, index) in &targets {
            self.inner.emit(cluster, index, EventBody::Execute {
                host: Some(self.inner.host.clone()),
            })?;
            self.inner.emit(cluster, index, EventBody::Evicted)?;
        }
        Ok(targets.len())
    }

    fn dispatch(&self, targets: Vec<(ClusterId, usize)>) -> Result<(), SchedulerError> {
        if targets.is_empty() {
            return Ok(());
        }
        match self.mode {
            RunMode::Manual => Ok(()),
            RunMode::Immediate => {
                for (cluster, index) in targets {
                    self.inner.run_proc(cluster, index);
                }
                Ok(())
            }
            RunMode::Background => {
                let inner = Arc::clone(&self.inner);
                let handle = std::thread::Builder::new()
                    .name("jobmap-local".to_string())
                    .spawn(move || {
                        for (cluster, index) in targets {
                            if inner.shutdown.load(Ordering::SeqCst) {
                                break;
                            }
                            inner.run_proc(cluster, index);
                        }
                    })
                    .map_err(|err| SchedulerError::Unavailable {
                        reason: format!("failed to spawn worker thread: {err}"),
                    })?;
                let mut threads = lock(&self.threads);
                threads.retain(|thread| !thread.is_finished());
                threads.push(handle);
                Ok(())
            }
        }
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for handle in lock(&self.threads).drain(..) {
            if handle.join().is_err() {
                tracing::warn!("local scheduler thread panicked");
            }
        }
    }
}

impl Inner {
    fn writer_for(&self, path: &PathBuf) -> Result<Arc<EventLogWriter>, SchedulerError> {
        let mut writers = lock(&self.writers);
        if let Some(writer) = writers.get(path) {
            return Ok(Arc::clone(writer));
        }
        let writer = Arc::new(EventLogWriter::open(path).map_err(|source| SchedulerError::Io {
            path: path.clone(),
            source,
        })?);
        writers.insert(path.clone(), Arc::clone(&writer));
        Ok(writer)
    }

    fn queued(&self, only: Option<ClusterId>) -> Vec<(ClusterId, usize)> {
        let clusters = lock(&self.clusters);
        let mut targets: Vec<_> = clusters
            .iter()
            .filter(|(id, _)| only.is_none_or(|only| **id == only))
            .flat_map(|(id, cluster)| {
                cluster
                    .procs
                    .iter()
                    .enumerate()
                    .filter(|(_, proc)| proc.state == ProcState::Queued)
                    .map(|(index, _)| (*id, index))
            })
            .collect();
        targets.sort();
        targets
    }

    fn emit(&self, cluster: ClusterId, index: usize, body: EventBody) -> Result<(), SchedulerError> {
        let (writer, proc) = {
            let clusters = lock(&self.clusters);
            let entry = clusters
                .get(&cluster)
                .ok_or(SchedulerError::UnknownCluster { cluster })?;
            (Arc::clone(&entry.writer), entry.procs[index].id)
        };
        writer
            .append(&JobEvent::new(cluster, proc, now_ms(), body))
            .map_err(|source| SchedulerError::Io {
                path: writer.path().to_path_buf(),
                source,
            })
    }

    /// Claim a queued process and run it to completion.
    fn run_proc(&self, cluster: ClusterId, index: usize) {
        let claimed = {
            let mut clusters = lock(&self.clusters);
            clusters.get_mut(&cluster).and_then(|entry| {
                let proc = entry.procs.get_mut(index)?;
                if proc.state != ProcState::Queued {
                    return None;
                }
                proc.state = ProcState::Running;
                Some((Arc::clone(&entry.job), proc.key))
            })
        };
        let Some((job, key)) = claimed else {
            return;
        };

        if let Err(err) = self.emit(cluster, index, EventBody::Execute {
            host: Some(self.host.clone()),
        }) {
            tracing::error!(cluster_id = %cluster, "failed to record execute: {err}");
            return;
        }

        let (usage, return_value) = match job.items.iter().find(|item| item.hash == key) {
            Some(item) => match self.worker.run(&job, item) {
                Ok(report) => (Some(report.runtime), 0),
                Err(err) => {
                    tracing::warn!(cluster_id = %cluster, hash = %key, "worker failed: {err}");
                    (None, 1)
                }
            },
            None => {
                tracing::warn!(cluster_id = %cluster, hash = %key, "no item for correlation key");
                (None, 1)
            }
        };

        let removed = {
            let mut clusters = lock(&self.clusters);
            match clusters
                .get_mut(&cluster)
                .and_then(|entry| entry.procs.get_mut(index))
            {
                Some(proc) if proc.state == ProcState::Removed => true,
                Some(proc) if proc.state == ProcState::Running => {
                    proc.state = ProcState::Done;
                    false
                }
                _ => false,
            }
        };
        // ABORTED was already written for a removed process.
        if removed {
            tracing::debug!(cluster_id = %cluster, hash = %key, "process removed while running");
            return;
        }

        if let Err(err) = self.emit(cluster, index, EventBody::Terminated {
            run_remote_usage: usage,
            return_value: Some(return_value),
        }) {
            tracing::error!(cluster_id = %cluster, "failed to record termination: {err}");
        }
    }
}

impl Scheduler for LocalScheduler {
    fn submit(&self, job: &JobDescription, keys: &[ContentHash]) -> Result<ClusterId, SchedulerError> {
        if keys.is_empty() {
            return Err(SchedulerError::Rejected {
                reason: "no correlation keys to queue".to_string(),
            });
        }
        if let Some(missing) = keys.iter().find(|key| !job.items.iter().any(|item| item.hash == **key)) {
            return Err(SchedulerError::Rejected {
                reason: format!("correlation key {missing} has no item in the job description"),
            });
        }

        let writer = self.inner.writer_for(&job.event_log)?;
        let cluster = ClusterId::new(self.inner.next_cluster.fetch_add(1, Ordering::SeqCst));
        let procs: Vec<Proc> = keys
            .iter()
            .enumerate()
            .map(|(idx, key)| Proc {
                id: ProcId::new(idx as u64),
                key: *key,
                state: ProcState::Queued,
            })
            .collect();

        for proc in &procs {
            writer
                .append(&JobEvent::new(
                    cluster,
                    proc.id,
                    now_ms(),
                    EventBody::Submit {
                        correlation_key: proc.key,
                    },
                ))
                .map_err(|source| SchedulerError::Io {
                    path: job.event_log.clone(),
                    source,
                })?;
        }

        let count = procs.len();
        lock(&self.inner.clusters).insert(
            cluster,
            Cluster {
                job: Arc::new(job.clone()),
                writer,
                procs,
            },
        );
        self.inner.submissions.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            tag = %job.batch_name,
            cluster_id = %cluster,
            procs = count,
            mode = ?self.mode,
            "submitted cluster"
        );

        self.dispatch((0..count).map(|index| (cluster, index)).collect())?;
        Ok(cluster)
    }

    fn act(
        &self,
        clusters: &[ClusterId],
        action: JobAction,
        selector: &ActSelector,
    ) -> Result<ActAck, SchedulerError> {
        let mut ack = ActAck::default();
        let mut events = Vec::new();
        let mut released = Vec::new();
        {
            let mut table = lock(&self.inner.clusters);
            for cluster in clusters {
                let Some(entry) = table.get_mut(cluster) else {
                    tracing::debug!(cluster_id = %cluster, "act on cluster this scheduler never saw");
                    continue;
                };
                for (index, proc) in entry.procs.iter_mut().enumerate() {
                    if !selector.matches(&proc.key) {
                        continue;
                    }
                    ack.matched += 1;
                    let next = match (action, proc.state) {
                        (JobAction::Hold, ProcState::Queued) => Some((
                            ProcState::Held,
                            EventBody::Held {
                                hold: ComponentHold::new(USER_HOLD_CODE, Some("held by user")),
                            },
                        )),
                        (JobAction::Release, ProcState::Held) => {
                            released.push((*cluster, index));
                            Some((ProcState::Queued, EventBody::Released))
                        }
                        (JobAction::Suspend, ProcState::Running) => {
                            Some((ProcState::Suspended, EventBody::Suspended))
                        }
                        (JobAction::Continue, ProcState::Suspended) => {
                            Some((ProcState::Running, EventBody::Unsuspended))
                        }
                        (
                            JobAction::Remove,
                            ProcState::Queued
                            | ProcState::Held
                            | ProcState::Running
                            | ProcState::Suspended,
                        ) => Some((
                            ProcState::Removed,
                            EventBody::Aborted {
                                reason: Some("removed by user".to_string()),
                            },
                        )),
                        _ => None,
                    };
                    if let Some((state, body)) = next {
                        proc.state = state;
                        ack.affected += 1;
                        events.push((*cluster, index, body));
                    }
                }
            }
        }

        for (cluster, index, body) in events {
            self.inner.emit(cluster, index, body)?;
        }
        tracing::info!(
            action = action.as_str(),
            clusters = clusters.len(),
            matched = ack.matched,
            affected = ack.affected,
            "acted on clusters"
        );
        self.dispatch(released)?;
        Ok(ack)
    }
}
