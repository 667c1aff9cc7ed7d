//! Per-component status folded from the scheduler event log.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::{
    ClusterId, ComponentHold, ComponentStatus, ContentHash, EventBody, JobEvent, OutputStatus,
    ProcId, StatusCounts, Tag,
};
use crate::eventlog::{Corruption, EventLogReader, LogEntry};
use crate::store::{ContentStore, StoreError};

/// Source of truth for whether a component's function succeeded.
pub trait OutputProbe {
    fn output_status(&self, hash: &ContentHash) -> std::result::Result<Option<OutputStatus>, StoreError>;
}

impl OutputProbe for ContentStore {
    fn output_status(&self, hash: &ContentHash) -> std::result::Result<Option<OutputStatus>, StoreError> {
        ContentStore::output_status(self, hash)
    }
}

/// Persistable form of [`ComponentStateMachine`], including the log cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub offset: u64,
    pub statuses: Vec<ComponentStatus>,
    pub holds: BTreeMap<usize, ComponentHold>,
    pub memory_usage_mb: Vec<u64>,
    pub runtime: Vec<Duration>,
    pub jobs: Vec<(ClusterId, ProcId, ContentHash)>,
    #[serde(default)]
    pub awaiting: Vec<(ContentHash, ClusterId)>,
}

pub struct ComponentStateMachine {
    tag: Tag,
    components_by_hash: HashMap<ContentHash, Vec<usize>>,
    jobs: HashMap<(ClusterId, ProcId), ContentHash>,
    statuses: Vec<ComponentStatus>,
    counts: StatusCounts,
    holds: BTreeMap<usize, ComponentHold>,
    memory_usage_mb: Vec<u64>,
    runtime: Vec<Duration>,
    reader: EventLogReader,
    generation: u64,
    /// Hashes queued into a cluster whose job for them has not finished.
    awaiting: BTreeMap<ContentHash, ClusterId>,
    /// Last cluster seen finishing each hash.
    finished: HashMap<ContentHash, ClusterId>,
}

impl ComponentStateMachine {
    pub fn new(tag: Tag, hashes: &[ContentHash], event_log: impl Into<PathBuf>) -> Self {
        let n = hashes.len();
        let mut components_by_hash: HashMap<ContentHash, Vec<usize>> = HashMap::new();
        for (idx, hash) in hashes.iter().enumerate() {
            components_by_hash.entry(*hash).or_default().push(idx);
        }
        Self {
            tag,
            components_by_hash,
            jobs: HashMap::new(),
            statuses: vec![ComponentStatus::Unmaterialized; n],
            counts: StatusCounts::unmaterialized(n),
            holds: BTreeMap::new(),
            memory_usage_mb: vec![0; n],
            runtime: vec![Duration::ZERO; n],
            reader: EventLogReader::new(event_log),
            generation: 0,
            awaiting: BTreeMap::new(),
            finished: HashMap::new(),
        }
    }

    /// Rebuild from a snapshot; `None` if it does not fit `hashes`.
    pub fn from_snapshot(
        tag: Tag,
        hashes: &[ContentHash],
        event_log: impl Into<PathBuf>,
        snapshot: StateSnapshot,
    ) -> Option<Self> {
        let n = hashes.len();
        let mut machine = Self::new(tag, hashes, event_log);
        if snapshot.statuses.len() != n
            || snapshot.memory_usage_mb.len() != n
            || snapshot.runtime.len() != n
            || snapshot.holds.keys().any(|idx| *idx >= n)
        {
            return None;
        }
        let mut jobs = HashMap::with_capacity(snapshot.jobs.len());
        for (cluster, proc, hash) in snapshot.jobs {
            if !machine.components_by_hash.contains_key(&hash) {
                return None;
            }
            jobs.insert((cluster, proc), hash);
        }
        if snapshot
            .awaiting
            .iter()
            .any(|(hash, _)| !machine.components_by_hash.contains_key(hash))
        {
            return None;
        }
        machine.counts = StatusCounts::from_statuses(&snapshot.statuses);
        machine.statuses = snapshot.statuses;
        machine.holds = snapshot.holds;
        machine.memory_usage_mb = snapshot.memory_usage_mb;
        machine.runtime = snapshot.runtime;
        machine.jobs = jobs;
        machine.awaiting = snapshot.awaiting.into_iter().collect();
        machine.reader.rewind_to(snapshot.offset);
        Some(machine)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let mut jobs: Vec<_> = self
            .jobs
            .iter()
            .map(|((cluster, proc), hash)| (*cluster, *proc, *hash))
            .collect();
        jobs.sort();
        StateSnapshot {
            offset: self.reader.offset(),
            statuses: self.statuses.clone(),
            holds: self.holds.clone(),
            memory_usage_mb: self.memory_usage_mb.clone(),
            runtime: self.runtime.clone(),
            jobs,
            awaiting: self.awaiting.iter().map(|(hash, cluster)| (*hash, *cluster)).collect(),
        }
    }

    pub fn statuses(&self) -> &[ComponentStatus] {
        &self.statuses
    }

    pub fn counts(&self) -> StatusCounts {
        self.counts
    }

    pub fn holds(&self) -> &BTreeMap<usize, ComponentHold> {
        &self.holds
    }

    pub fn memory_usage_mb(&self) -> &[u64] {
        &self.memory_usage_mb
    }

    pub fn runtime(&self) -> &[Duration] {
        &self.runtime
    }

    /// Bumped once per folded event; cached aggregates key off this.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cursor(&self) -> u64 {
        self.reader.offset()
    }

    /// Mark components whose output already existed before submission.
    pub fn mark_cached(&mut self, hash: &ContentHash) {
        let Some(components) = self.components_by_hash.get(hash) else {
            return;
        };
        for &idx in components {
            let from = self.statuses[idx];
            if from == ComponentStatus::Unmaterialized {
                self.statuses[idx] = ComponentStatus::Completed;
                self.counts.transition(from, ComponentStatus::Completed);
            }
        }
        self.generation += 1;
    }

    /// Treat `hash` as unsettled until `cluster` finishes or aborts its job
    /// for it, whatever the store holds meanwhile.
    ///
    /// A no-op if that cluster was already seen finishing the hash.
    pub fn await_cluster(&mut self, hash: ContentHash, cluster: ClusterId) {
        if !self.components_by_hash.contains_key(&hash) || self.finished.get(&hash) == Some(&cluster) {
            return;
        }
        self.awaiting.insert(hash, cluster);
        self.generation += 1;
    }

    /// `hash` was resubmitted and its new job has not finished yet.
    pub fn is_awaiting(&self, hash: &ContentHash) -> bool {
        self.awaiting.contains_key(hash)
    }

    /// Fold every complete event written since the last call.
    ///
    /// Returns the number of events folded. If folding fails the cursor is
    /// left before the failing record.
    pub fn refresh(&mut self, probe: &dyn OutputProbe) -> Result<usize> {
        let mut folded = 0;
        while let Some(entry) = self.reader.next_entry()? {
            let offset = entry.offset;
            if let Err(err) = self.fold(&entry, probe) {
                self.reader.rewind_to(offset);
                return Err(err);
            }
            folded += 1;
        }
        if folded > 0 {
            tracing::trace!(tag = %self.tag, folded, cursor = self.reader.offset(), "folded events");
        }
        Ok(folded)
    }

    fn fold(&mut self, entry: &LogEntry, probe: &dyn OutputProbe) -> Result<()> {
        let event = &entry.event;
        let key = (event.cluster, event.proc);

        let hash = match &event.body {
            EventBody::Submit { correlation_key } => {
                if !self.components_by_hash.contains_key(correlation_key) {
                    return Err(self
                        .reader
                        .corrupt(
                            entry.offset,
                            Corruption::UnknownCorrelationKey {
                                hash: *correlation_key,
                            },
                        )
                        .into());
                }
                self.jobs.insert(key, *correlation_key);
                *correlation_key
            }
            _ => match self.jobs.get(&key) {
                Some(hash) => *hash,
                None => {
                    return Err(self
                        .reader
                        .corrupt(
                            entry.offset,
                            Corruption::UnknownJob {
                                cluster: event.cluster,
                                proc: event.proc,
                            },
                        )
                        .into());
                }
            },
        };

        let mut target = event.body.target_status();
        if target == Some(ComponentStatus::Completed) {
            target = Some(match probe.output_status(&hash)? {
                Some(OutputStatus::Ok) => ComponentStatus::Completed,
                Some(OutputStatus::Error) => ComponentStatus::Errored,
                None => {
                    tracing::warn!(
                        tag = %self.tag,
                        %hash,
                        cluster_id = %event.cluster,
                        "output not found for terminated job, marking as errored"
                    );
                    ComponentStatus::Errored
                }
            });
        }

        if matches!(event.body, EventBody::Terminated { .. } | EventBody::Aborted { .. }) {
            self.finished.insert(hash, event.cluster);
            if self.awaiting.get(&hash) == Some(&event.cluster) {
                self.awaiting.remove(&hash);
            }
        }

        // Duplicate inputs share one job, so one event moves every component of the hash.
        let components = self.components_by_hash.get(&hash).cloned().unwrap_or_default();
        for idx in components {
            self.apply(idx, event, target);
        }
        self.generation += 1;
        Ok(())
    }

    fn apply(&mut self, idx: usize, event: &JobEvent, target: Option<ComponentStatus>) {
        match &event.body {
            EventBody::ImageSize { memory_usage_mb } => {
                self.memory_usage_mb[idx] = self.memory_usage_mb[idx].max(*memory_usage_mb);
            }
            EventBody::Terminated {
                run_remote_usage: Some(usage),
                ..
            } => {
                self.runtime[idx] = *usage;
            }
            EventBody::Held { hold } => {
                self.holds.insert(idx, hold.clone());
            }
            EventBody::Released | EventBody::Submit { .. } | EventBody::Aborted { .. } => {
                self.holds.remove(&idx);
            }
            _ => {}
        }

        let Some(to) = target else {
            return;
        };
        let from = self.statuses[idx];
        if from == to {
            tracing::warn!(
                tag = %self.tag,
                component = idx,
                status = %to,
                event = event.body.kind_name(),
                "component tried to transition into the status it is already in"
            );
            return;
        }
        tracing::debug!(
            tag = %self.tag,
            component = idx,
            from = %from,
            to = %to,
            cluster_id = %event.cluster,
            "component status changed"
        );
        self.statuses[idx] = to;
        self.counts.transition(from, to);
    }
}
