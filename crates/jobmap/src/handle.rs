//! The user-facing aggregate over one map.
//!
//! A [`MapHandle`] owns the map's identity, its job description and the
//! state machine folded from its event log. Every read folds pending events
//! first, so callers always see forward progress even if they only poll
//! status. After `remove` (or a successful `rename`) the handle is dead and
//! every guarded call fails with [`Error::MapWasRemoved`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::assembler::JobDescription;
use crate::core::{
    Args, ClusterId, ComponentErrorReport, ComponentHold, ComponentStatus, ContentHash,
    MapIdentity, OutputPayload, OutputRecord, OutputStatus, StatusCounts, Tag,
};
use crate::iter::{AvailableOutputs, OrderedOutputs};
use crate::paths::{
    IDENTITY_FILE, JOB_FILE, Layout, sandbox_dir, stderr_path, stdout_path, transfer_dir,
};
use crate::persist::{copy_dir_all, read_json, remove_dir_if_exists, write_json};
use crate::registry::MapRegistry;
use crate::scheduler::{ActAck, ActSelector, JobAction, Scheduler};
use crate::state::{ComponentStateMachine, StateSnapshot};
use crate::store::{BlobKind, ContentStore};
use crate::wait::{PollError, poll_until};
use crate::{Error, Result};

const LOST_OUTPUT_MSG: &str = "job terminated without writing an output";

/// Services shared by every handle of one workspace.
pub(crate) struct MapContext {
    pub(crate) layout: Layout,
    pub(crate) store: ContentStore,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) registry: Arc<MapRegistry>,
}

impl MapContext {
    /// The live handle for `tag`, recovering it from disk if needed.
    pub(crate) fn load(self: &Arc<Self>, tag: &Tag) -> Result<Arc<MapHandle>> {
        self.registry
            .get_or_insert_with(tag, || MapHandle::recover(Arc::clone(self), tag))
    }

    pub(crate) fn exists(&self, tag: &Tag) -> bool {
        self.layout.identity_path(tag).is_file()
    }

    /// Every persisted map, sorted. Staging directories are skipped.
    pub(crate) fn all_tags(&self) -> Result<Vec<Tag>> {
        let maps_dir = self.layout.maps_dir();
        let entries = match fs::read_dir(&maps_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io(&maps_dir, err)),
        };
        let mut tags = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::io(&maps_dir, err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Ok(tag) = Tag::parse(name) else {
                tracing::debug!(name, "skipping directory with an invalid tag");
                continue;
            };
            if self.exists(&tag) {
                tags.push(tag);
            }
        }
        tags.sort();
        Ok(tags)
    }

    fn hashes_referenced_by_others(&self, except: &Tag) -> Result<HashSet<ContentHash>> {
        let mut referenced = HashSet::new();
        for tag in self.all_tags()? {
            if &tag == except {
                continue;
            }
            if let Some(identity) = read_json::<MapIdentity>(&self.layout.identity_path(&tag))? {
                referenced.extend(identity.hashes);
            }
        }
        Ok(referenced)
    }
}

/// Result of [`MapHandle::rerun`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RerunOutcome {
    /// Cluster of the resubmission; `None` when nothing needed to run.
    pub cluster: Option<ClusterId>,
    /// Components whose hash was resubmitted.
    pub components: Vec<usize>,
}

/// What a component has to show once it stops making progress.
pub(crate) enum Ready {
    Output(OutputRecord),
    /// ERRORED without an output record.
    Lost,
}

pub struct MapHandle {
    ctx: Arc<MapContext>,
    tag: Tag,
    hashes: Vec<ContentHash>,
    job: JobDescription,
    identity: Mutex<MapIdentity>,
    state: Mutex<ComponentStateMachine>,
    /// Generation at which every component was last seen settled.
    done_at: Mutex<Option<u64>>,
    removed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for MapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapHandle")
            .field("tag", &self.tag)
            .field("components", &self.hashes.len())
            .field("removed", &self.removed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl MapHandle {
    /// Handle for a freshly submitted map. `cached` hashes already had an OK
    /// output, so no events will ever arrive for them. `submitted` hashes
    /// went to the map's cluster and stay unsettled until it finishes them,
    /// even if another map left an ERROR output behind.
    pub(crate) fn create(
        ctx: Arc<MapContext>,
        identity: MapIdentity,
        job: JobDescription,
        cached: &[ContentHash],
        submitted: &[ContentHash],
    ) -> Result<Arc<Self>> {
        let tag = identity.tag.clone();
        let hashes = identity.hashes.clone();
        let mut machine =
            ComponentStateMachine::new(tag.clone(), &hashes, ctx.layout.event_log_path(&tag));
        for hash in cached {
            machine.mark_cached(hash);
        }
        if let Some(cluster) = identity.cluster_ids.last() {
            for hash in submitted {
                machine.await_cluster(*hash, *cluster);
            }
        }
        let handle = Arc::new(Self::assemble(ctx, tag, hashes, job, identity, machine));
        if !cached.is_empty() || !submitted.is_empty() {
            let state = handle.lock_state();
            handle.persist_snapshot(&state);
        }
        handle.ctx.registry.insert(&handle);
        Ok(handle)
    }

    /// Rebuild a handle from the map directory.
    ///
    /// A valid state snapshot is resumed from its cursor; anything else
    /// replays the event log from the start.
    pub(crate) fn recover(ctx: Arc<MapContext>, tag: &Tag) -> Result<Arc<Self>> {
        let layout = &ctx.layout;
        let not_found = || Error::MapNotFound { tag: tag.clone() };
        let identity: MapIdentity = read_json(&layout.identity_path(tag))?.ok_or_else(not_found)?;
        let job: JobDescription = read_json(&layout.job_path(tag))?.ok_or_else(not_found)?;

        let hashes = identity.hashes.clone();
        let event_log = layout.event_log_path(tag);
        let fresh = || ComponentStateMachine::new(tag.clone(), &hashes, &event_log);
        let mut machine = match read_json::<StateSnapshot>(&layout.state_path(tag)) {
            Ok(Some(snapshot)) => {
                ComponentStateMachine::from_snapshot(tag.clone(), &hashes, &event_log, snapshot)
                    .unwrap_or_else(|| {
                        tracing::warn!(%tag, "state snapshot does not match the map; replaying events");
                        fresh()
                    })
            }
            Ok(None) => fresh(),
            Err(err) => {
                tracing::warn!(%tag, "unreadable state snapshot, replaying events: {err}");
                fresh()
            }
        };

        machine.refresh(&ctx.store)?;
        let unseen: HashSet<ContentHash> = machine
            .statuses()
            .iter()
            .zip(&hashes)
            .filter(|(status, _)| **status == ComponentStatus::Unmaterialized)
            .map(|(_, hash)| *hash)
            .collect();
        for hash in unseen {
            if ctx.store.output_status(&hash)? == Some(OutputStatus::Ok) {
                machine.mark_cached(&hash);
            }
        }

        tracing::debug!(%tag, components = hashes.len(), cursor = machine.cursor(), "recovered map");
        let handle = Self::assemble(ctx, tag.clone(), hashes, job, identity, machine);
        {
            let state = handle.lock_state();
            handle.persist_snapshot(&state);
        }
        Ok(Arc::new(handle))
    }

    fn assemble(
        ctx: Arc<MapContext>,
        tag: Tag,
        hashes: Vec<ContentHash>,
        job: JobDescription,
        identity: MapIdentity,
        machine: ComponentStateMachine,
    ) -> Self {
        Self {
            ctx,
            tag,
            hashes,
            job,
            identity: Mutex::new(identity),
            state: Mutex::new(machine),
            done_at: Mutex::new(None),
            removed: AtomicBool::new(false),
        }
    }

    // Unguarded: usable on a removed handle for logging and registry upkeep.

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    fn live(&self, operation: &'static str) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(Error::MapWasRemoved {
                tag: self.tag.clone(),
                operation,
            });
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, ComponentStateMachine> {
        lock(&self.state)
    }

    /// The state machine with every complete pending event folded in.
    fn refreshed(&self) -> Result<MutexGuard<'_, ComponentStateMachine>> {
        let mut state = self.lock_state();
        if state.refresh(&self.ctx.store)? > 0 {
            self.persist_snapshot(&state);
        }
        Ok(state)
    }

    /// Snapshots are a cache over the event log; failing to write one only
    /// costs a longer replay later.
    fn persist_snapshot(&self, state: &ComponentStateMachine) {
        if self.removed.load(Ordering::Acquire) {
            return;
        }
        let path = self.ctx.layout.state_path(&self.tag);
        if let Err(err) = write_json(&path, &state.snapshot()) {
            tracing::warn!(tag = %self.tag, "failed to persist state snapshot: {err}");
        }
    }

    fn hash_at(&self, index: usize) -> Result<ContentHash> {
        self.hashes.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            len: self.hashes.len(),
        })
    }

    fn poll_error(&self, err: PollError<Error>, what: String) -> Error {
        match err {
            PollError::Probe(err) => err,
            PollError::Missing => Error::NotFound { what },
            PollError::Timeout { waited } => Error::Timeout { what, waited },
        }
    }

    pub fn cluster_ids(&self) -> Result<Vec<ClusterId>> {
        self.live("cluster_ids")?;
        Ok(lock(&self.identity).cluster_ids.clone())
    }

    pub fn hashes(&self) -> Result<&[ContentHash]> {
        self.live("hashes")?;
        Ok(&self.hashes)
    }

    pub fn component_statuses(&self) -> Result<Vec<ComponentStatus>> {
        self.live("component_statuses")?;
        Ok(self.refreshed()?.statuses().to_vec())
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        self.live("status_counts")?;
        Ok(self.refreshed()?.counts())
    }

    /// Current holds, by component.
    pub fn hold_reasons(&self) -> Result<BTreeMap<usize, ComponentHold>> {
        self.live("hold_reasons")?;
        Ok(self.refreshed()?.holds().clone())
    }

    /// Table of held components and why they are held.
    pub fn holds_report(&self) -> Result<String> {
        let holds = self.hold_reasons()?;
        if holds.is_empty() {
            return Ok(format!("No components of map {} are held.", self.tag));
        }
        let width = holds
            .values()
            .map(|hold| hold.reason.len())
            .max()
            .unwrap_or(0)
            .max("Hold Reason".len());
        let mut out = format!("{:>9} | {:<width$} | Code\n", "Component", "Hold Reason");
        out.push_str(&format!("{}\n", "-".repeat(9 + 3 + width + 3 + 4)));
        for (component, hold) in &holds {
            out.push_str(&format!("{component:>9} | {:<width$} | {}\n", hold.reason, hold.code));
        }
        Ok(out)
    }

    /// Peak memory usage per component, in MB.
    pub fn memory_usage(&self) -> Result<Vec<u64>> {
        self.live("memory_usage")?;
        Ok(self.refreshed()?.memory_usage_mb().to_vec())
    }

    /// Remote wall time per component.
    pub fn runtime(&self) -> Result<Vec<Duration>> {
        self.live("runtime")?;
        Ok(self.refreshed()?.runtime().to_vec())
    }

    /// One-line progress summary.
    pub fn status(&self) -> Result<String> {
        let counts = self.status_counts()?;
        let parts: Vec<String> = ComponentStatus::DISPLAY
            .iter()
            .map(|status| format!("{status} = {}", counts.get(*status)))
            .collect();
        Ok(format!(
            "Map {} ({} components): {}",
            self.tag,
            self.hashes.len(),
            parts.join(" | ")
        ))
    }

    /// Has an output or has errored, and is not waiting on a resubmission.
    fn settled(&self, state: &ComponentStateMachine, index: usize) -> bool {
        let hash = &self.hashes[index];
        !state.is_awaiting(hash)
            && (state.statuses()[index] == ComponentStatus::Errored
                || self.ctx.store.exists(BlobKind::Output, hash))
    }

    fn all_settled(&self, state: &ComponentStateMachine) -> bool {
        let generation = state.generation();
        let mut done_at = lock(&self.done_at);
        if *done_at == Some(generation) {
            return true;
        }
        let done = (0..self.hashes.len()).all(|index| self.settled(state, index));
        if done {
            *done_at = Some(generation);
        }
        done
    }

    /// Every component has an output or has errored.
    pub fn is_done(&self) -> Result<bool> {
        self.live("is_done")?;
        let state = self.refreshed()?;
        Ok(self.all_settled(&state))
    }

    /// Some component can still make progress.
    pub fn is_active(&self) -> Result<bool> {
        self.live("is_active")?;
        let state = self.refreshed()?;
        Ok((0..self.hashes.len()).any(|index| {
            state.is_awaiting(&self.hashes[index])
                || (!state.statuses()[index].is_terminal() && !self.settled(&state, index))
        }))
    }

    fn held_error(&self, state: &ComponentStateMachine, index: usize) -> Option<Error> {
        state.holds().get(&index).map(|hold| Error::ComponentHeld {
            tag: self.tag.clone(),
            component: index,
            hold: hold.clone(),
        })
    }

    fn probe_ready(&self, state: &ComponentStateMachine, index: usize) -> Result<Option<Ready>> {
        let hash = &self.hashes[index];
        if state.is_awaiting(hash) {
            return Ok(None);
        }
        if self.ctx.store.exists(BlobKind::Output, hash) {
            return Ok(Some(Ready::Output(self.ctx.store.read_output(hash)?)));
        }
        if state.statuses()[index] == ComponentStatus::Errored {
            return Ok(Some(Ready::Lost));
        }
        Ok(None)
    }

    fn await_ready(&self, index: usize, timeout: Option<Duration>) -> Result<Ready> {
        self.hash_at(index)?;
        poll_until(timeout, self.ctx.store.poll_interval(), || {
            let state = self.refreshed()?;
            if let Some(ready) = self.probe_ready(&state, index)? {
                return Ok(Some(ready));
            }
            match self.held_error(&state, index) {
                Some(err) => Err(err),
                None => Ok(None),
            }
        })
        .map_err(|err| {
            self.poll_error(err, format!("output of component {index} of map `{}`", self.tag))
        })
    }

    fn lost_report(index: usize) -> ComponentErrorReport {
        ComponentErrorReport {
            component: index,
            exception_msg: LOST_OUTPUT_MSG.to_string(),
            ..ComponentErrorReport::default()
        }
    }

    pub(crate) fn into_value(&self, index: usize, ready: Ready) -> Result<Value> {
        let report = match ready {
            Ready::Output(OutputRecord {
                payload: OutputPayload::Ok { value },
                ..
            }) => return Ok(value),
            Ready::Output(OutputRecord {
                payload: OutputPayload::Error { error },
                ..
            }) => error,
            Ready::Lost => Box::new(Self::lost_report(index)),
        };
        Err(Error::ComponentError {
            tag: self.tag.clone(),
            component: index,
            report,
        })
    }

    /// The output of component `index`.
    ///
    /// `None` waits forever; a zero timeout probes once and fails with
    /// [`Error::NotFound`]; otherwise [`Error::Timeout`] past the deadline.
    /// Fails early with [`Error::ComponentHeld`] if the component is held.
    pub fn get(&self, index: usize, timeout: Option<Duration>) -> Result<Value> {
        self.live("get")?;
        let ready = self.await_ready(index, timeout)?;
        self.into_value(index, ready)
    }

    pub fn get_as<T: DeserializeOwned>(&self, index: usize, timeout: Option<Duration>) -> Result<T> {
        let value = self.get(index, timeout)?;
        serde_json::from_value(value).map_err(|source| Error::OutputShape {
            component: index,
            source,
        })
    }

    /// The error report of component `index`; `None` if it succeeded.
    pub fn get_err(
        &self,
        index: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<ComponentErrorReport>> {
        self.live("get_err")?;
        Ok(match self.await_ready(index, timeout)? {
            Ready::Output(record) => match record.payload {
                OutputPayload::Ok { .. } => None,
                OutputPayload::Error { error } => Some(*error),
            },
            Ready::Lost => Some(Self::lost_report(index)),
        })
    }

    /// Reports of every component that has errored so far. Never blocks.
    /// Components waiting on a resubmission are left out.
    pub fn error_reports(&self) -> Result<Vec<(usize, ComponentErrorReport)>> {
        self.live("error_reports")?;
        let state = self.refreshed()?;
        let mut reports = Vec::new();
        for index in 0..self.hashes.len() {
            let hash = &self.hashes[index];
            if state.is_awaiting(hash) {
                continue;
            }
            match self.ctx.store.output_status(hash)? {
                Some(OutputStatus::Error) => {
                    if let OutputPayload::Error { error } = self.ctx.store.read_output(hash)?.payload {
                        reports.push((index, *error));
                    }
                }
                Some(OutputStatus::Ok) => {}
                None if state.statuses()[index] == ComponentStatus::Errored => {
                    reports.push((index, Self::lost_report(index)));
                }
                None => {}
            }
        }
        Ok(reports)
    }

    pub fn input(&self, index: usize) -> Result<Args> {
        self.live("input")?;
        let hash = self.hash_at(index)?;
        Ok(self.ctx.store.read_input(&hash)?)
    }

    /// Input arguments in component order.
    pub fn iter_inputs(&self) -> Result<impl Iterator<Item = Result<Args>> + '_> {
        self.live("iter_inputs")?;
        Ok((0..self.hashes.len()).map(|index| self.input(index)))
    }

    /// Block until every component has an output or has errored; returns
    /// the time spent waiting.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Duration> {
        self.live("wait")?;
        let start = Instant::now();
        poll_until(timeout, self.ctx.store.poll_interval(), || {
            let state = self.refreshed()?;
            if self.all_settled(&state) {
                return Ok(Some(()));
            }
            let held = (0..self.hashes.len())
                .filter(|index| !self.settled(&state, *index))
                .find_map(|index| self.held_error(&state, index));
            match held {
                Some(err) => Err(err),
                None => Ok(None),
            }
        })
        .map_err(|err| self.poll_error(err, format!("map `{}` to finish", self.tag)))?;
        Ok(start.elapsed())
    }

    /// Outputs in component order. Each item waits up to `timeout`.
    pub fn iter(&self, timeout: Option<Duration>) -> Result<OrderedOutputs<'_>> {
        self.live("iter")?;
        Ok(OrderedOutputs::new(self, timeout))
    }

    /// `(input, output)` pairs in component order.
    pub fn iter_with_inputs(
        &self,
        timeout: Option<Duration>,
    ) -> Result<impl Iterator<Item = Result<(Args, Value)>> + '_> {
        self.live("iter_with_inputs")?;
        Ok((0..self.hashes.len()).map(move |index| {
            let input = self.input(index)?;
            let output = self.get(index, timeout)?;
            Ok((input, output))
        }))
    }

    /// Outputs in the order they become available. `timeout` bounds the
    /// wait for each next output.
    pub fn iter_as_available(&self, timeout: Option<Duration>) -> Result<AvailableOutputs<'_>> {
        self.live("iter_as_available")?;
        Ok(AvailableOutputs::new(self, timeout))
    }

    /// First position in `pending` whose component is ready.
    ///
    /// Fails with [`Error::ComponentHeld`] when every pending component is
    /// held, since nothing could arrive before a release.
    pub(crate) fn first_ready(&self, pending: &[usize]) -> Result<Option<(usize, Ready)>> {
        self.live("iter_as_available")?;
        let state = self.refreshed()?;
        for (pos, &index) in pending.iter().enumerate() {
            if let Some(ready) = self.probe_ready(&state, index)? {
                return Ok(Some((pos, ready)));
            }
        }
        if pending.iter().all(|index| state.holds().contains_key(index))
            && let Some(err) = pending.first().and_then(|index| self.held_error(&state, *index))
        {
            return Err(err);
        }
        Ok(None)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.ctx.store.poll_interval()
    }

    pub(crate) fn timeout_error(&self, err: PollError<Error>) -> Error {
        self.poll_error(err, format!("next output of map `{}`", self.tag))
    }

    /// Apply `action` to every job of this map.
    pub fn act(&self, action: JobAction) -> Result<ActAck> {
        self.live("act")?;
        self.act_on(action, &ActSelector::All)
    }

    fn act_on(&self, action: JobAction, selector: &ActSelector) -> Result<ActAck> {
        let clusters = lock(&self.identity).cluster_ids.clone();
        if clusters.is_empty() {
            return Ok(ActAck::default());
        }
        let ack = self.ctx.scheduler.act(&clusters, action, selector)?;
        tracing::info!(
            tag = %self.tag,
            action = action.as_str(),
            matched = ack.matched,
            affected = ack.affected,
            "acted on map"
        );
        Ok(ack)
    }

    pub fn hold(&self) -> Result<ActAck> {
        self.act(JobAction::Hold)
    }

    pub fn release(&self) -> Result<ActAck> {
        self.act(JobAction::Release)
    }

    pub fn pause(&self) -> Result<ActAck> {
        self.act(JobAction::Suspend)
    }

    pub fn resume(&self) -> Result<ActAck> {
        self.act(JobAction::Continue)
    }

    pub fn vacate(&self) -> Result<ActAck> {
        self.act(JobAction::Vacate)
    }

    /// Remove the map's jobs, delete its persisted data and kill the handle.
    ///
    /// Input and output blobs no other map references are deleted too.
    pub fn remove(&self) -> Result<()> {
        self.live("remove")?;
        self.act_on(JobAction::Remove, &ActSelector::All)?;
        self.delete_persisted(true)?;
        tracing::info!(tag = %self.tag, "removed map");
        Ok(())
    }

    fn delete_persisted(&self, collect_blobs: bool) -> Result<()> {
        self.removed.store(true, Ordering::Release);
        let _state = self.lock_state();
        let dir = self.ctx.layout.map_dir(&self.tag);
        remove_dir_if_exists(&dir).map_err(|err| Error::io(&dir, err))?;
        self.ctx.registry.remove(&self.tag, self);

        if collect_blobs {
            let referenced = self.ctx.hashes_referenced_by_others(&self.tag)?;
            let scratch = self.ctx.layout.scratch_dir();
            let unique: HashSet<&ContentHash> = self.hashes.iter().collect();
            for hash in unique.into_iter().filter(|hash| !referenced.contains(*hash)) {
                self.ctx.store.delete(BlobKind::Input, hash)?;
                self.ctx.store.delete(BlobKind::Output, hash)?;
                for dir in [sandbox_dir(&scratch, hash), transfer_dir(&scratch, hash)] {
                    remove_dir_if_exists(&dir).map_err(|err| Error::io(&dir, err))?;
                }
            }
        }
        Ok(())
    }

    /// Resubmit the components in `indices` (all if `None`) that lack an OK
    /// output. ERROR outputs count as lacking; they stay in the store for
    /// other maps until the new run replaces them.
    ///
    /// The resubmission gets a new cluster id, appended to the identity.
    /// Until that cluster finishes a component, the component is neither
    /// settled nor ready, whatever the event log has shown so far.
    pub fn rerun(&self, indices: Option<&[usize]>) -> Result<RerunOutcome> {
        self.live("rerun")?;
        let len = self.hashes.len();
        let scope: Vec<usize> = match indices {
            Some(indices) => {
                if let Some(bad) = indices.iter().find(|index| **index >= len) {
                    return Err(Error::CannotRerunComponents {
                        tag: self.tag.clone(),
                        reason: format!("component index {bad} out of range for {len} components"),
                    });
                }
                let mut scope = indices.to_vec();
                scope.sort_unstable();
                scope.dedup();
                scope
            }
            None => (0..len).collect(),
        };

        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut components = Vec::new();
        for index in scope {
            let hash = self.hashes[index];
            if self.ctx.store.output_status(&hash)? == Some(OutputStatus::Ok) {
                continue;
            }
            components.push(index);
            if seen.insert(hash) {
                keys.push(hash);
            }
        }

        if keys.is_empty() {
            tracing::info!(tag = %self.tag, "nothing to rerun");
            return Ok(RerunOutcome::default());
        }

        self.act_on(JobAction::Remove, &ActSelector::Keys(keys.clone()))?;
        let cluster = self.ctx.scheduler.submit(&self.job, &keys)?;
        {
            let mut identity = lock(&self.identity);
            identity.cluster_ids.push(cluster);
            write_json(&self.ctx.layout.identity_path(&self.tag), &*identity)?;
        }
        {
            let mut state = self.lock_state();
            for hash in &keys {
                state.await_cluster(*hash, cluster);
            }
            self.persist_snapshot(&state);
        }
        tracing::info!(
            tag = %self.tag,
            cluster_id = %cluster,
            components = components.len(),
            hashes = keys.len(),
            "resubmitted components"
        );
        Ok(RerunOutcome {
            cluster: Some(cluster),
            components,
        })
    }

    /// Move the map to `new_tag` and return the handle for it. This handle
    /// is dead afterwards.
    ///
    /// Only maps with no outstanding components can be renamed. An existing
    /// map at `new_tag` is removed first when `overwrite` is set.
    pub fn rename(&self, new_tag: &str, overwrite: bool) -> Result<Arc<MapHandle>> {
        self.live("rename")?;
        let new_tag = Tag::parse(new_tag)?;
        let refuse = |reason: String| Error::CannotRenameMap {
            tag: self.tag.clone(),
            reason,
        };
        if new_tag == self.tag {
            return Err(refuse("the new tag is the current tag".to_string()));
        }
        if self.is_active()? {
            return Err(refuse("the map still has outstanding components".to_string()));
        }
        if self.ctx.exists(&new_tag) {
            if !overwrite {
                return Err(refuse(format!("tag `{new_tag}` is already in use")));
            }
            self.ctx.load(&new_tag)?.remove()?;
        }

        let layout = &self.ctx.layout;
        {
            let state = self.lock_state();
            write_json(&layout.state_path(&self.tag), &state.snapshot())?;
        }
        let staging = layout.maps_dir().join(format!(".rename-{new_tag}"));
        remove_dir_if_exists(&staging).map_err(|err| Error::io(&staging, err))?;
        copy_dir_all(&layout.map_dir(&self.tag), &staging)
            .map_err(|err| Error::io(&staging, err))?;

        let mut job = self.job.clone();
        job.retarget(layout, &new_tag);
        write_json(&staging.join(JOB_FILE), &job)?;
        let mut identity = lock(&self.identity).clone();
        identity.tag = new_tag.clone();
        write_json(&staging.join(IDENTITY_FILE), &identity)?;

        let target = layout.map_dir(&new_tag);
        fs::rename(&staging, &target).map_err(|err| Error::io(&target, err))?;
        self.delete_persisted(false)?;
        tracing::info!(tag = %self.tag, new_tag = %new_tag, "renamed map");
        self.ctx.load(&new_tag)
    }

    /// Alias of [`Self::rename`].
    pub fn retag(&self, new_tag: &str, overwrite: bool) -> Result<Arc<MapHandle>> {
        self.rename(new_tag, overwrite)
    }

    /// What component `index` printed to stdout.
    pub fn stdout(&self, index: usize, timeout: Option<Duration>) -> Result<String> {
        self.live("stdout")?;
        let hash = self.hash_at(index)?;
        let path = stdout_path(&self.ctx.layout.job_logs_dir(&self.tag), &hash);
        self.read_job_log(&path, index, "stdout", timeout)
    }

    /// What component `index` printed to stderr.
    pub fn stderr(&self, index: usize, timeout: Option<Duration>) -> Result<String> {
        self.live("stderr")?;
        let hash = self.hash_at(index)?;
        let path = stderr_path(&self.ctx.layout.job_logs_dir(&self.tag), &hash);
        self.read_job_log(&path, index, "stderr", timeout)
    }

    fn read_job_log(
        &self,
        path: &Path,
        index: usize,
        stream: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        poll_until(timeout, self.ctx.store.poll_interval(), || {
            match fs::read_to_string(path) {
                Ok(text) => Ok(Some(text)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(Error::io(path, err)),
            }
        })
        .map_err(|err| {
            self.poll_error(err, format!("{stream} of component {index} of map `{}`", self.tag))
        })
    }
}
