//! Turns argument tuples into a deduplicated submission.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::SubmitDefaults;
use crate::core::{Args, ContentHash, FunctionName, MapOptions, OutputStatus, Tag};
use crate::paths::Layout;
use crate::store::{BlobKind, ContentStore, PutOutcome, StoreError};
use crate::{Error, Result};

/// Per-component entry of a [`JobDescription`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemData {
    pub component: usize,
    pub hash: ContentHash,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub input_files: Vec<String>,
}

/// Everything a scheduler needs to run the components of one map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    pub batch_name: String,
    pub function: FunctionName,
    pub event_log: PathBuf,
    pub inputs_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub job_logs_dir: PathBuf,
    pub shared: BTreeMap<String, String>,
    #[serde(default)]
    pub fixed_input_files: Vec<String>,
    pub items: Vec<ItemData>,
}

impl JobDescription {
    /// The first item for each of `keys`, in key order.
    pub fn items_for<'a>(&'a self, keys: &'a [ContentHash]) -> impl Iterator<Item = &'a ItemData> + 'a {
        keys.iter()
            .filter_map(|key| self.items.iter().find(|item| item.hash == *key))
    }

    /// Point the per-map paths at `tag`'s directory.
    pub fn retarget(&mut self, layout: &Layout, tag: &Tag) {
        self.batch_name = tag.as_str().to_string();
        self.event_log = layout.event_log_path(tag);
        self.job_logs_dir = layout.job_logs_dir(tag);
    }
}

#[derive(Debug)]
pub struct Assembly {
    /// Hashes to queue, each at most once, in first-seen order.
    pub new_hashes: Vec<ContentHash>,
    /// One hash per component, in input order.
    pub all_hashes: Vec<ContentHash>,
    /// Hashes whose OK output already existed.
    pub cached: Vec<ContentHash>,
    pub job: JobDescription,
    /// Input blobs this assembly created; deleted again if submission fails.
    pub written_inputs: Vec<ContentHash>,
}

pub struct SubmissionAssembler<'a> {
    store: &'a ContentStore,
    layout: &'a Layout,
    defaults: &'a SubmitDefaults,
}

impl<'a> SubmissionAssembler<'a> {
    pub fn new(store: &'a ContentStore, layout: &'a Layout, defaults: &'a SubmitDefaults) -> Self {
        Self {
            store,
            layout,
            defaults,
        }
    }

    pub fn assemble(
        &self,
        tag: &Tag,
        function: &FunctionName,
        args: &[Args],
        options: &MapOptions,
    ) -> Result<Assembly> {
        if args.is_empty() {
            return Err(Error::EmptyMap);
        }
        let resolved = options.resolve(
            args.len(),
            &self.defaults.request_memory,
            &self.defaults.request_disk,
        )?;

        let mut all_hashes = Vec::with_capacity(args.len());
        let mut new_hashes = Vec::new();
        let mut cached = Vec::new();
        let mut written_inputs = Vec::new();
        let mut seen = HashSet::new();

        for arg in args {
            let (hash, outcome) = self.store.put_input(function, arg)?;
            all_hashes.push(hash);
            if outcome == PutOutcome::Written {
                written_inputs.push(hash);
            }
            if !seen.insert(hash) {
                continue;
            }
            if self.is_satisfied(&hash)? {
                cached.push(hash);
            } else {
                new_hashes.push(hash);
            }
        }

        let items = all_hashes
            .iter()
            .enumerate()
            .map(|(component, hash)| ItemData {
                component,
                hash: *hash,
                options: resolved.per_component.get(component).cloned().unwrap_or_default(),
                input_files: resolved.input_files.get(component).cloned().unwrap_or_default(),
            })
            .collect();

        let job = JobDescription {
            batch_name: tag.as_str().to_string(),
            function: function.clone(),
            event_log: self.layout.event_log_path(tag),
            inputs_dir: self.layout.inputs_dir(),
            outputs_dir: self.layout.outputs_dir(),
            job_logs_dir: self.layout.job_logs_dir(tag),
            shared: resolved.shared,
            fixed_input_files: resolved.fixed_input_files,
            items,
        };

        tracing::debug!(
            %tag,
            components = all_hashes.len(),
            new = new_hashes.len(),
            cached = cached.len(),
            "assembled submission"
        );

        Ok(Assembly {
            new_hashes,
            all_hashes,
            cached,
            job,
            written_inputs,
        })
    }

    /// Only an OK output satisfies a hash. An ERROR output stays in place
    /// for the maps that already show it until the new run replaces it.
    fn is_satisfied(&self, hash: &ContentHash) -> std::result::Result<bool, StoreError> {
        match self.store.output_status(hash)? {
            Some(OutputStatus::Ok) => Ok(true),
            Some(OutputStatus::Error) => {
                tracing::debug!(%hash, "requeueing hash with an errored output");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Undo the input writes of a failed submission.
    pub fn rollback(&self, assembly: &Assembly) {
        for hash in &assembly.written_inputs {
            if let Err(err) = self.store.delete(BlobKind::Input, hash) {
                tracing::warn!(%hash, "failed to roll back input blob: {err}");
            }
        }
    }
}
