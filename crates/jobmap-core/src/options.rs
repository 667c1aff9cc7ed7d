//! Submit options attached to a map.
//!
//! Options are either shared by every component (`fixed`) or given once per
//! component (`mapped`, `input_files`). Keys the submission machinery sets
//! itself are reserved and refused regardless of case.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RESERVED_KEYS: &[&str] = &[
    "jobbatchname",
    "universe",
    "arguments",
    "executable",
    "log",
    "output",
    "error",
    "transfer_input_files",
    "transfer_output_files",
    "transfer_output_remaps",
    "should_transfer_files",
    "when_to_transfer_output",
    "jobmap",
    "+jobmap",
];

pub const REQUEST_MEMORY: &str = "request_memory";
pub const REQUEST_DISK: &str = "request_disk";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("{} {} and cannot be used", .keys.join(","), reserved_phrase(.keys.len()))]
    ReservedOptionKeyword { keys: Vec<String> },
    #[error("length of {key} does not match length of input ({key} has {got}, input has {expected})")]
    MisalignedInputData {
        key: String,
        expected: usize,
        got: usize,
    },
}

fn reserved_phrase(count: usize) -> &'static str {
    if count == 1 {
        "is a reserved keyword"
    } else {
        "are reserved keywords"
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    /// Memory request, e.g. `"100MB"`. `None` defers to configuration.
    pub request_memory: Option<String>,
    /// Disk request, e.g. `"1GB"`. `None` defers to configuration.
    pub request_disk: Option<String>,
    /// Files every component receives.
    pub fixed_input_files: Vec<String>,
    /// Extra files per component; one entry per component when present.
    pub input_files: Option<Vec<Vec<String>>>,
    pub fixed: BTreeMap<String, String>,
    pub mapped: BTreeMap<String, Vec<String>>,
}

/// Options after validation against a concrete component count.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOptions {
    pub shared: BTreeMap<String, String>,
    pub per_component: Vec<BTreeMap<String, String>>,
    pub fixed_input_files: Vec<String>,
    pub input_files: Vec<Vec<String>>,
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_memory(mut self, memory: impl Into<String>) -> Self {
        self.request_memory = Some(memory.into());
        self
    }

    pub fn with_request_disk(mut self, disk: impl Into<String>) -> Self {
        self.request_disk = Some(disk.into());
        self
    }

    pub fn with_fixed(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed.insert(key.into(), value.into());
        self
    }

    pub fn with_mapped(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.mapped.insert(key.into(), values);
        self
    }

    pub fn with_fixed_input_file(mut self, path: impl Into<String>) -> Self {
        self.fixed_input_files.push(path.into());
        self
    }

    pub fn with_input_files(mut self, files: Vec<Vec<String>>) -> Self {
        self.input_files = Some(files);
        self
    }

    /// Reject reserved keys in `fixed` or `mapped`, case-insensitively.
    pub fn check_reserved(&self) -> Result<(), OptionsError> {
        let reserved: BTreeSet<String> = self
            .fixed
            .keys()
            .chain(self.mapped.keys())
            .map(|k| k.to_ascii_lowercase())
            .filter(|k| RESERVED_KEYS.contains(&k.as_str()))
            .collect();
        if reserved.is_empty() {
            Ok(())
        } else {
            Err(OptionsError::ReservedOptionKeyword {
                keys: reserved.into_iter().collect(),
            })
        }
    }

    /// Validate against `num_components` and split into shared and
    /// per-component settings.
    pub fn resolve(
        &self,
        num_components: usize,
        default_memory: &str,
        default_disk: &str,
    ) -> Result<ResolvedOptions, OptionsError> {
        self.check_reserved()?;

        let mut shared = self.fixed.clone();
        shared.insert(
            REQUEST_MEMORY.to_string(),
            self.request_memory.clone().unwrap_or_else(|| default_memory.to_string()),
        );
        shared.insert(
            REQUEST_DISK.to_string(),
            self.request_disk.clone().unwrap_or_else(|| default_disk.to_string()),
        );

        let mut per_component = vec![BTreeMap::new(); num_components];
        for (key, values) in &self.mapped {
            if values.len() != num_components {
                return Err(OptionsError::MisalignedInputData {
                    key: key.clone(),
                    expected: num_components,
                    got: values.len(),
                });
            }
            shared.remove(key);
            for (slot, value) in per_component.iter_mut().zip(values) {
                slot.insert(key.clone(), value.clone());
            }
        }

        let input_files = match &self.input_files {
            None => vec![Vec::new(); num_components],
            Some(files) if files.len() != num_components => {
                return Err(OptionsError::MisalignedInputData {
                    key: "input_files".into(),
                    expected: num_components,
                    got: files.len(),
                });
            }
            Some(files) => files.clone(),
        };

        Ok(ResolvedOptions {
            shared,
            per_component,
            fixed_input_files: self.fixed_input_files.clone(),
            input_files,
        })
    }

    /// Layer options like a chain of maps: earlier entries take priority.
    /// `fixed_input_files` accumulate instead of overriding.
    pub fn merge<'a>(layers: impl IntoIterator<Item = &'a MapOptions>) -> MapOptions {
        let layers: Vec<&MapOptions> = layers.into_iter().collect();
        let mut merged = MapOptions::default();
        for layer in layers.iter().rev() {
            merged.fixed.extend(layer.fixed.clone());
            merged.mapped.extend(layer.mapped.clone());
            merged.fixed_input_files.extend(layer.fixed_input_files.iter().cloned());
            if layer.request_memory.is_some() {
                merged.request_memory = layer.request_memory.clone();
            }
            if layer.request_disk.is_some() {
                merged.request_disk = layer.request_disk.clone();
            }
            if layer.input_files.is_some() {
                merged.input_files = layer.input_files.clone();
            }
        }
        merged
    }
}

impl ResolvedOptions {
    /// Options for one component, per-component values overriding shared ones.
    pub fn for_component(&self, component: usize) -> BTreeMap<String, String> {
        let mut options = self.shared.clone();
        if let Some(own) = self.per_component.get(component) {
            options.extend(own.clone());
        }
        options
    }
}
