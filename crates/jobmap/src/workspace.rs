//! Entry point: submit, load and manage maps under one root directory.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::assembler::{Assembly, SubmissionAssembler};
use crate::builder::MapBuilder;
use crate::config::Config;
use crate::core::{Args, ComponentStatus, FunctionName, MapIdentity, MapOptions, Tag, zip_args_and_kwargs};
use crate::handle::{MapContext, MapHandle};
use crate::paths::Layout;
use crate::persist::{remove_dir_if_exists, write_json};
use crate::registry::MapRegistry;
use crate::scheduler::Scheduler;
use crate::store::ContentStore;
use crate::tags::random_tag;
use crate::{Error, Result};

pub struct Workspace {
    config: Config,
    ctx: Arc<MapContext>,
}

impl Workspace {
    /// Open (creating if needed) the root named by `config`.
    pub fn open(config: Config, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        Self::with_registry(config, scheduler, Arc::new(MapRegistry::new()))
    }

    /// Like [`Self::open`], sharing `registry` with other workspaces so that
    /// each tag has at most one live handle across all of them.
    pub fn with_registry(
        config: Config,
        scheduler: Arc<dyn Scheduler>,
        registry: Arc<MapRegistry>,
    ) -> Result<Self> {
        let layout = Layout::new(config.root());
        layout
            .ensure()
            .map_err(|err| Error::io(layout.root(), err))?;
        let store = ContentStore::new(&layout, config.poll_interval());
        tracing::debug!(root = %layout.root().display(), "opened workspace");
        Ok(Self {
            config,
            ctx: Arc::new(MapContext {
                layout,
                store,
                scheduler,
                registry,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.ctx.layout
    }

    pub fn store(&self) -> &ContentStore {
        &self.ctx.store
    }

    pub fn registry(&self) -> &Arc<MapRegistry> {
        &self.ctx.registry
    }

    /// Map `function` over `args`, one component per value. `kwargs` are
    /// passed to every call.
    pub fn map(
        &self,
        tag: Option<&str>,
        function: &str,
        args: impl IntoIterator<Item = Value>,
        kwargs: BTreeMap<String, Value>,
        options: &MapOptions,
    ) -> Result<Arc<MapHandle>> {
        let args = args
            .into_iter()
            .map(|value| Args::new(vec![value], kwargs.clone()))
            .collect();
        self.submit(tag, function, args, options)
    }

    /// Map `function` over positional tuples and keyword mappings paired
    /// index-wise; the shorter side is padded with empty arguments.
    pub fn starmap(
        &self,
        tag: Option<&str>,
        function: &str,
        positional: impl IntoIterator<Item = Vec<Value>>,
        keyword: impl IntoIterator<Item = BTreeMap<String, Value>>,
        options: &MapOptions,
    ) -> Result<Arc<MapHandle>> {
        let args = zip_args_and_kwargs(positional, keyword).collect();
        self.submit(tag, function, args, options)
    }

    pub fn build_map(&self, function: impl Into<String>) -> MapBuilder<'_> {
        MapBuilder::new(self, function)
    }

    /// Create a map from fully formed argument sets.
    ///
    /// Inputs with an OK output already in the store are not resubmitted.
    /// If anything fails after the map directory was created, the directory
    /// and the input blobs this call wrote are removed again.
    pub fn submit(
        &self,
        tag: Option<&str>,
        function: &str,
        args: Vec<Args>,
        options: &MapOptions,
    ) -> Result<Arc<MapHandle>> {
        let function = FunctionName::parse(function)?;
        let layout = &self.ctx.layout;
        let tag = match tag {
            Some(raw) => Tag::parse(raw)?,
            None => self.random_tag(),
        };
        if layout.map_dir(&tag).exists() {
            return Err(Error::MapAlreadyExists { tag });
        }

        let assembler = SubmissionAssembler::new(&self.ctx.store, layout, &self.config.submit);
        let assembly = assembler.assemble(&tag, &function, &args, options)?;
        let mut identity = MapIdentity::new(tag.clone(), assembly.all_hashes.clone());

        if let Err(err) = self.persist_and_submit(&assembly, &mut identity) {
            let dir = layout.map_dir(&tag);
            if let Err(cleanup) = remove_dir_if_exists(&dir) {
                tracing::warn!(%tag, "failed to remove map directory after failed submission: {cleanup}");
            }
            assembler.rollback(&assembly);
            tracing::warn!(%tag, "submission failed: {err}");
            return Err(err);
        }

        tracing::info!(
            %tag,
            function = function.as_str(),
            components = assembly.all_hashes.len(),
            submitted = assembly.new_hashes.len(),
            cached = assembly.cached.len(),
            "created map"
        );
        let Assembly {
            job,
            cached,
            new_hashes,
            ..
        } = assembly;
        MapHandle::create(Arc::clone(&self.ctx), identity, job, &cached, &new_hashes)
    }

    fn persist_and_submit(&self, assembly: &Assembly, identity: &mut MapIdentity) -> Result<()> {
        let layout = &self.ctx.layout;
        let tag = &identity.tag;
        write_json(&layout.identity_path(tag), &*identity)?;
        write_json(&layout.job_path(tag), &assembly.job)?;
        if assembly.new_hashes.is_empty() {
            return Ok(());
        }
        let cluster = self.ctx.scheduler.submit(&assembly.job, &assembly.new_hashes)?;
        tracing::info!(tag = %identity.tag, cluster_id = %cluster, "submitted map");
        identity.cluster_ids.push(cluster);
        write_json(&layout.identity_path(&identity.tag), &*identity)?;
        Ok(())
    }

    pub fn load(&self, tag: &str) -> Result<Arc<MapHandle>> {
        let tag = Tag::parse(tag)?;
        if !self.ctx.exists(&tag) {
            return Err(Error::MapNotFound { tag });
        }
        self.ctx.load(&tag)
    }

    pub fn remove(&self, tag: &str) -> Result<()> {
        self.load(tag)?.remove()
    }

    /// Tags of every persisted map, sorted.
    pub fn tags(&self) -> Result<Vec<Tag>> {
        self.ctx.all_tags()
    }

    /// Remove finished maps, or every map when `all` is set. Returns the
    /// removed tags.
    pub fn clean(&self, all: bool) -> Result<Vec<Tag>> {
        let mut removed = Vec::new();
        for tag in self.tags()? {
            let handle = match self.ctx.load(&tag) {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::warn!(%tag, "skipping map that failed to load: {err}");
                    continue;
                }
            };
            if all || handle.is_done()? {
                handle.remove()?;
                removed.push(tag);
            }
        }
        Ok(removed)
    }

    /// One row per map with its status counts.
    pub fn status_table(&self) -> Result<String> {
        let mut header = vec!["Tag".to_string(), "Components".to_string()];
        header.extend(ComponentStatus::DISPLAY.iter().map(|s| s.as_str().to_string()));

        let mut rows = vec![header];
        for tag in self.tags()? {
            let handle = self.ctx.load(&tag)?;
            let counts = handle.status_counts()?;
            let mut row = vec![tag.to_string(), handle.len().to_string()];
            row.extend(ComponentStatus::DISPLAY.iter().map(|s| counts.get(*s).to_string()));
            rows.push(row);
        }

        let widths: Vec<usize> = (0..rows[0].len())
            .map(|col| rows.iter().map(|row| row[col].len()).max().unwrap_or(0))
            .collect();
        let mut out = String::new();
        for (i, row) in rows.iter().enumerate() {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(col, (cell, width))| {
                    if col == 0 {
                        format!("{cell:<width$}")
                    } else {
                        format!("{cell:>width$}")
                    }
                })
                .collect();
            out.push_str(cells.join(" | ").trim_end());
            out.push('\n');
            if i == 0 {
                let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
                out.push_str(&rule.join("-+-"));
                out.push('\n');
            }
        }
        Ok(out)
    }

    /// A fresh tag no map in this workspace uses.
    pub fn random_tag(&self) -> Tag {
        random_tag(|tag| self.ctx.layout.map_dir(tag).exists())
    }
}
