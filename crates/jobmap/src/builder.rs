//! Incremental map construction: collect calls one by one, submit once.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::{Args, MapOptions};
use crate::handle::MapHandle;
use crate::workspace::Workspace;
use crate::Result;

/// Records calls of one function and submits them as a single map.
///
/// Built by [`Workspace::build_map`]. Nothing touches disk until
/// [`MapBuilder::submit`].
#[must_use = "a map builder does nothing until submitted"]
pub struct MapBuilder<'w> {
    workspace: &'w Workspace,
    tag: Option<String>,
    function: String,
    args: Vec<Args>,
    options: MapOptions,
}

impl<'w> MapBuilder<'w> {
    pub(crate) fn new(workspace: &'w Workspace, function: impl Into<String>) -> Self {
        Self {
            workspace,
            tag: None,
            function: function.into(),
            args: Vec::new(),
            options: MapOptions::default(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn options(mut self, options: MapOptions) -> Self {
        self.options = options;
        self
    }

    /// Record one call of the function.
    pub fn call(&mut self, positional: Vec<Value>, keyword: BTreeMap<String, Value>) -> &mut Self {
        self.push(Args::new(positional, keyword))
    }

    pub fn push(&mut self, args: Args) -> &mut Self {
        self.args.push(args);
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn submit(self) -> Result<Arc<MapHandle>> {
        self.workspace
            .submit(self.tag.as_deref(), &self.function, self.args, &self.options)
    }
}
