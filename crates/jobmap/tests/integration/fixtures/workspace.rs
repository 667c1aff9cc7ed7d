#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use jobmap::paths::Layout;
use jobmap::{Config, ContentStore, FunctionRegistry, LocalScheduler, RunMode, Scheduler, Worker, Workspace};
use tempfile::TempDir;

use super::functions;
use super::scheduler::LaggingScheduler;

pub const POLL_MS: u64 = 2;
pub const PATIENCE: Option<Duration> = Some(Duration::from_secs(10));

pub fn config(root: &Path) -> Config {
    Config {
        poll_interval_ms: POLL_MS,
        ..Config::for_root(root)
    }
}

/// A workspace in a temp dir, driven by an in-process scheduler.
pub struct TempWorkspace {
    pub dir: TempDir,
    pub scheduler: Arc<LocalScheduler>,
    pub functions: Arc<FunctionRegistry>,
    pub flaky_calls: Arc<AtomicUsize>,
    /// Set when the workspace submits through a [`LaggingScheduler`].
    pub lagging: Option<Arc<LaggingScheduler>>,
    facade: Arc<dyn Scheduler>,
    pub workspace: Workspace,
}

impl TempWorkspace {
    pub fn new(mode: RunMode) -> Self {
        Self::build(mode, false)
    }

    /// Submissions go through a [`LaggingScheduler`] over the local one.
    pub fn lagging(mode: RunMode) -> Self {
        Self::build(mode, true)
    }

    fn build(mode: RunMode, lag: bool) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let layout = Layout::new(dir.path());
        let (functions, flaky_calls) = functions::registry();
        let store = ContentStore::new(&layout, Duration::from_millis(POLL_MS));
        let worker = Worker::new(store, Arc::clone(&functions), layout.scratch_dir());
        let scheduler = Arc::new(LocalScheduler::new(worker, mode));
        let lagging = lag.then(|| Arc::new(LaggingScheduler::new(Arc::clone(&scheduler))));
        let facade: Arc<dyn Scheduler> = match &lagging {
            Some(lagging) => Arc::clone(lagging) as Arc<dyn Scheduler>,
            None => Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        };
        let workspace = Workspace::open(config(dir.path()), Arc::clone(&facade)).expect("open workspace");
        Self {
            dir,
            scheduler,
            functions,
            flaky_calls,
            lagging,
            facade,
            workspace,
        }
    }

    pub fn immediate() -> Self {
        Self::new(RunMode::Immediate)
    }

    pub fn manual() -> Self {
        Self::new(RunMode::Manual)
    }

    /// A second workspace over the same root with its own registry, as a
    /// new process would see it.
    pub fn reopen(&self) -> Workspace {
        Workspace::open(config(self.dir.path()), Arc::clone(&self.facade)).expect("reopen workspace")
    }

    pub fn layout(&self) -> &Layout {
        self.workspace.layout()
    }
}

impl std::ops::Deref for TempWorkspace {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.workspace
    }
}
