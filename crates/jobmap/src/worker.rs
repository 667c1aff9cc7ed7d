//! Execute-side runner for one component.
//!
//! The worker loads the component's input, calls the registered function in
//! a sandbox directory and writes exactly one [`OutputRecord`]: OK with the
//! returned value, or ERROR with a [`ComponentErrorReport`]. Function
//! failures never escape as errors; only infrastructure failures do.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::assembler::{ItemData, JobDescription};
use crate::checkpoint::CheckpointDirs;
use crate::core::{
    Args, ComponentErrorReport, ContentHash, FunctionName, NodeInfo, OutputRecord, OutputStatus,
    RuntimeInfo,
};
use crate::paths::{sandbox_dir, stderr_path, stdout_path, transfer_dir};
use crate::persist::{PersistError, atomic_write, remove_dir_if_exists};
use crate::store::{ContentStore, StoreError};

pub type ComponentResult = Result<Value, Box<dyn std::error::Error + Send + Sync>>;

/// A function that can be mapped over components.
pub type ComponentFn = dyn Fn(&ComponentContext, &Args) -> ComponentResult + Send + Sync;

const ENV_PREFIX: &str = "JOBMAP_";

/// Functions available to workers, by name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<FunctionName, Arc<ComponentFn>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: FunctionName, function: F)
    where
        F: Fn(&ComponentContext, &Args) -> ComponentResult + Send + Sync + 'static,
    {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(function));
    }

    pub fn get(&self, name: &FunctionName) -> Option<Arc<ComponentFn>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// What a running function can see and do.
pub struct ComponentContext {
    component: usize,
    hash: ContentHash,
    tag: String,
    options: std::collections::BTreeMap<String, String>,
    scratch_dir: PathBuf,
    checkpoints: CheckpointDirs,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl ComponentContext {
    pub fn component(&self) -> usize {
        self.component
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Shared options merged with this component's own.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// The sandbox; recovered checkpoint files are placed here.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn println(&self, line: &str) {
        push_line(&self.stdout, line);
    }

    pub fn eprintln(&self, line: &str) {
        push_line(&self.stderr, line);
    }

    /// Atomically replace the current checkpoint with `files`.
    ///
    /// Relative paths are resolved against [`Self::scratch_dir`].
    pub fn checkpoint(&self, files: &[PathBuf]) -> io::Result<()> {
        let files: Vec<PathBuf> = files.iter().map(|f| self.scratch_dir.join(f)).collect();
        self.checkpoints.commit(&files)
    }
}

fn push_line(buffer: &Mutex<String>, line: &str) {
    let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    buffer.push_str(line);
    buffer.push('\n');
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("worker io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WorkerError + '_ {
    move |source| WorkerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of one run, as the scheduler reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub status: OutputStatus,
    pub runtime: Duration,
}

#[derive(Clone)]
pub struct Worker {
    store: ContentStore,
    functions: Arc<FunctionRegistry>,
    scratch_root: PathBuf,
}

impl Worker {
    pub fn new(store: ContentStore, functions: Arc<FunctionRegistry>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            functions,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn sandbox_dir(&self, hash: &ContentHash) -> PathBuf {
        sandbox_dir(&self.scratch_root, hash)
    }

    pub fn transfer_dir(&self, hash: &ContentHash) -> PathBuf {
        transfer_dir(&self.scratch_root, hash)
    }

    pub fn run(&self, job: &JobDescription, item: &ItemData) -> Result<RunReport, WorkerError> {
        let hash = item.hash;
        let sandbox = self.sandbox_dir(&hash);
        let transfer = self.transfer_dir(&hash);
        fs::create_dir_all(&sandbox).map_err(io_err(&sandbox))?;

        let checkpoints = CheckpointDirs::new(&sandbox);
        checkpoints.restore_from(&transfer).map_err(io_err(&transfer))?;
        checkpoints.recover(&transfer).map_err(io_err(&sandbox))?;
        self.transfer_inputs(job, item, &sandbox)?;

        let args = self.store.read_input(&hash)?;
        let mut options = job.shared.clone();
        options.extend(item.options.clone());
        let ctx = ComponentContext {
            component: item.component,
            hash,
            tag: job.batch_name.clone(),
            options,
            scratch_dir: sandbox.clone(),
            checkpoints: checkpoints.clone(),
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
        };

        let started = Instant::now();
        let outcome = match self.functions.get(&job.function) {
            Some(function) => catch_unwind(AssertUnwindSafe(|| function(&ctx, &args)))
                .unwrap_or_else(|panic| Err(panic_message(panic.as_ref()).into())),
            None => Err(format!("function `{}` is not registered on this worker", job.function).into()),
        };
        let runtime = started.elapsed();

        let record = match outcome {
            Ok(value) => OutputRecord::ok(hash, value),
            Err(err) => {
                let trace = error_chain(err.as_ref());
                ctx.eprintln(&err.to_string());
                OutputRecord::error(hash, self.error_report(&ctx, &sandbox, trace, err.to_string()))
            }
        };
        let status = record.status();
        self.write_job_logs(job, &ctx)?;
        self.store.write_output(&record)?;

        match status {
            OutputStatus::Ok => {
                remove_dir_if_exists(&sandbox).map_err(io_err(&sandbox))?;
                remove_dir_if_exists(&transfer).map_err(io_err(&transfer))?;
            }
            OutputStatus::Error => {
                checkpoints
                    .stage_for_transfer(&transfer)
                    .map_err(io_err(&transfer))?;
                remove_dir_if_exists(&sandbox).map_err(io_err(&sandbox))?;
            }
        }

        tracing::debug!(
            tag = %job.batch_name,
            component = item.component,
            %hash,
            status = status.as_str(),
            runtime_ms = runtime.as_millis() as u64,
            "component finished"
        );
        Ok(RunReport { status, runtime })
    }

    fn transfer_inputs(&self, job: &JobDescription, item: &ItemData, sandbox: &Path) -> Result<(), WorkerError> {
        for file in job.fixed_input_files.iter().chain(&item.input_files) {
            let src = Path::new(file);
            let Some(name) = src.file_name() else {
                continue;
            };
            let dst = sandbox.join(name);
            fs::copy(src, &dst).map_err(io_err(src))?;
        }
        Ok(())
    }

    fn write_job_logs(&self, job: &JobDescription, ctx: &ComponentContext) -> Result<(), WorkerError> {
        let stdout = ctx.stdout.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let stderr = ctx.stderr.lock().unwrap_or_else(PoisonError::into_inner).clone();
        atomic_write(&stdout_path(&job.job_logs_dir, &ctx.hash), stdout.as_bytes())?;
        atomic_write(&stderr_path(&job.job_logs_dir, &ctx.hash), stderr.as_bytes())?;
        Ok(())
    }

    fn error_report(
        &self,
        ctx: &ComponentContext,
        sandbox: &Path,
        stack_trace: Vec<String>,
        exception_msg: String,
    ) -> ComponentErrorReport {
        let hostname = nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());

        let mut environment: Vec<String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        environment.push(format!("{ENV_PREFIX}COMPONENT={}", ctx.component));
        environment.push(format!("{ENV_PREFIX}TAG={}", ctx.tag));
        environment.sort();

        let executable = std::env::current_exe()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        ComponentErrorReport {
            component: ctx.component,
            node: NodeInfo {
                hostname,
                address: None,
                timestamp,
                user: std::env::var("USER").ok(),
            },
            runtime: Some(RuntimeInfo {
                executable,
                version: env!("CARGO_PKG_VERSION").to_string(),
                environment,
            }),
            working_dir_contents: list_tree(sandbox),
            stack_trace,
            exception_msg,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

/// Outermost error first, root cause last.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut frames = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        frames.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    frames.reverse();
    frames
}

/// `|-`/`\-` tree of everything under `root`, sorted by name.
fn list_tree(root: &Path) -> Vec<String> {
    let mut lines = vec![root.display().to_string()];
    walk(root, "", &mut lines);
    lines
}

fn walk(dir: &Path, prefix: &str, lines: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(|entry| entry.ok()).collect();
    entries.sort_by_key(|entry| entry.file_name());
    let count = entries.len();
    for (idx, entry) in entries.into_iter().enumerate() {
        let last = idx + 1 == count;
        let name = entry.file_name().to_string_lossy().into_owned();
        lines.push(format!("{prefix}{}{name}", if last { "\\-- " } else { "|-- " }));
        if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "|   " });
            walk(&entry.path(), &child_prefix, lines);
        }
    }
}
