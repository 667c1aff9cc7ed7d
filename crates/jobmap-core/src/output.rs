//! Output records written by the worker, one per content hash.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::ContentHash;

const REPORT_WIDTH: usize = 80;

/// Whether the component function returned or failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputStatus {
    Ok,
    Error,
}

crate::enum_str! {
    impl OutputStatus {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Ok => ["OK"],
            Error => ["ERROR", "ERR"],
        }
    }
}

/// The result of running one component, stored under its input hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub hash: ContentHash,
    #[serde(flatten)]
    pub payload: OutputPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum OutputPayload {
    #[serde(rename = "OK")]
    Ok { value: Value },
    #[serde(rename = "ERROR", alias = "ERR")]
    Error { error: Box<ComponentErrorReport> },
}

impl OutputRecord {
    pub fn ok(hash: ContentHash, value: Value) -> Self {
        Self {
            hash,
            payload: OutputPayload::Ok { value },
        }
    }

    pub fn error(hash: ContentHash, report: ComponentErrorReport) -> Self {
        Self {
            hash,
            payload: OutputPayload::Error {
                error: Box::new(report),
            },
        }
    }

    pub fn status(&self) -> OutputStatus {
        match self.payload {
            OutputPayload::Ok { .. } => OutputStatus::Ok,
            OutputPayload::Error { .. } => OutputStatus::Error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == OutputStatus::Ok
    }
}

/// Where a component ran.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// RFC 3339 timestamp of the failure.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// The process the component ran in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub executable: String,
    pub version: String,
    /// `KEY=VALUE` pairs relevant to the run.
    #[serde(default)]
    pub environment: Vec<String>,
}

/// Everything captured on the execute side when a component fails.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentErrorReport {
    pub component: usize,
    pub node: NodeInfo,
    #[serde(default)]
    pub runtime: Option<RuntimeInfo>,
    #[serde(default)]
    pub working_dir_contents: Vec<String>,
    #[serde(default)]
    pub stack_trace: Vec<String>,
    pub exception_msg: String,
}

impl ComponentErrorReport {
    /// Human-readable multi-line report.
    pub fn report(&self, tag: &str) -> String {
        let mut out = String::new();
        let start = format!("  Start error report for component {} of map {}  ", self.component, tag);
        let end = format!("  End error report for component {} of map {}  ", self.component, tag);

        let _ = writeln!(out, "{start:=^REPORT_WIDTH$}");
        let _ = writeln!(
            out,
            "Landed on execute node {} ({}) at {}",
            self.node.hostname,
            self.node.address.as_deref().unwrap_or("unknown address"),
            self.node.timestamp,
        );
        if let Some(user) = &self.node.user {
            let _ = writeln!(out, "Running as user {user}");
        }

        match &self.runtime {
            Some(runtime) => {
                let _ = writeln!(
                    out,
                    "\nRuntime executable is {} (version {})",
                    runtime.executable, runtime.version
                );
                let _ = writeln!(out, "with environment");
                for var in &runtime.environment {
                    let _ = writeln!(out, "  {var}");
                }
            }
            None => {
                let _ = writeln!(out, "\nRuntime information not available");
            }
        }

        let _ = writeln!(out, "\nWorking directory contents are");
        for path in &self.working_dir_contents {
            let _ = writeln!(out, "  {path}");
        }

        let _ = writeln!(out, "\nError and backtrace (most recent call last):");
        for frame in &self.stack_trace {
            let _ = writeln!(out, "  {frame}");
        }
        for line in self.exception_msg.lines() {
            let _ = writeln!(out, "  {line}");
        }

        let _ = writeln!(out);
        let _ = write!(out, "{end:=^REPORT_WIDTH$}");
        out
    }
}
