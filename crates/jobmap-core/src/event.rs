//! Scheduler event records.
//!
//! The scheduler appends one [`RawEvent`] per line to a map's event log. A
//! raw event is a kind name, the `(cluster, proc)` pair it concerns and a bag
//! of named fields. [`JobEvent::decode`] turns it into a typed [`EventBody`],
//! checking the required fields of each kind.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::identity::{ClusterId, ContentHash, ProcId};
use crate::status::{ComponentHold, ComponentStatus};

/// Field names carried in event payloads.
pub mod fields {
    /// Correlation key (content hash) attached at submission.
    pub const LOG_NOTES: &str = "LogNotes";
    pub const EXECUTE_HOST: &str = "ExecuteHost";
    pub const RUN_REMOTE_USAGE: &str = "RunRemoteUsage";
    pub const RETURN_VALUE: &str = "ReturnValue";
    pub const HOLD_REASON_CODE: &str = "HoldReasonCode";
    pub const HOLD_REASON: &str = "HoldReason";
    pub const MEMORY_USAGE: &str = "MemoryUsage";
    pub const REASON: &str = "Reason";
}

/// Known event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Submit,
    Execute,
    Terminated,
    Held,
    Released,
    Suspended,
    Unsuspended,
    Aborted,
    Evicted,
    ImageSize,
    ShadowException,
    ReconnectFailed,
}

crate::enum_str! {
    impl EventKind {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Submit => ["SUBMIT"],
            Execute => ["EXECUTE"],
            Terminated => ["TERMINATED", "JOB_TERMINATED"],
            Held => ["HELD", "JOB_HELD"],
            Released => ["RELEASED", "JOB_RELEASED"],
            Suspended => ["SUSPENDED", "JOB_SUSPENDED"],
            Unsuspended => ["UNSUSPENDED", "JOB_UNSUSPENDED"],
            Aborted => ["ABORTED", "JOB_ABORTED"],
            Evicted => ["EVICTED", "JOB_EVICTED"],
            ImageSize => ["IMAGE_SIZE"],
            ShadowException => ["SHADOW_EXCEPTION"],
            ReconnectFailed => ["RECONNECT_FAILED", "JOB_RECONNECT_FAILED"],
        }
    }
}

/// One line of the event log, before any field validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub cluster: ClusterId,
    pub proc: ProcId,
    #[serde(default)]
    pub time_ms: u64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>, cluster: ClusterId, proc: ProcId, time_ms: u64) -> Self {
        Self {
            kind: kind.into(),
            cluster,
            proc,
            time_ms,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    fn required(&self, name: &'static str) -> Result<&Value, EventDecodeError> {
        self.fields
            .get(name)
            .ok_or_else(|| EventDecodeError::MissingField {
                kind: self.kind.clone(),
                field: name,
            })
    }

    fn optional_str(&self, name: &'static str) -> Result<Option<String>, EventDecodeError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(name, format!("expected string, got {other}"))),
        }
    }

    fn int_field(&self, name: &'static str, value: &Value) -> Result<i64, EventDecodeError> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| self.invalid(name, format!("not an integer: {n}"))),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| self.invalid(name, format!("not an integer: {s:?}"))),
            other => Err(self.invalid(name, format!("expected integer, got {other}"))),
        }
    }

    fn optional_int(&self, name: &'static str) -> Result<Option<i64>, EventDecodeError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.int_field(name, value).map(Some),
        }
    }

    fn invalid(&self, name: &'static str, reason: String) -> EventDecodeError {
        EventDecodeError::InvalidField {
            kind: self.kind.clone(),
            field: name,
            reason,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    #[error("{kind} event is missing required field `{field}`")]
    MissingField { kind: String, field: &'static str },
    #[error("{kind} event has invalid field `{field}`: {reason}")]
    InvalidField {
        kind: String,
        field: &'static str,
        reason: String,
    },
}

/// Typed payload of an event.
#[derive(Clone, Debug, PartialEq)]
pub enum EventBody {
    Submit { correlation_key: ContentHash },
    Execute { host: Option<String> },
    Terminated {
        run_remote_usage: Option<Duration>,
        return_value: Option<i64>,
    },
    Held { hold: ComponentHold },
    Released,
    Suspended,
    Unsuspended,
    Aborted { reason: Option<String> },
    Evicted,
    ImageSize { memory_usage_mb: u64 },
    ShadowException,
    ReconnectFailed,
    /// A kind this crate does not interpret; kept so the cursor can pass it.
    Other { kind: String },
}

impl EventBody {
    pub fn kind(&self) -> Option<EventKind> {
        Some(match self {
            EventBody::Submit { .. } => EventKind::Submit,
            EventBody::Execute { .. } => EventKind::Execute,
            EventBody::Terminated { .. } => EventKind::Terminated,
            EventBody::Held { .. } => EventKind::Held,
            EventBody::Released => EventKind::Released,
            EventBody::Suspended => EventKind::Suspended,
            EventBody::Unsuspended => EventKind::Unsuspended,
            EventBody::Aborted { .. } => EventKind::Aborted,
            EventBody::Evicted => EventKind::Evicted,
            EventBody::ImageSize { .. } => EventKind::ImageSize,
            EventBody::ShadowException => EventKind::ShadowException,
            EventBody::ReconnectFailed => EventKind::ReconnectFailed,
            EventBody::Other { .. } => return None,
        })
    }

    pub fn kind_name(&self) -> &str {
        match self {
            EventBody::Other { kind } => kind.as_str(),
            body => body.kind().map(|k| k.as_str()).unwrap_or("UNKNOWN"),
        }
    }

    /// Status a component moves to when this event is folded.
    ///
    /// `Terminated` maps to `Completed`; the caller must still confirm the
    /// output record before trusting it.
    pub fn target_status(&self) -> Option<ComponentStatus> {
        match self {
            EventBody::Submit { .. }
            | EventBody::Evicted
            | EventBody::Unsuspended
            | EventBody::Released
            | EventBody::ShadowException
            | EventBody::ReconnectFailed => Some(ComponentStatus::Idle),
            EventBody::Execute { .. } => Some(ComponentStatus::Running),
            EventBody::Held { .. } => Some(ComponentStatus::Held),
            EventBody::Suspended => Some(ComponentStatus::Suspended),
            EventBody::Aborted { .. } => Some(ComponentStatus::Removed),
            EventBody::Terminated { .. } => Some(ComponentStatus::Completed),
            EventBody::ImageSize { .. } | EventBody::Other { .. } => None,
        }
    }
}

/// A decoded event for one `(cluster, proc)` job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobEvent {
    pub cluster: ClusterId,
    pub proc: ProcId,
    pub time_ms: u64,
    pub body: EventBody,
}

impl JobEvent {
    pub fn new(cluster: ClusterId, proc: ProcId, time_ms: u64, body: EventBody) -> Self {
        Self {
            cluster,
            proc,
            time_ms,
            body,
        }
    }

    pub fn decode(raw: &RawEvent) -> Result<Self, EventDecodeError> {
        let body = match EventKind::parse_str(raw.kind.trim()) {
            None => EventBody::Other {
                kind: raw.kind.clone(),
            },
            Some(EventKind::Submit) => {
                let notes = raw.required(fields::LOG_NOTES)?;
                let key = notes.as_str().ok_or_else(|| {
                    raw.invalid(fields::LOG_NOTES, format!("expected string, got {notes}"))
                })?;
                let correlation_key = ContentHash::from_hex(key.trim())
                    .map_err(|err| raw.invalid(fields::LOG_NOTES, err.to_string()))?;
                EventBody::Submit { correlation_key }
            }
            Some(EventKind::Execute) => EventBody::Execute {
                host: raw.optional_str(fields::EXECUTE_HOST)?,
            },
            Some(EventKind::Terminated) => {
                let run_remote_usage = match raw.optional_str(fields::RUN_REMOTE_USAGE)? {
                    None => None,
                    Some(usage) => Some(parse_runtime(&usage).ok_or_else(|| {
                        raw.invalid(fields::RUN_REMOTE_USAGE, format!("unparseable usage {usage:?}"))
                    })?),
                };
                EventBody::Terminated {
                    run_remote_usage,
                    return_value: raw.optional_int(fields::RETURN_VALUE)?,
                }
            }
            Some(EventKind::Held) => {
                let code_value = raw.required(fields::HOLD_REASON_CODE)?;
                let code = raw.int_field(fields::HOLD_REASON_CODE, code_value)?;
                let reason = raw.optional_str(fields::HOLD_REASON)?;
                EventBody::Held {
                    hold: ComponentHold::new(code, reason.as_deref()),
                }
            }
            Some(EventKind::Released) => EventBody::Released,
            Some(EventKind::Suspended) => EventBody::Suspended,
            Some(EventKind::Unsuspended) => EventBody::Unsuspended,
            Some(EventKind::Aborted) => EventBody::Aborted {
                reason: raw.optional_str(fields::REASON)?,
            },
            Some(EventKind::Evicted) => EventBody::Evicted,
            Some(EventKind::ImageSize) => {
                let usage = raw.optional_int(fields::MEMORY_USAGE)?.unwrap_or(0);
                EventBody::ImageSize {
                    memory_usage_mb: u64::try_from(usage).map_err(|_| {
                        raw.invalid(fields::MEMORY_USAGE, format!("negative usage {usage}"))
                    })?,
                }
            }
            Some(EventKind::ShadowException) => EventBody::ShadowException,
            Some(EventKind::ReconnectFailed) => EventBody::ReconnectFailed,
        };
        Ok(Self::new(raw.cluster, raw.proc, raw.time_ms, body))
    }

    /// Inverse of [`JobEvent::decode`], used by schedulers writing the log.
    pub fn to_raw(&self) -> RawEvent {
        let raw = RawEvent::new(self.body.kind_name(), self.cluster, self.proc, self.time_ms);
        match &self.body {
            EventBody::Submit { correlation_key } => {
                raw.with_field(fields::LOG_NOTES, correlation_key.to_hex())
            }
            EventBody::Execute { host: Some(host) } => {
                raw.with_field(fields::EXECUTE_HOST, host.as_str())
            }
            EventBody::Terminated {
                run_remote_usage,
                return_value,
            } => {
                let mut raw = raw;
                if let Some(usage) = run_remote_usage {
                    raw = raw.with_field(fields::RUN_REMOTE_USAGE, format_runtime(*usage));
                }
                if let Some(code) = return_value {
                    raw = raw.with_field(fields::RETURN_VALUE, *code);
                }
                raw
            }
            EventBody::Held { hold } => raw
                .with_field(fields::HOLD_REASON_CODE, hold.code)
                .with_field(fields::HOLD_REASON, hold.reason.as_str()),
            EventBody::Aborted {
                reason: Some(reason),
            } => raw.with_field(fields::REASON, reason.as_str()),
            EventBody::ImageSize { memory_usage_mb } => {
                raw.with_field(fields::MEMORY_USAGE, *memory_usage_mb)
            }
            _ => raw,
        }
    }
}

/// Parse a remote usage string of the form `Usr D HH:MM:SS, Sys D HH:MM:SS`
/// into the sum of user and system time.
pub fn parse_runtime(raw: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut parts = 0;
    for part in raw.split(',') {
        let mut words = part.split_whitespace();
        let _label = words.next()?;
        let days: u64 = words.next()?.parse().ok()?;
        let mut hms = words.next()?.split(':');
        let h: u64 = hms.next()?.parse().ok()?;
        let m: u64 = hms.next()?.parse().ok()?;
        let s: u64 = hms.next()?.parse().ok()?;
        if hms.next().is_some() || words.next().is_some() {
            return None;
        }
        total += Duration::from_secs(((days * 24 + h) * 60 + m) * 60 + s);
        parts += 1;
    }
    (parts == 2).then_some(total)
}

/// Render a duration as remote usage with all time attributed to the user.
pub fn format_runtime(usage: Duration) -> String {
    let secs = usage.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    format!(
        "Usr {days} {:02}:{:02}:{:02}, Sys 0 00:00:00",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}
