//! Per-component lifecycle status and the aggregates derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of one component.
///
/// Every component starts `Unmaterialized` and moves only when an event for
/// it is folded into the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentStatus {
    Unmaterialized,
    Idle,
    Running,
    Held,
    Suspended,
    Removed,
    Completed,
    Errored,
}

crate::enum_str! {
    impl ComponentStatus {
        pub fn as_str(&self) -> &'static str;
        fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Unmaterialized => ["UNMATERIALIZED"],
            Idle => ["IDLE"],
            Running => ["RUNNING"],
            Held => ["HELD"],
            Suspended => ["SUSPENDED"],
            Removed => ["REMOVED"],
            Completed => ["COMPLETED"],
            Errored => ["ERRORED"],
        }
    }
}

impl ComponentStatus {
    pub const ALL: [ComponentStatus; 8] = [
        ComponentStatus::Unmaterialized,
        ComponentStatus::Idle,
        ComponentStatus::Running,
        ComponentStatus::Held,
        ComponentStatus::Suspended,
        ComponentStatus::Removed,
        ComponentStatus::Completed,
        ComponentStatus::Errored,
    ];

    /// Statuses shown in progress summaries, in display order.
    pub const DISPLAY: [ComponentStatus; 5] = [
        ComponentStatus::Held,
        ComponentStatus::Errored,
        ComponentStatus::Idle,
        ComponentStatus::Running,
        ComponentStatus::Completed,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::parse_str(&raw.trim().to_ascii_uppercase())
    }

    /// No further scheduler activity is expected for a component in this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Removed | Self::Completed | Self::Errored)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Histogram over the eight statuses, maintained incrementally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts([usize; 8]);

impl StatusCounts {
    /// Counts for `n` components that have not seen any event yet.
    pub fn unmaterialized(n: usize) -> Self {
        let mut counts = Self::default();
        counts.0[ComponentStatus::Unmaterialized.index()] = n;
        counts
    }

    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a ComponentStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.0[status.index()] += 1;
        }
        counts
    }

    pub fn get(&self, status: ComponentStatus) -> usize {
        self.0[status.index()]
    }

    /// Move one component from `from` to `to`.
    pub fn transition(&mut self, from: ComponentStatus, to: ComponentStatus) {
        let slot = &mut self.0[from.index()];
        *slot = slot.saturating_sub(1);
        self.0[to.index()] += 1;
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentStatus, usize)> + '_ {
        ComponentStatus::ALL.iter().map(|s| (*s, self.get(*s)))
    }
}

/// Administrative hold on a component, as reported by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHold {
    pub code: i64,
    pub reason: String,
}

impl ComponentHold {
    pub const UNKNOWN_REASON: &'static str = "UNKNOWN";

    pub fn new(code: i64, reason: Option<&str>) -> Self {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(Self::UNKNOWN_REASON)
            .to_string();
        Self { code, reason }
    }
}

impl fmt::Display for ComponentHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.reason)
    }
}
