//! Overflow policy for bounded outbound queues.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What an outbound queue does when a payload arrives while it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Leave the queue untouched and report the payload as rejected. The hub
    /// disconnects the slow consumer.
    #[default]
    RejectNewest,
    /// Evict the oldest pending payload to make room for the new one.
    DropOldest,
}

impl OverflowPolicy {
    /// Stable kebab-case name used by the CLI and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RejectNewest => "reject-newest",
            Self::DropOldest => "drop-oldest",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    /// Accepts kebab-case, camelCase and snake_case spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "rejectnewest" | "reject" => Ok(Self::RejectNewest),
            "dropoldest" | "drop" => Ok(Self::DropOldest),
            _ => Err(format!("unknown overflow policy: {s}")),
        }
    }
}
