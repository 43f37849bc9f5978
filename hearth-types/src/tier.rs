//! Dispatch tiers.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the fixed execution queues a session is bound to.
///
/// Each tier processes its own work one unit at a time, in submission
/// order. Tiers run concurrently with respect to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchTier {
    /// The ui-affinity queue. Hosts the main session.
    Main,
    /// The background queue. Hosts the root session, the only writer of
    /// the backing store.
    Background,
    /// Arbitrary pooled threads. Every submission gets a fresh session.
    Worker,
}

impl DispatchTier {
    /// All tiers, in rank order.
    pub const ALL: [DispatchTier; 3] = [Self::Worker, Self::Main, Self::Background];

    /// Position in the nested-wait order.
    ///
    /// A unit running on one tier may block on a submission to another
    /// tier only if the target ranks strictly higher.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Worker => 0,
            Self::Main => 1,
            Self::Background => 2,
        }
    }

    /// Returns true if a unit running on `self` may block waiting for a
    /// unit submitted to `target`.
    #[must_use]
    pub const fn may_wait_on(self, target: Self) -> bool {
        self.rank() <= target.rank()
    }

    /// Human-readable name, also used for thread names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Background => "background",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for DispatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "ui" => Ok(Self::Main),
            "background" => Ok(Self::Background),
            "worker" | "thread" => Ok(Self::Worker),
            other => Err(Error::UnknownTier(other.to_string())),
        }
    }
}
