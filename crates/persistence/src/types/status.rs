//! Per-version lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a stored version.
///
/// Every mutation of a logical resource produces a new immutable version
/// whose `documentStatus` moves through this state machine. At steady state
/// the head of a version chain is `Available` or `Deleted`; the remaining
/// states are transient and double as locks for bundle transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Staged by a bundle, not yet committed. Hidden from current reads.
    Pending,
    /// Held by an in-flight transaction.
    Locked,
    /// Committed and visible.
    Available,
    /// Staged for deletion, not yet committed.
    PendingDelete,
    /// Logically deleted.
    Deleted,
}

impl DocumentStatus {
    /// The stored string token for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Locked => "LOCKED",
            Self::Available => "AVAILABLE",
            Self::PendingDelete => "PENDING_DELETE",
            Self::Deleted => "DELETED",
        }
    }

    /// Returns `true` for the transient states that act as locks.
    ///
    /// An expired lock on an item in one of these states may be forcibly
    /// reclaimed by a conflicting writer.
    pub fn is_reclaimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Locked | Self::PendingDelete)
    }

    /// Returns `true` if an item in this status is visible to "current
    /// resource" reads.
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Available | Self::Locked | Self::PendingDelete)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "LOCKED" => Ok(Self::Locked),
            "AVAILABLE" => Ok(Self::Available),
            "PENDING_DELETE" => Ok(Self::PendingDelete),
            "DELETED" => Ok(Self::Deleted),
            _ => Err(format!("unknown document status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Locked,
            DocumentStatus::Available,
            DocumentStatus::PendingDelete,
            DocumentStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_reclaimable_set() {
        assert!(DocumentStatus::Pending.is_reclaimable());
        assert!(DocumentStatus::Locked.is_reclaimable());
        assert!(DocumentStatus::PendingDelete.is_reclaimable());
        assert!(!DocumentStatus::Available.is_reclaimable());
        assert!(!DocumentStatus::Deleted.is_reclaimable());
    }

    #[test]
    fn test_readable_set() {
        assert!(DocumentStatus::Available.is_readable());
        assert!(DocumentStatus::Locked.is_readable());
        assert!(DocumentStatus::PendingDelete.is_readable());
        assert!(!DocumentStatus::Pending.is_readable());
        assert!(!DocumentStatus::Deleted.is_readable());
    }

    #[test]
    fn test_serde_tokens() {
        let json = serde_json::to_string(&DocumentStatus::PendingDelete).unwrap();
        assert_eq!(json, "\"PENDING_DELETE\"");
    }
}
