/// Status definitions for frontier links
///
/// A link only moves `Pending -> Claimed -> Done`. The single backward move,
/// `Claimed -> Pending`, is reserved for stale-claim recovery.
use std::fmt;

/// Represents the current status of a link in the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkStatus {
    /// Discovered and waiting for a worker
    Pending,

    /// A worker has claimed the link and is fetching it
    Claimed,

    /// Processed, abandoned after a permanent fetch failure, or finalized by recovery
    Done,
}

impl LinkStatus {
    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Done => "done",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
