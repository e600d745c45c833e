use crate::error::Error;
use crate::hazard::HazardSet;
use crate::identity::FileIdentity;
use crate::platform::EntryKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(Uuid);

impl FindingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FindingId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::NotFound(format!("finding {s}")))
    }
}

/// A hazardous entry discovered by one scan. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: FindingId,
    pub scan_id: Uuid,
    pub root_id: String,
    /// Root-relative, `\`-separated.
    pub relative_path: String,
    pub name: String,
    pub base_name: String,
    pub extension: String,
    pub kind: EntryKind,
    pub hazards: HazardSet,
    /// `None` for directories.
    pub size: Option<u64>,
    pub extended_path: String,
    /// Identity observed at scan time. Later stages re-resolve rather than trust it.
    pub identity: FileIdentity,
}

/// Lifecycle of a finding within one process.
///
/// `Scanned -> Planned -> Deleted | Rejected`. Re-planning a `Planned` finding
/// is allowed and issues a fresh token; terminal states accept nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingState {
    Scanned,
    Planned,
    Deleted,
    Rejected,
}

impl FindingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FindingState::Deleted | FindingState::Rejected)
    }

    pub fn can_transition_to(self, next: FindingState) -> bool {
        use FindingState::*;
        matches!(
            (self, next),
            (Scanned, Planned) | (Planned, Planned) | (Planned, Deleted) | (Planned, Rejected)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFinding {
    pub finding: Finding,
    pub state: FindingState,
    /// Identity bound by the most recent plan. Older tokens no longer speak
    /// for this finding.
    pub planned_identity: Option<FileIdentity>,
}
