use super::models::{Finding, FindingId, FindingState, StoredFinding};
use crate::error::{Error, Result};
use crate::identity::FileIdentity;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// In-memory findings, keyed by id, with their lifecycle state.
///
/// Entries are never shared across processes; a finding lives as long as the
/// store that holds its scan.
#[derive(Debug, Default)]
pub struct FindingStore {
    findings: DashMap<FindingId, StoredFinding>,
    scans: DashMap<Uuid, Vec<FindingId>>,
}

impl FindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_scan(&self, scan_id: Uuid, findings: &[Finding]) {
        let ids: Vec<FindingId> = findings.iter().map(|f| f.id).collect();
        for finding in findings {
            self.findings.insert(
                finding.id,
                StoredFinding {
                    finding: finding.clone(),
                    state: FindingState::Scanned,
                    planned_identity: None,
                },
            );
        }
        debug!("Registered scan {} with {} findings", scan_id, ids.len());
        self.scans.insert(scan_id, ids);
    }

    pub fn get(&self, id: &FindingId) -> Option<StoredFinding> {
        self.findings.get(id).map(|entry| entry.value().clone())
    }

    pub fn state(&self, id: &FindingId) -> Option<FindingState> {
        self.findings.get(id).map(|entry| entry.state)
    }

    pub fn scan_findings(&self, scan_id: &Uuid) -> Vec<FindingId> {
        self.scans
            .get(scan_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Drop a scan and every finding it produced. Returns how many findings
    /// were removed.
    pub fn forget_scan(&self, scan_id: &Uuid) -> usize {
        let Some((_, ids)) = self.scans.remove(scan_id) else {
            return 0;
        };
        let removed = ids
            .iter()
            .filter(|id| self.findings.remove(id).is_some())
            .count();
        debug!("Forgot scan {} ({} findings)", scan_id, removed);
        removed
    }

    pub fn contains_scan(&self, scan_id: &Uuid) -> bool {
        self.scans.contains_key(scan_id)
    }

    pub fn scan_count(&self) -> usize {
        self.scans.len()
    }

    /// Move a finding to `next`, atomically with respect to other callers.
    pub fn transition(&self, id: &FindingId, next: FindingState) -> Result<FindingState> {
        let mut entry = self
            .findings
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("finding {id}")))?;
        let current = entry.state;
        if !current.can_transition_to(next) {
            return Err(Error::stale(
                id,
                format!("cannot move from {current:?} to {next:?}"),
            ));
        }
        entry.state = next;
        Ok(current)
    }

    /// Move a finding to `Planned` and remember the identity its newest token
    /// is bound to.
    pub fn mark_planned(&self, id: &FindingId, identity: FileIdentity) -> Result<FindingState> {
        let mut entry = self
            .findings
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("finding {id}")))?;
        let current = entry.state;
        if !current.can_transition_to(FindingState::Planned) {
            return Err(Error::stale(
                id,
                format!("cannot move from {current:?} to Planned"),
            ));
        }
        entry.state = FindingState::Planned;
        entry.planned_identity = Some(identity);
        Ok(current)
    }

    /// Reject a finding on behalf of a token bound to `identity`. A token
    /// superseded by a later plan cannot reject the finding.
    pub fn reject(&self, id: &FindingId, identity: FileIdentity) -> Result<FindingState> {
        let mut entry = self
            .findings
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("finding {id}")))?;
        if entry.planned_identity != Some(identity) {
            return Err(Error::stale(id, "token was superseded by a later plan"));
        }
        let current = entry.state;
        if !current.can_transition_to(FindingState::Rejected) {
            return Err(Error::stale(
                id,
                format!("cannot move from {current:?} to Rejected"),
            ));
        }
        entry.state = FindingState::Rejected;
        Ok(current)
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}
