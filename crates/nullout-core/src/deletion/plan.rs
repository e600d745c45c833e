use crate::config::Settings;
use crate::error::{Error, ErrorKind, Result};
use crate::hazard::Classifier;
use crate::identity::{self, FileIdentity};
use crate::platform::{confine, extended_path_len, FsOps};
use crate::progress::ProgressReporter;
use crate::storage::{Finding, FindingId, FindingStore};
use crate::token::{ConfirmationToken, TokenCodec, TokenSubject};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionPlan {
    pub plan_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<PlanItem>,
}

impl DeletionPlan {
    pub fn ready_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_ready()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.len() - self.ready_count()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &ConfirmationToken> {
        self.items.iter().filter_map(|item| match &item.status {
            PlanStatus::Ready { token, .. } => Some(token),
            PlanStatus::Failed { .. } => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub finding_id: FindingId,
    /// `None` when the id was never known to this store.
    pub finding: Option<Finding>,
    pub status: PlanStatus,
}

impl PlanItem {
    pub fn is_ready(&self) -> bool {
        matches!(self.status, PlanStatus::Ready { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PlanStatus {
    #[serde(rename_all = "camelCase")]
    Ready {
        token: ConfirmationToken,
        /// Identity observed now and bound into the token.
        identity: FileIdentity,
        identity_changed_since_scan: bool,
    },
    #[serde(rename_all = "camelCase")]
    Failed { error: ErrorKind, message: String },
}

pub struct Planner<'a> {
    fs: &'a dyn FsOps,
    settings: &'a Settings,
    store: &'a FindingStore,
    codec: &'a TokenCodec,
}

impl<'a> Planner<'a> {
    pub fn new(
        fs: &'a dyn FsOps,
        settings: &'a Settings,
        store: &'a FindingStore,
        codec: &'a TokenCodec,
    ) -> Self {
        Self {
            fs,
            settings,
            store,
            codec,
        }
    }

    /// Issue a confirmation token per finding. One bad item never fails the
    /// batch; its failure is recorded on the item instead.
    pub fn plan(&self, finding_ids: &[FindingId], reporter: &dyn ProgressReporter) -> DeletionPlan {
        reporter.on_plan_start(finding_ids.len());
        let start = Instant::now();
        let now = Utc::now();
        let deadline = now + self.settings.token_ttl;
        let expires_at =
            DateTime::from_timestamp_millis(deadline.timestamp_millis()).unwrap_or(deadline);

        let items: Vec<PlanItem> = finding_ids
            .par_iter()
            .map(|id| {
                let finding = self.store.get(id).map(|stored| stored.finding);
                let status = match self.plan_one(id, now) {
                    Ok(status) => status,
                    Err(err) => {
                        debug!("Plan item {} failed: {}", id, err);
                        PlanStatus::Failed {
                            error: err.kind(),
                            message: err.to_string(),
                        }
                    }
                };
                PlanItem {
                    finding_id: *id,
                    finding,
                    status,
                }
            })
            .collect();

        let plan = DeletionPlan {
            plan_id: Uuid::new_v4(),
            created_at: now,
            expires_at,
            items,
        };
        reporter.on_plan_complete(
            plan.ready_count(),
            plan.failed_count(),
            start.elapsed().as_secs_f64(),
        );
        info!(
            "Plan {}: {} ready, {} failed",
            plan.plan_id,
            plan.ready_count(),
            plan.failed_count()
        );
        plan
    }

    fn plan_one(&self, id: &FindingId, now: DateTime<Utc>) -> Result<PlanStatus> {
        let stored = self
            .store
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("finding {id}")))?;
        if stored.state.is_terminal() {
            return Err(Error::stale(
                id,
                format!("finding is already {:?}", stored.state).to_lowercase(),
            ));
        }
        let finding = stored.finding;

        let root = self
            .settings
            .root_by_id(&finding.root_id)
            .ok_or_else(|| Error::RootNotAllowed(finding.root_id.clone()))?;
        let path = confine(&root.path, &finding.relative_path)?;

        // Fresh identity from disk; the scan-time value is evidence only.
        let current = match identity::resolve(self.fs, &path) {
            Ok(current) => current,
            Err(Error::NotFound(_)) => return Err(Error::stale(id, "entry no longer exists")),
            Err(err) => return Err(err),
        };
        if current.kind != finding.kind {
            return Err(Error::stale(id, "entry type changed since scan"));
        }
        let classifier = Classifier::new(self.settings.long_path_threshold);
        if classifier
            .classify(&finding.name, extended_path_len(&path))
            .is_empty()
        {
            return Err(Error::stale(id, "hazard no longer applies"));
        }

        let identity_changed_since_scan = current.identity != finding.identity;
        if identity_changed_since_scan {
            debug!(
                "Finding {} was replaced on disk since scan; binding the new entry",
                id
            );
        }

        let issued = self.codec.issue_at(
            &TokenSubject {
                finding_id: id.to_string(),
                root: root.path_string(),
                path: finding.relative_path.clone(),
                identity: current.identity,
            },
            self.settings.token_ttl,
            now,
        )?;
        self.store.mark_planned(id, current.identity)?;

        Ok(PlanStatus::Ready {
            token: issued.token,
            identity: current.identity,
            identity_changed_since_scan,
        })
    }
}
