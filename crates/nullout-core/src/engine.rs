use crate::config::{AllowlistedRoot, AppConfig, Settings, REPARSE_POLICY};
use crate::deletion::{DeletionPlan, DeletionReceipt, Executor, Planner, DELETE_STRATEGY};
use crate::error::{Error, ErrorKind, Result};
use crate::lock::{self, LockInfo, LockInspector, NoopInspector};
use crate::platform::{self, confine, FsOps};
use crate::progress::ProgressReporter;
use crate::scanner::{ScanReport, Scanner};
use crate::storage::{FindingId, FindingState, FindingStore, StoredFinding};
use crate::token::{ConfirmationToken, TokenCodec};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Static description of this instance, safe to show to any caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub platform: &'static str,
    pub reparse_policy: &'static str,
    pub delete_strategy: &'static str,
    pub token_ttl_secs: i64,
    pub long_path_threshold: usize,
    pub roots: Vec<AllowlistedRoot>,
}

/// A follow-up call that may resolve a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStep {
    pub tool: &'static str,
    pub root: String,
    pub relative_path: String,
    pub reason: &'static str,
}

/// Owns the session state and exposes the boundary operations.
///
/// Each operation re-validates against the filesystem; nothing cached here is
/// trusted for a delete decision except the signed token itself.
pub struct Engine {
    settings: Arc<Settings>,
    fs: Arc<dyn FsOps>,
    codec: TokenCodec,
    store: FindingStore,
    locks: Arc<dyn LockInspector>,
}

impl Engine {
    pub fn new(settings: Settings, fs: Arc<dyn FsOps>) -> Self {
        let codec = TokenCodec::new(settings.secret.clone());
        Self {
            settings: Arc::new(settings),
            fs,
            codec,
            store: FindingStore::new(),
            locks: Arc::new(NoopInspector),
        }
    }

    /// Validate `config` against `fs` and build an engine over it.
    pub fn with_config(config: &AppConfig, fs: Arc<dyn FsOps>) -> Result<Self> {
        let settings = config.resolve(fs.as_ref())?;
        Ok(Self::new(settings, fs))
    }

    /// Engine over the native filesystem and lock facility.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let fs = platform::native()?;
        Ok(Self::with_config(config, fs)?.with_lock_inspector(lock::native_inspector()))
    }

    pub fn with_lock_inspector(mut self, locks: Arc<dyn LockInspector>) -> Self {
        self.locks = locks;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn store(&self) -> &FindingStore {
        &self.store
    }

    pub fn list_roots(&self) -> &[AllowlistedRoot] {
        &self.settings.roots
    }

    /// Scan a root given by id (`root_0`) or by path.
    pub fn scan(&self, root: &str, reporter: &dyn ProgressReporter) -> Result<ScanReport> {
        let requested = self.requested_root_path(root);
        let report = Scanner::new(self.fs.as_ref(), &self.settings).scan(&requested, reporter)?;
        self.store.register_scan(report.scan_id, &report.findings);
        Ok(report)
    }

    pub fn get_finding(&self, id: &FindingId) -> Result<StoredFinding> {
        self.store
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("finding {id}")))
    }

    /// Findings produced by one scan, in scan order.
    pub fn scan_findings(&self, scan_id: &Uuid) -> Result<Vec<StoredFinding>> {
        if !self.store.contains_scan(scan_id) {
            return Err(Error::NotFound(format!("scan {scan_id}")));
        }
        Ok(self
            .store
            .scan_findings(scan_id)
            .iter()
            .filter_map(|id| self.store.get(id))
            .collect())
    }

    /// Release a scan's findings. Tokens already issued for them stay
    /// executable; the store just stops tracking their state.
    pub fn discard_scan(&self, scan_id: &Uuid) -> Result<usize> {
        if !self.store.contains_scan(scan_id) {
            return Err(Error::NotFound(format!("scan {scan_id}")));
        }
        let removed = self.store.forget_scan(scan_id);
        info!("Discarded scan {} ({} findings)", scan_id, removed);
        Ok(removed)
    }

    pub fn plan(&self, finding_ids: &[FindingId], reporter: &dyn ProgressReporter) -> DeletionPlan {
        Planner::new(self.fs.as_ref(), &self.settings, &self.store, &self.codec)
            .plan(finding_ids, reporter)
    }

    /// Delete the entry a token is bound to and settle the finding's state.
    ///
    /// Tokens issued by another session carry ids this store has never seen;
    /// those are executed on the strength of the token alone.
    pub fn delete(&self, token: &ConfirmationToken) -> Result<DeletionReceipt> {
        let verified = self.codec.verify(token).map_err(|err| {
            warn!("Confirmation rejected: {}", err);
            err
        })?;
        let finding_id = verified.claims().fnd.parse::<FindingId>().ok();

        if let Some(id) = finding_id {
            match self.store.state(&id) {
                Some(FindingState::Deleted) => {
                    return Err(Error::NotFound(format!("finding {id} was already deleted")))
                }
                Some(FindingState::Rejected) => {
                    return Err(Error::stale(id, "an earlier delete was rejected"))
                }
                _ => {}
            }
        }

        let executor = Executor::new(self.fs.as_ref(), &self.settings, &self.codec);
        let outcome = executor.execute(&verified);

        if let Some(id) = finding_id {
            let settled = match &outcome {
                Ok(_) => Some(self.store.transition(&id, FindingState::Deleted)),
                Err(Error::IdentityMismatch(_))
                | Err(Error::NotEmptyDirectory(_))
                | Err(Error::IsReparsePoint(_)) => {
                    Some(self.store.reject(&id, verified.claims().identity()))
                }
                Err(_) => None,
            };
            if let Some(Err(err)) = settled {
                debug!("Finding {} state left unchanged: {}", id, err);
            }
        }
        outcome
    }

    /// Suggested follow-ups after `delete(token)` failed with `err`.
    pub fn next_steps(&self, token: &ConfirmationToken, err: &Error) -> Vec<NextStep> {
        if err.kind() != ErrorKind::InUse {
            return Vec::new();
        }
        let Ok(verified) = self.codec.verify(token) else {
            return Vec::new();
        };
        let claims = verified.claims();
        let root = self
            .settings
            .root_by_path(Path::new(&claims.root))
            .map(|root| root.id.clone())
            .unwrap_or_else(|| claims.root.clone());
        vec![NextStep {
            tool: "who_is_using",
            root,
            relative_path: claims.path.clone(),
            reason: "the entry is open in another process",
        }]
    }

    /// Processes holding the entry behind a finding. Advisory only.
    pub fn who_is_using(&self, id: &FindingId) -> Result<Vec<LockInfo>> {
        let finding = self.get_finding(id)?.finding;
        let root = self
            .settings
            .root_by_id(&finding.root_id)
            .ok_or_else(|| Error::RootNotAllowed(finding.root_id.clone()))?;
        let path = confine(&root.path, &finding.relative_path)?;
        self.locks.who_is_using(&path)
    }

    /// Processes holding `relative` beneath a root given by id or path.
    pub fn who_is_using_path(&self, root: &str, relative: &str) -> Result<Vec<LockInfo>> {
        let root = self.allowlisted_root(root)?;
        let path = confine(&root.path, relative)?;
        self.locks.who_is_using(&path)
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: "nullout",
            version: env!("CARGO_PKG_VERSION"),
            platform: std::env::consts::OS,
            reparse_policy: REPARSE_POLICY,
            delete_strategy: DELETE_STRATEGY,
            token_ttl_secs: self.settings.token_ttl.num_seconds(),
            long_path_threshold: self.settings.long_path_threshold,
            roots: self.settings.roots.clone(),
        }
    }

    fn requested_root_path(&self, root: &str) -> PathBuf {
        match self.settings.root_by_id(root) {
            Some(allowed) => allowed.path.clone(),
            None => PathBuf::from(root),
        }
    }

    fn allowlisted_root(&self, root: &str) -> Result<&AllowlistedRoot> {
        if let Some(allowed) = self.settings.root_by_id(root) {
            return Ok(allowed);
        }
        let canonical = self.fs.canonicalize(Path::new(root)).map_err(|err| {
            info!("Root {} could not be resolved: {}", root, err);
            Error::RootNotAllowed(root.to_string())
        })?;
        self.settings
            .root_by_path(&canonical)
            .ok_or_else(|| Error::RootNotAllowed(root.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimFs;
    use crate::progress::SilentReporter;

    fn engine(fs: &Arc<SimFs>) -> Engine {
        let config = AppConfig::new(vec!["/data".to_string()], "engine-test-secret");
        Engine::with_config(&config, fs.clone()).unwrap()
    }

    #[test]
    fn test_scan_by_id_and_by_path_agree() {
        let fs = Arc::new(SimFs::new());
        fs.add_dir("/data");
        fs.add_file("/data/CON", 1);
        let engine = engine(&fs);

        let by_id = engine.scan("root_0", &SilentReporter).unwrap();
        let by_path = engine.scan("/data", &SilentReporter).unwrap();
        assert_eq!(by_id.findings.len(), 1);
        assert_eq!(by_path.findings.len(), 1);
        assert_eq!(engine.store().len(), 2);
    }

    #[test]
    fn test_scan_findings_then_discard() {
        let fs = Arc::new(SimFs::new());
        fs.add_dir("/data");
        fs.add_file("/data/CON", 1);
        fs.add_file("/data/trailing. ", 1);
        let engine = engine(&fs);

        let first = engine.scan("root_0", &SilentReporter).unwrap();
        let second = engine.scan("root_0", &SilentReporter).unwrap();
        let listed = engine.scan_findings(&first.scan_id).unwrap();
        assert_eq!(
            listed.iter().map(|s| s.finding.id).collect::<Vec<_>>(),
            first.findings.iter().map(|f| f.id).collect::<Vec<_>>()
        );

        assert_eq!(engine.discard_scan(&first.scan_id).unwrap(), 2);
        assert_eq!(engine.store().len(), 2);
        assert!(engine.get_finding(&first.findings[0].id).is_err());
        assert!(engine.get_finding(&second.findings[0].id).is_ok());
        assert!(matches!(
            engine.scan_findings(&first.scan_id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.discard_scan(&first.scan_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_in_use_delete_suggests_who_is_using() {
        let fs = Arc::new(SimFs::new());
        fs.add_dir("/data");
        fs.add_file("/data/sub/LPT1.txt", 4);
        let engine = engine(&fs);
        let report = engine.scan("root_0", &SilentReporter).unwrap();
        let id = report.findings[0].id;
        let plan = engine.plan(&[id], &SilentReporter);
        let token = match &plan.items[0].status {
            crate::deletion::PlanStatus::Ready { token, .. } => token.clone(),
            other => panic!("plan failed: {other:?}"),
        };

        fs.hold("/data/sub/LPT1.txt");
        let err = engine.delete(&token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InUse);
        assert_eq!(engine.store().state(&id), Some(FindingState::Planned));

        let steps = engine.next_steps(&token, &err);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool, "who_is_using");
        assert_eq!(steps[0].root, "root_0");
        assert_eq!(steps[0].relative_path, report.findings[0].relative_path);

        let other = Error::NotFound("x".to_string());
        assert!(engine.next_steps(&token, &other).is_empty());
    }

    #[test]
    fn test_who_is_using_resolves_finding_path() {
        struct Recording;
        impl LockInspector for Recording {
            fn who_is_using(&self, path: &Path) -> Result<Vec<LockInfo>> {
                Ok(vec![LockInfo {
                    process_id: 42,
                    process_name: "editor".to_string(),
                    path: path.display().to_string(),
                }])
            }
        }

        let fs = Arc::new(SimFs::new());
        fs.add_dir("/data");
        fs.add_file("/data/aux.log", 3);
        let engine = engine(&fs).with_lock_inspector(Arc::new(Recording));
        let report = engine.scan("root_0", &SilentReporter).unwrap();

        let users = engine.who_is_using(&report.findings[0].id).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].process_id, 42);
        assert!(users[0].path.ends_with("aux.log"));
    }

    #[test]
    fn test_who_is_using_path_rejects_escape() {
        let fs = Arc::new(SimFs::new());
        fs.add_dir("/data");
        let engine = engine(&fs);
        let err = engine.who_is_using_path("root_0", "..\\etc").unwrap_err();
        assert!(matches!(err, Error::RootNotAllowed(_)));
        let err = engine.who_is_using_path("/elsewhere", "x").unwrap_err();
        assert!(matches!(err, Error::RootNotAllowed(_)));
    }

    #[test]
    fn test_server_info_reports_policy() {
        let fs = Arc::new(SimFs::new());
        fs.add_dir("/data");
        let info = engine(&fs).server_info();
        assert_eq!(info.name, "nullout");
        assert_eq!(info.reparse_policy, "deny_all");
        assert_eq!(info.delete_strategy, "WIN_EXTENDED_PATH_DELETE");
        assert_eq!(info.token_ttl_secs, 300);
        assert_eq!(info.long_path_threshold, 260);
        assert_eq!(info.roots.len(), 1);
        assert_eq!(info.roots[0].id, "root_0");
    }
}
