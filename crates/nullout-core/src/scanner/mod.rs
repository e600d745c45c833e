mod walk;

use crate::config::{AllowlistedRoot, Settings};
use crate::error::{Error, ErrorKind, Result};
use crate::hazard::Classifier;
use crate::identity;
use crate::platform::{EntryKind, FsOps};
use crate::progress::ProgressReporter;
use crate::storage::Finding;
use glob::Pattern;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recursive: bool,
    /// Directory levels below the root that are still listed.
    pub max_depth: usize,
    /// Whether hazardous directories are reported as findings.
    pub include_dirs: bool,
    /// Matched case-insensitively against the `/`-separated relative path.
    pub ignore_patterns: Vec<Pattern>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            max_depth: crate::config::DEFAULT_MAX_DEPTH,
            include_dirs: true,
            ignore_patterns: Vec::new(),
        }
    }
}

/// A non-fatal, per-entry failure recorded during a walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanIssue {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub visited: usize,
    pub flagged: usize,
    pub skipped_reparse_points: usize,
    pub ignored: usize,
    pub issues: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub root_id: String,
    pub root_path: PathBuf,
    pub findings: Vec<Finding>,
    pub issues: Vec<ScanIssue>,
    pub stats: ScanStats,
    pub duration_ms: u64,
}

pub struct Scanner<'a> {
    fs: &'a dyn FsOps,
    settings: &'a Settings,
}

impl<'a> Scanner<'a> {
    pub fn new(fs: &'a dyn FsOps, settings: &'a Settings) -> Self {
        Self { fs, settings }
    }

    /// Walk an allowlisted root and report its hazardous entries.
    ///
    /// The requested path is canonicalized and matched against the allowlist
    /// again here, whatever the caller already checked.
    pub fn scan(&self, requested: &Path, reporter: &dyn ProgressReporter) -> Result<ScanReport> {
        let canonical = self.fs.canonicalize(requested).map_err(|err| {
            debug!("Requested root {} did not resolve: {}", requested.display(), err);
            Error::RootNotAllowed(requested.display().to_string())
        })?;
        let root = self
            .settings
            .root_by_path(&canonical)
            .ok_or_else(|| Error::RootNotAllowed(requested.display().to_string()))?;
        self.scan_root(root, reporter)
    }

    fn scan_root(
        &self,
        root: &AllowlistedRoot,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanReport> {
        let resolved = identity::resolve(self.fs, &root.path)?;
        if resolved.kind != EntryKind::Directory {
            return Err(Error::RootNotAllowed(format!(
                "{} is no longer a directory",
                root.path.display()
            )));
        }

        let scan_id = Uuid::new_v4();
        info!("Scanning {} ({})", root.path.display(), root.id);
        reporter.on_scan_start(&root.path.to_string_lossy());
        let start = Instant::now();

        let classifier = Classifier::new(self.settings.long_path_threshold);
        let mut walk = walk::Walk::new(
            self.fs,
            classifier,
            &self.settings.scan,
            root,
            scan_id,
            reporter,
        );
        walk.visit_dir(&root.path, 0);
        let (findings, issues, stats) = walk.finish();

        let elapsed = start.elapsed();
        reporter.on_scan_complete(findings.len(), elapsed.as_secs_f64());
        debug!(
            "Scan {} completed in {:.2}s: {} visited, {} flagged, {} reparse points skipped, {} issues",
            scan_id,
            elapsed.as_secs_f64(),
            stats.visited,
            stats.flagged,
            stats.skipped_reparse_points,
            stats.issues,
        );

        Ok(ScanReport {
            scan_id,
            root_id: root.id.clone(),
            root_path: root.path.clone(),
            findings,
            issues,
            stats,
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}
