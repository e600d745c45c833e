use super::{ScanIssue, ScanOptions, ScanStats};
use crate::config::AllowlistedRoot;
use crate::error::Error;
use crate::hazard::{split_name, Classifier};
use crate::identity;
use crate::platform::{extended_path_len, relative_to, to_extended_path, EntryKind, FsOps};
use crate::progress::ProgressReporter;
use crate::storage::{Finding, FindingId};
use glob::MatchOptions;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

const IGNORE_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Depth-first, name-ordered traversal of one root. Never follows reparse
/// points and never aborts on a single bad entry.
pub(super) struct Walk<'a> {
    fs: &'a dyn FsOps,
    classifier: Classifier,
    options: &'a ScanOptions,
    root: &'a AllowlistedRoot,
    scan_id: Uuid,
    reporter: &'a dyn ProgressReporter,
    findings: Vec<Finding>,
    issues: Vec<ScanIssue>,
    stats: ScanStats,
}

impl<'a> Walk<'a> {
    pub(super) fn new(
        fs: &'a dyn FsOps,
        classifier: Classifier,
        options: &'a ScanOptions,
        root: &'a AllowlistedRoot,
        scan_id: Uuid,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            fs,
            classifier,
            options,
            root,
            scan_id,
            reporter,
            findings: Vec::new(),
            issues: Vec::new(),
            stats: ScanStats::default(),
        }
    }

    pub(super) fn visit_dir(&mut self, dir: &Path, depth: usize) {
        let mut entries = match self.fs.list_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                let shown = self.display_relative(dir);
                self.record_issue(shown, err);
                return;
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        for entry in entries {
            self.stats.visited += 1;
            let path = dir.join(&entry.name);
            self.reporter
                .on_scan_progress(self.stats.visited, &path.to_string_lossy());

            if entry.is_reparse {
                debug!("Skipping reparse point {}", path.display());
                self.stats.skipped_reparse_points += 1;
                continue;
            }

            let Some(relative) = relative_to(&self.root.path, &path) else {
                self.record_issue(
                    path.to_string_lossy().into_owned(),
                    Error::Io {
                        path: path.to_string_lossy().into_owned(),
                        message: "entry name is not valid Unicode".to_string(),
                    },
                );
                continue;
            };

            if self.is_ignored(&relative) {
                self.stats.ignored += 1;
                continue;
            }

            let is_dir = entry.kind == EntryKind::Directory;
            if !is_dir || self.options.include_dirs {
                let name = entry.name.to_string_lossy();
                let hazards = self.classifier.classify(&name, extended_path_len(&path));
                if !hazards.is_empty() {
                    match identity::resolve(self.fs, &path) {
                        Ok(resolved) => {
                            let (base_name, extension) = split_name(&name);
                            self.findings.push(Finding {
                                id: FindingId::new(),
                                scan_id: self.scan_id,
                                root_id: self.root.id.clone(),
                                relative_path: relative.clone(),
                                name: name.to_string(),
                                base_name: base_name.to_string(),
                                extension: extension.to_string(),
                                kind: resolved.kind,
                                hazards,
                                size: match resolved.kind {
                                    EntryKind::File => Some(resolved.size),
                                    EntryKind::Directory => None,
                                },
                                extended_path: to_extended_path(&path),
                                identity: resolved.identity,
                            });
                            self.stats.flagged += 1;
                        }
                        Err(Error::IsReparsePoint(_)) => {
                            // Became a reparse point after the listing.
                            self.stats.skipped_reparse_points += 1;
                            continue;
                        }
                        Err(err) => self.record_issue(relative.clone(), err),
                    }
                }
            }

            if is_dir && self.options.recursive && depth < self.options.max_depth {
                self.visit_dir(&path, depth + 1);
            }
        }
    }

    pub(super) fn finish(self) -> (Vec<Finding>, Vec<ScanIssue>, ScanStats) {
        (self.findings, self.issues, self.stats)
    }

    fn is_ignored(&self, relative: &str) -> bool {
        if self.options.ignore_patterns.is_empty() {
            return false;
        }
        let candidate = relative.replace('\\', "/");
        self.options
            .ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_with(&candidate, IGNORE_MATCH))
    }

    fn display_relative(&self, path: &Path) -> String {
        relative_to(&self.root.path, path).unwrap_or_else(|| ".".to_string())
    }

    fn record_issue(&mut self, path: String, err: Error) {
        warn!("Scan issue at {}: {}", path, err);
        self.stats.issues += 1;
        self.issues.push(ScanIssue {
            path,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}
