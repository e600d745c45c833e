use std::sync::Arc;

use nullout_core::platform::sim::SimFs;
use nullout_core::{
    AppConfig, ConfirmationToken, Engine, Error, ErrorKind, FindingId, FindingState, HazardTag,
    PlanStatus, ScanReport, SilentReporter,
};

const SECRET: &str = "pipeline-test-secret-0123456789abcdef";

/// Layout:
///   /data/
///     NUL.txt        reserved device name
///     normal.txt
///     report.        trailing dot
///     dir /          trailing space, not empty
///       inner.txt
///     private/       access denied
///     CON            reparse point
fn fixture() -> Arc<SimFs> {
    let fs = Arc::new(SimFs::new());
    fs.add_dir("/data");
    fs.add_file("/data/NUL.txt", 12);
    fs.add_file("/data/normal.txt", 5);
    fs.add_file("/data/report.", 7);
    fs.add_file("/data/dir /inner.txt", 1);
    fs.add_file("/data/private/aux", 3);
    fs.deny("/data/private");
    fs.add_reparse("/data/CON");
    fs.add_dir("/other");
    fs
}

fn engine_with(fs: &Arc<SimFs>, config: AppConfig) -> Engine {
    Engine::with_config(&config, fs.clone()).unwrap()
}

fn engine(fs: &Arc<SimFs>) -> Engine {
    engine_with(fs, AppConfig::new(vec!["/data".to_string()], SECRET))
}

fn finding_by_path(report: &ScanReport, relative: &str) -> FindingId {
    report
        .findings
        .iter()
        .find(|f| f.relative_path == relative)
        .map(|f| f.id)
        .unwrap_or_else(|| panic!("no finding for {relative}"))
}

fn token_for(engine: &Engine, id: FindingId) -> ConfirmationToken {
    let plan = engine.plan(&[id], &SilentReporter);
    match &plan.items[0].status {
        PlanStatus::Ready { token, .. } => token.clone(),
        PlanStatus::Failed { message, .. } => panic!("plan failed: {message}"),
    }
}

#[test]
fn test_reserved_name_scan_plan_delete_then_repeat() {
    let fs = fixture();
    let engine = engine(&fs);

    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "NUL.txt");
    let finding = engine.get_finding(&id).unwrap().finding;
    assert!(finding.hazards.contains(&HazardTag::ReservedDeviceName));
    assert_eq!(finding.base_name, "NUL");
    assert_eq!(finding.extension, ".txt");
    assert_eq!(finding.size, Some(12));

    let token = token_for(&engine, id);
    assert_eq!(engine.store().state(&id), Some(FindingState::Planned));

    let receipt = engine.delete(&token).unwrap();
    assert!(receipt.used_extended_namespace);
    assert_eq!(receipt.relative_path, "NUL.txt");
    assert_eq!(receipt.identity, finding.identity);
    assert!(!fs.exists("/data/NUL.txt"));
    assert_eq!(engine.store().state(&id), Some(FindingState::Deleted));

    let again = engine.delete(&token).unwrap_err();
    assert!(matches!(again, Error::NotFound(_)));
}

#[test]
fn test_token_from_another_session_reports_missing_entry() {
    let fs = fixture();
    let first = engine(&fs);
    let report = first.scan("root_0", &SilentReporter).unwrap();
    let token = token_for(&first, finding_by_path(&report, "NUL.txt"));

    let second = engine(&fs);
    second.delete(&token).unwrap();
    let err = first.delete(&token).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_recreated_file_between_plan_and_delete_is_refused() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "NUL.txt");
    let token = token_for(&engine, id);

    fs.replace_file("/data/NUL.txt", 12);
    let entries_before = fs.entry_count();

    let err = engine.delete(&token).unwrap_err();
    assert!(matches!(err, Error::IdentityMismatch(_)));
    assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
    assert!(fs.exists("/data/NUL.txt"));
    assert_eq!(fs.entry_count(), entries_before);
    assert_eq!(engine.store().state(&id), Some(FindingState::Rejected));

    let again = engine.delete(&token).unwrap_err();
    assert!(matches!(again, Error::FindingStale { .. }));
}

#[test]
fn test_swap_at_delete_time_removes_nothing() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "report.");
    let token = token_for(&engine, id);

    fs.swap_on_delete("/data/report.");
    let entries_before = fs.entry_count();

    let err = engine.delete(&token).unwrap_err();
    assert!(matches!(err, Error::IdentityMismatch(_)));
    assert!(fs.exists("/data/report."));
    assert_eq!(fs.entry_count(), entries_before);
    assert_eq!(engine.store().state(&id), Some(FindingState::Rejected));
}

#[test]
fn test_replanning_binds_the_recreated_file() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "report.");

    fs.replace_file("/data/report.", 7);
    let plan = engine.plan(&[id], &SilentReporter);
    match &plan.items[0].status {
        PlanStatus::Ready {
            token,
            identity_changed_since_scan,
            ..
        } => {
            assert!(identity_changed_since_scan);
            engine.delete(token).unwrap();
        }
        PlanStatus::Failed { message, .. } => panic!("plan failed: {message}"),
    }
    assert!(!fs.exists("/data/report."));
}

#[test]
fn test_superseded_token_does_not_reject_the_replanned_finding() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "NUL.txt");
    let old_token = token_for(&engine, id);

    fs.replace_file("/data/NUL.txt", 12);
    let new_token = token_for(&engine, id);

    let err = engine.delete(&old_token).unwrap_err();
    assert!(matches!(err, Error::IdentityMismatch(_)));
    assert_eq!(engine.store().state(&id), Some(FindingState::Planned));

    let receipt = engine.delete(&new_token).unwrap();
    assert_eq!(receipt.relative_path, "NUL.txt");
    assert!(!fs.exists("/data/NUL.txt"));
    assert_eq!(engine.store().state(&id), Some(FindingState::Deleted));
}

#[test]
fn test_reparse_points_never_become_findings() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();

    assert!(report.findings.iter().all(|f| f.relative_path != "CON"));
    assert_eq!(report.stats.skipped_reparse_points, 1);
}

#[test]
fn test_reparse_substitution_is_caught_at_delete() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "NUL.txt");
    let token = token_for(&engine, id);

    fs.replace_with_reparse("/data/NUL.txt");
    let err = engine.delete(&token).unwrap_err();
    assert!(matches!(err, Error::IsReparsePoint(_)));
    assert!(fs.exists("/data/NUL.txt"));
    assert_eq!(engine.store().state(&id), Some(FindingState::Rejected));
}

#[test]
fn test_non_empty_directory_is_refused() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "dir ");
    assert_eq!(
        engine.get_finding(&id).unwrap().finding.size,
        None,
        "directories carry no size"
    );
    let token = token_for(&engine, id);

    let err = engine.delete(&token).unwrap_err();
    assert!(matches!(err, Error::NotEmptyDirectory(_)));
    assert!(fs.exists("/data/dir /inner.txt"));
}

#[test]
fn test_empty_hazardous_directory_is_deleted() {
    let fs = fixture();
    fs.remove("/data/dir /inner.txt");
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let token = token_for(&engine, finding_by_path(&report, "dir "));

    engine.delete(&token).unwrap();
    assert!(!fs.exists("/data/dir "));
}

#[test]
fn test_access_denied_is_recorded_without_aborting() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();

    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].path, "private");
    assert_eq!(report.issues[0].kind, ErrorKind::AccessDenied);
    assert_eq!(report.stats.issues, 1);

    let mut paths: Vec<_> = report
        .findings
        .iter()
        .map(|f| f.relative_path.as_str())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["NUL.txt", "dir ", "report."]);
}

#[test]
fn test_scan_outside_allowlist_is_rejected() {
    let fs = fixture();
    let engine = engine(&fs);

    for requested in ["/other", "/data/dir ", "/data/../other", "/missing", "/data/missing"] {
        let err = engine.scan(requested, &SilentReporter).unwrap_err();
        assert!(matches!(err, Error::RootNotAllowed(_)), "{requested}: {err:?}");
        assert_eq!(err.kind(), ErrorKind::RootNotAllowed);
    }
}

#[test]
fn test_plan_records_per_item_failures() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let nul = finding_by_path(&report, "NUL.txt");
    let dot = finding_by_path(&report, "report.");
    let unknown = FindingId::new();

    fs.remove("/data/report.");
    let plan = engine.plan(&[nul, unknown, dot], &SilentReporter);

    assert_eq!(plan.items.len(), 3);
    assert_eq!(plan.items[0].finding_id, nul);
    assert_eq!(plan.items[1].finding_id, unknown);
    assert_eq!(plan.items[2].finding_id, dot);
    assert!(plan.items[0].is_ready());
    assert!(plan.items[1].finding.is_none());
    match &plan.items[1].status {
        PlanStatus::Failed { error, .. } => assert_eq!(*error, ErrorKind::NotFound),
        other => panic!("unexpected {other:?}"),
    }
    match &plan.items[2].status {
        PlanStatus::Failed { error, .. } => assert_eq!(*error, ErrorKind::FindingStale),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(plan.ready_count(), 1);
    assert_eq!(plan.failed_count(), 2);
    assert_eq!(plan.tokens().count(), 1);
}

#[test]
fn test_plan_after_delete_is_stale() {
    let fs = fixture();
    let engine = engine(&fs);
    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let id = finding_by_path(&report, "NUL.txt");
    engine.delete(&token_for(&engine, id)).unwrap();

    let plan = engine.plan(&[id], &SilentReporter);
    match &plan.items[0].status {
        PlanStatus::Failed { error, .. } => assert_eq!(*error, ErrorKind::FindingStale),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_ignore_patterns_skip_matching_entries() {
    let fs = fixture();
    let mut config = AppConfig::new(vec!["/data".to_string()], SECRET);
    config.ignore_patterns = vec!["*.TXT".to_string()];
    let engine = engine_with(&fs, config);

    let report = engine.scan("root_0", &SilentReporter).unwrap();
    let paths: Vec<_> = report
        .findings
        .iter()
        .map(|f| f.relative_path.as_str())
        .collect();
    assert!(!paths.contains(&"NUL.txt"));
    assert!(paths.contains(&"report."));
    assert!(report.stats.ignored >= 2);
}

#[test]
fn test_directories_can_be_excluded() {
    let fs = fixture();
    let mut config = AppConfig::new(vec!["/data".to_string()], SECRET);
    config.include_dirs = false;
    let engine = engine_with(&fs, config);

    let report = engine.scan("root_0", &SilentReporter).unwrap();
    assert!(report.findings.iter().all(|f| f.relative_path != "dir "));
}

#[test]
fn test_scan_order_is_deterministic() {
    let fs = fixture();
    fs.add_file("/data/zz/LPT1.log", 1);
    fs.add_file("/data/aa/com3", 1);
    let engine = engine(&fs);

    let order = |report: ScanReport| -> Vec<String> {
        report
            .findings
            .into_iter()
            .map(|f| f.relative_path)
            .collect()
    };
    let first = order(engine.scan("root_0", &SilentReporter).unwrap());
    let second = order(engine.scan("/data", &SilentReporter).unwrap());
    assert_eq!(first, second);
    assert!(first.contains(&"aa\\com3".to_string()));
    assert!(first.contains(&"zz\\LPT1.log".to_string()));
}

#[test]
fn test_configuration_fails_closed() {
    let fs = fixture();

    let no_roots = AppConfig::new(Vec::new(), SECRET);
    assert!(matches!(
        Engine::with_config(&no_roots, fs.clone()),
        Err(Error::Configuration(_))
    ));

    let no_secret = AppConfig::new(vec!["/data".to_string()], "");
    assert!(matches!(
        Engine::with_config(&no_secret, fs.clone()),
        Err(Error::Configuration(_))
    ));

    let file_root = AppConfig::new(vec!["/data/normal.txt".to_string()], SECRET);
    assert!(matches!(
        Engine::with_config(&file_root, fs),
        Err(Error::Configuration(_))
    ));
}
