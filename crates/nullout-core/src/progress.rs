/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif spinners. All methods have default
/// no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, _root: &str) {}
    fn on_scan_progress(&self, _entries_visited: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _findings: usize, _duration_secs: f64) {}
    fn on_plan_start(&self, _items: usize) {}
    fn on_plan_complete(&self, _ready: usize, _failed: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
