use indicatif::{ProgressBar, ProgressStyle};
use nullout_core::ProgressReporter;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif spinners.
///
/// - Scan phase: spinner with a running entry count
/// - Plan phase: spinner (items resolve in parallel)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_spinner(&self, message: String) {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICKS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));

        let mut guard = self.slot();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.slot().take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, root: &str) {
        self.start_spinner(format!("Scanning {}...", root));
    }

    fn on_scan_progress(&self, entries_visited: usize, _current_path: &str) {
        if let Some(pb) = self.slot().as_ref() {
            pb.set_message(format!("Scanning... {} entries visited", entries_visited));
        }
    }

    fn on_scan_complete(&self, findings: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} findings in {:.2}s",
            findings, duration_secs
        );
    }

    fn on_plan_start(&self, items: usize) {
        self.start_spinner(format!("Planning {} items...", items));
    }

    fn on_plan_complete(&self, ready: usize, failed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Plan complete: {} ready, {} failed in {:.2}s",
            ready, failed, duration_secs
        );
    }
}
