pub mod config;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod hazard;
pub mod identity;
pub mod lock;
pub mod platform;
pub mod progress;
pub mod scanner;
pub mod storage;
pub mod token;

pub use config::{AllowlistedRoot, AppConfig, Settings};
pub use deletion::{DeletionPlan, DeletionReceipt, PlanItem, PlanStatus};
pub use engine::{Engine, NextStep, ServerInfo};
pub use error::{Error, ErrorKind, Result};
pub use hazard::{HazardSet, HazardTag};
pub use identity::FileIdentity;
pub use lock::{LockInfo, LockInspector};
pub use progress::{ProgressReporter, SilentReporter};
pub use scanner::{ScanIssue, ScanReport, ScanStats};
pub use storage::{Finding, FindingId, FindingState};
pub use token::ConfirmationToken;
