//! Advisory "who is using this file" lookups. Read-only and never consulted
//! by the delete path.

use crate::error::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub process_id: u32,
    pub process_name: String,
    pub path: String,
}

pub trait LockInspector: Send + Sync {
    fn who_is_using(&self, path: &Path) -> Result<Vec<LockInfo>>;
}

/// Reports no users. Used where no OS facility is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInspector;

impl LockInspector for NoopInspector {
    fn who_is_using(&self, _path: &Path) -> Result<Vec<LockInfo>> {
        Ok(Vec::new())
    }
}

#[cfg(target_os = "windows")]
pub fn native_inspector() -> Arc<dyn LockInspector> {
    Arc::new(crate::platform::windows::RestartManagerInspector)
}

#[cfg(not(target_os = "windows"))]
pub fn native_inspector() -> Arc<dyn LockInspector> {
    Arc::new(NoopInspector)
}
