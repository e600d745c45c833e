use crate::error::{Error, Result};
use crate::platform::{EntryKind, FsOps};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Volume serial + file index: names the on-disk object, not the path string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub volume_serial: u32,
    pub file_id: u64,
}

impl FileIdentity {
    pub fn new(volume_serial: u32, file_id: u64) -> Self {
        Self {
            volume_serial,
            file_id,
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}:0x{:016X}", self.volume_serial, self.file_id)
    }
}

/// An entry observed through a no-follow open that is known not to be a
/// reparse point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub identity: FileIdentity,
    pub kind: EntryKind,
    pub size: u64,
}

/// Resolve the identity of `path`, refusing reparse points.
///
/// Every stage of the pipeline calls this afresh; a junction swapped in
/// between stages is caught at whichever stage sees it first.
pub fn resolve(fs: &dyn FsOps, path: &Path) -> Result<ResolvedEntry> {
    let meta = fs.open_no_follow(path)?;
    if meta.is_reparse {
        return Err(Error::IsReparsePoint(path.display().to_string()));
    }
    Ok(ResolvedEntry {
        identity: meta.identity,
        kind: meta.kind,
        size: meta.size,
    })
}
