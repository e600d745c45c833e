//! Filesystem capability boundary.
//!
//! Everything that touches the OS goes through [`FsOps`]. The scan, plan and
//! delete stages only ever see this trait, so they run unchanged against the
//! Win32 backend or the in-memory [`sim::SimFs`].

pub mod sim;
#[cfg(target_os = "windows")]
pub mod windows;

use crate::error::{Error, Result};
use crate::identity::FileIdentity;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

const VERBATIM_PREFIX: &str = r"\\?\";
const VERBATIM_UNC_PREFIX: &str = r"\\?\UNC\";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Directory,
}

/// Attributes observed through a handle opened without following reparse points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub identity: FileIdentity,
    pub kind: EntryKind,
    pub size: u64,
    pub is_reparse: bool,
}

/// One child of a directory listing. Attributes come from the directory
/// entry itself and never from the reparse target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: OsString,
    pub kind: EntryKind,
    pub size: u64,
    pub is_reparse: bool,
}

pub trait FsOps: Send + Sync {
    /// Absolute, normalized form of a configured or requested root.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// Open `path` in the extended namespace with reparse-following disabled.
    fn open_no_follow(&self, path: &Path) -> Result<EntryMeta>;

    /// Children of `path`. Order is unspecified; callers sort.
    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>>;

    /// Remove a single file or empty directory through the extended namespace.
    ///
    /// The entry is refused with `IdentityMismatch` unless it is still
    /// `expected` at the moment of removal.
    fn delete_no_follow(&self, path: &Path, kind: EntryKind, expected: FileIdentity) -> Result<()>;
}

#[cfg(target_os = "windows")]
pub fn native() -> Result<Arc<dyn FsOps>> {
    Ok(Arc::new(windows::WindowsFs))
}

#[cfg(not(target_os = "windows"))]
pub fn native() -> Result<Arc<dyn FsOps>> {
    Err(Error::Configuration(
        "the native filesystem backend is only available on Windows".to_string(),
    ))
}

/// Convert an absolute path to the `\\?\` extended-access form.
///
/// Pure string rewrite: the Win32 full-path normalization would strip the
/// trailing dots and spaces this tool exists to reach.
pub fn to_extended_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('/', "\\");
    if raw.starts_with(VERBATIM_PREFIX) {
        return raw;
    }
    if let Some(unc) = raw.strip_prefix(r"\\") {
        return format!("{VERBATIM_UNC_PREFIX}{unc}");
    }
    format!("{VERBATIM_PREFIX}{raw}")
}

/// Inverse of [`to_extended_path`] for display and comparison.
pub fn strip_extended_prefix(path: &str) -> String {
    if let Some(unc) = path.strip_prefix(VERBATIM_UNC_PREFIX) {
        return format!(r"\\{unc}");
    }
    path.strip_prefix(VERBATIM_PREFIX).unwrap_or(path).to_string()
}

/// Length of the extended form in UTF-16 code units, as Win32 counts it.
pub fn extended_path_len(path: &Path) -> usize {
    to_extended_path(path).encode_utf16().count()
}

/// Case-insensitive, component-wise path equality (NTFS semantics).
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    let lower = |p: &Path| -> Vec<String> {
        p.components()
            .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
            .collect()
    };
    lower(a) == lower(b)
}

/// True when `target` is `root` itself or lies beneath it.
pub fn is_under_root(target: &Path, root: &Path) -> bool {
    let target: Vec<String> = target
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect();
    let root: Vec<String> = root
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect();
    target.len() >= root.len() && target[..root.len()] == root[..]
}

/// Join a root-relative path onto `root`, rejecting anything that could
/// resolve outside of it.
pub fn confine(root: &Path, relative: &str) -> Result<PathBuf> {
    let escape = || Error::RootNotAllowed(format!("path escapes its root: {relative}"));

    let mut full = root.to_path_buf();
    let mut segments = 0;
    for segment in relative.split(['\\', '/']) {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains(':') {
            return Err(escape());
        }
        full.push(segment);
        segments += 1;
    }
    if segments == 0 || !is_under_root(&full, root) {
        return Err(escape());
    }
    Ok(full)
}

/// Root-relative path with `\` separators, as reported in findings.
pub fn relative_to(root: &Path, full: &Path) -> Option<String> {
    let rest = full.strip_prefix(root).ok()?;
    let parts: Vec<String> = rest
        .components()
        .map(|c| match c {
            Component::Normal(s) => Some(s.to_str()?.to_string()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("\\"))
}
