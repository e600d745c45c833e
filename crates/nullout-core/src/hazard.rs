//! Win32 hazard rules. Pure functions over names and path lengths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_LONG_PATH_THRESHOLD: usize = 260;

const RESERVED_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HazardTag {
    #[serde(rename = "WIN_RESERVED_DEVICE_BASENAME")]
    ReservedDeviceName,
    #[serde(rename = "WIN_TRAILING_DOT_SPACE")]
    TrailingDotOrSpace,
    #[serde(rename = "WIN_PATH_TOO_LONG")]
    PathTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl HazardTag {
    pub fn severity(self) -> Severity {
        match self {
            HazardTag::ReservedDeviceName => Severity::High,
            HazardTag::TrailingDotOrSpace | HazardTag::PathTooLong => Severity::Medium,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            HazardTag::ReservedDeviceName => "WIN_RESERVED_DEVICE_BASENAME",
            HazardTag::TrailingDotOrSpace => "WIN_TRAILING_DOT_SPACE",
            HazardTag::PathTooLong => "WIN_PATH_TOO_LONG",
        }
    }
}

pub type HazardSet = BTreeSet<HazardTag>;

/// Split a file name at its first dot: `"NUL.tar.gz"` -> `("NUL", ".tar.gz")`.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.find('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

/// Win32 maps these names to devices regardless of extension or case.
pub fn is_reserved_device_name(name: &str) -> bool {
    let (base, _) = split_name(name);
    let base = base.trim_end_matches(' ');
    RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(base))
}

/// Win32 path APIs silently strip a trailing '.' or ' ', so a plain delete
/// targets a different name.
pub fn has_trailing_dot_or_space(name: &str) -> bool {
    name.ends_with('.') || name.ends_with(' ')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    long_path_threshold: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_LONG_PATH_THRESHOLD)
    }
}

impl Classifier {
    pub fn new(long_path_threshold: usize) -> Self {
        Self {
            long_path_threshold,
        }
    }

    pub fn long_path_threshold(&self) -> usize {
        self.long_path_threshold
    }

    /// Name-only rules.
    pub fn classify_name(&self, name: &str) -> HazardSet {
        let mut hazards = HazardSet::new();
        if is_reserved_device_name(name) {
            hazards.insert(HazardTag::ReservedDeviceName);
        }
        if has_trailing_dot_or_space(name) {
            hazards.insert(HazardTag::TrailingDotOrSpace);
        }
        hazards
    }

    /// All rules; `extended_len` is the UTF-16 length of the entry's `\\?\` path.
    pub fn classify(&self, name: &str, extended_len: usize) -> HazardSet {
        let mut hazards = self.classify_name(name);
        if extended_len > self.long_path_threshold {
            hazards.insert(HazardTag::PathTooLong);
        }
        hazards
    }
}
