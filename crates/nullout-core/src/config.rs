use crate::error::{Error, Result};
use crate::hazard::DEFAULT_LONG_PATH_THRESHOLD;
use crate::platform::{paths_equal, to_extended_path, EntryKind, FsOps};
use crate::scanner::ScanOptions;
use crate::token::SigningSecret;
use chrono::TimeDelta;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 300;
pub const MAX_TOKEN_TTL_SECS: u64 = 86_400;
pub const DEFAULT_MAX_DEPTH: usize = 50;
/// Reparse points are never entered, listed as findings, or deleted.
pub const REPARSE_POLICY: &str = "deny_all";
const MIN_RECOMMENDED_SECRET_LEN: usize = 32;

/// Raw configuration as read from `Nullout.toml` and `NULLOUT_*` variables.
#[derive(Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default)]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_long_path_threshold")]
    pub long_path_threshold: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_include_dirs")]
    pub include_dirs: bool,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_long_path_threshold() -> usize {
    DEFAULT_LONG_PATH_THRESHOLD
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_include_dirs() -> bool {
    true
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("roots", &self.roots)
            .field(
                "token_secret",
                &format_args!("<{} bytes redacted>", self.token_secret.len()),
            )
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("long_path_threshold", &self.long_path_threshold)
            .field("max_depth", &self.max_depth)
            .field("include_dirs", &self.include_dirs)
            .field("ignore_patterns", &self.ignore_patterns)
            .finish()
    }
}

impl AppConfig {
    pub fn new(roots: Vec<String>, token_secret: impl Into<String>) -> Self {
        Self {
            roots,
            token_secret: token_secret.into(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            long_path_threshold: DEFAULT_LONG_PATH_THRESHOLD,
            max_depth: DEFAULT_MAX_DEPTH,
            include_dirs: true,
            ignore_patterns: Vec::new(),
        }
    }

    /// Validate everything and canonicalize the roots. Fails closed: no roots
    /// or no secret is a configuration error, never a silent default.
    pub fn resolve(&self, fs: &dyn FsOps) -> Result<Settings> {
        let roots = resolve_roots(&self.roots, fs)?;

        if self.token_secret.is_empty() {
            return Err(Error::Configuration(
                "token secret is required (set NULLOUT_TOKEN_SECRET)".to_string(),
            ));
        }
        let secret = SigningSecret::new(self.token_secret.as_bytes().to_vec())?;
        if secret.len() < MIN_RECOMMENDED_SECRET_LEN {
            warn!(
                "Token secret is only {} bytes; at least {} random bytes are recommended",
                secret.len(),
                MIN_RECOMMENDED_SECRET_LEN
            );
        }

        if self.token_ttl_secs == 0 || self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(Error::Configuration(format!(
                "token_ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}, got {}",
                self.token_ttl_secs
            )));
        }
        let token_ttl = TimeDelta::try_seconds(self.token_ttl_secs as i64).ok_or_else(|| {
            Error::Configuration(format!("token_ttl_secs out of range: {}", self.token_ttl_secs))
        })?;

        if self.long_path_threshold == 0 {
            return Err(Error::Configuration(
                "long_path_threshold must be positive".to_string(),
            ));
        }

        let ignore_patterns = self
            .ignore_patterns
            .iter()
            .map(|glob| {
                Pattern::new(glob).map_err(|e| {
                    Error::Configuration(format!("invalid ignore pattern '{glob}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Settings {
            roots,
            secret,
            token_ttl,
            long_path_threshold: self.long_path_threshold,
            scan: ScanOptions {
                recursive: true,
                max_depth: self.max_depth,
                include_dirs: self.include_dirs,
                ignore_patterns,
            },
        })
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Nullout").required(false))
        .add_source(
            Environment::with_prefix("NULLOUT")
                .try_parsing(true)
                .list_separator(";")
                .with_list_parse_key("roots")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// A directory the tool is permitted to scan and delete beneath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistedRoot {
    pub id: String,
    pub display_name: String,
    pub path: PathBuf,
    /// `path` in the `\\?\` form every filesystem call uses.
    pub canonical_path: String,
    pub reparse_policy: &'static str,
}

impl AllowlistedRoot {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Validated, read-only configuration shared by every operation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub roots: Vec<AllowlistedRoot>,
    pub secret: SigningSecret,
    pub token_ttl: TimeDelta,
    pub long_path_threshold: usize,
    pub scan: ScanOptions,
}

impl Settings {
    pub fn root_by_id(&self, id: &str) -> Option<&AllowlistedRoot> {
        self.roots.iter().find(|r| r.id == id)
    }

    pub fn root_by_path(&self, path: &Path) -> Option<&AllowlistedRoot> {
        self.roots.iter().find(|r| paths_equal(&r.path, path))
    }
}

fn resolve_roots(raw: &[String], fs: &dyn FsOps) -> Result<Vec<AllowlistedRoot>> {
    let mut roots: Vec<AllowlistedRoot> = Vec::new();

    for entry in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let path = Path::new(entry);
        if !path.has_root() {
            return Err(Error::Configuration(format!(
                "configured root must be an absolute path: {entry}"
            )));
        }
        let canonical = fs.canonicalize(path).map_err(|e| {
            Error::Configuration(format!("configured root is not usable: {entry}: {e}"))
        })?;
        let meta = fs.open_no_follow(&canonical).map_err(|e| {
            Error::Configuration(format!("configured root is not usable: {entry}: {e}"))
        })?;
        if meta.is_reparse || meta.kind != EntryKind::Directory {
            return Err(Error::Configuration(format!(
                "configured root is not a plain directory: {entry}"
            )));
        }

        if roots.iter().any(|r| paths_equal(&r.path, &canonical)) {
            warn!("Ignoring duplicate root {}", canonical.display());
            continue;
        }

        let display_name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| canonical.to_string_lossy().into_owned());
        roots.push(AllowlistedRoot {
            id: format!("root_{}", roots.len()),
            display_name,
            canonical_path: to_extended_path(&canonical),
            path: canonical,
            reparse_policy: REPARSE_POLICY,
        });
    }

    if roots.is_empty() {
        return Err(Error::Configuration(
            "no allowlisted roots configured (set NULLOUT_ROOTS)".to_string(),
        ));
    }
    debug!("Allowlisted roots: {:?}", roots);
    Ok(roots)
}
