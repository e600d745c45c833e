use crate::config::Settings;
use crate::error::{Error, Result};
use crate::identity::{self, FileIdentity};
use crate::platform::{confine, EntryKind, FsOps};
use crate::token::{ConfirmationToken, TokenCodec, VerifiedToken};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

pub const DELETE_STRATEGY: &str = "WIN_EXTENDED_PATH_DELETE";

/// Audit record for one completed deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReceipt {
    pub finding_id: String,
    pub root_id: String,
    pub relative_path: String,
    pub kind: EntryKind,
    pub identity: FileIdentity,
    pub strategy: &'static str,
    pub used_extended_namespace: bool,
    pub deleted_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub struct Executor<'a> {
    fs: &'a dyn FsOps,
    settings: &'a Settings,
    codec: &'a TokenCodec,
}

impl<'a> Executor<'a> {
    pub fn new(fs: &'a dyn FsOps, settings: &'a Settings, codec: &'a TokenCodec) -> Self {
        Self {
            fs,
            settings,
            codec,
        }
    }

    /// Verify `token` and delete the entry it is bound to.
    pub fn delete(&self, token: &ConfirmationToken) -> Result<DeletionReceipt> {
        let verified = self.codec.verify(token).map_err(|err| {
            warn!("Confirmation rejected: {}", err);
            err
        })?;
        self.execute(&verified)
    }

    /// Delete the entry bound to an already verified token.
    ///
    /// The on-disk identity is compared against the bound one twice: once
    /// before the emptiness check and once immediately before the delete.
    /// Any difference aborts with nothing removed.
    pub fn execute(&self, verified: &VerifiedToken) -> Result<DeletionReceipt> {
        let claims = verified.claims();
        let root = self
            .settings
            .root_by_path(Path::new(&claims.root))
            .ok_or_else(|| Error::RootNotAllowed(claims.root.clone()))?;
        let path = confine(&root.path, &claims.path)?;
        let bound = claims.identity();

        let current = identity::resolve(self.fs, &path)?;
        if current.identity != bound {
            warn!(
                "Identity mismatch for {} under {}; refusing to delete",
                claims.path, root.id
            );
            return Err(Error::IdentityMismatch(claims.path.clone()));
        }

        if current.kind == EntryKind::Directory && !self.fs.list_dir(&path)?.is_empty() {
            return Err(Error::NotEmptyDirectory(claims.path.clone()));
        }

        let last = identity::resolve(self.fs, &path)?;
        if last.identity != bound || last.kind != current.kind {
            warn!(
                "Entry {} under {} changed during delete checks; refusing to delete",
                claims.path, root.id
            );
            return Err(Error::IdentityMismatch(claims.path.clone()));
        }

        let start = Instant::now();
        self.fs
            .delete_no_follow(&path, current.kind, bound)
            .map_err(|err| {
                if matches!(err, Error::IdentityMismatch(_)) {
                    warn!(
                        "Entry {} under {} was swapped at delete time; nothing removed",
                        claims.path, root.id
                    );
                }
                err
            })?;
        let elapsed = start.elapsed();
        info!(
            "Deleted {} {} under {} via extended namespace",
            match current.kind {
                EntryKind::File => "file",
                EntryKind::Directory => "directory",
            },
            claims.path,
            root.id
        );

        Ok(DeletionReceipt {
            finding_id: claims.fnd.clone(),
            root_id: root.id.clone(),
            relative_path: claims.path.clone(),
            kind: current.kind,
            identity: bound,
            strategy: DELETE_STRATEGY,
            used_extended_namespace: true,
            deleted_at: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}
