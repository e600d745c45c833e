//! In-memory filesystem for exercising the pipeline without Win32.
//!
//! Keeps the properties the pipeline depends on: every created entry gets a
//! fresh file id, reparse points are opaque, directories must be empty to be
//! removed, and selected paths can be made to fail with access denied.

use super::{DirEntryInfo, EntryKind, EntryMeta, FsOps};
use crate::error::{Error, Result};
use crate::identity::FileIdentity;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

pub const SIM_VOLUME_SERIAL: u32 = 0x5EED_0001;

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    File(u64),
    Dir,
    Reparse,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    kind: NodeKind,
    file_id: u64,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    denied: HashSet<PathBuf>,
    /// Files replaced by a new one just as a delete reaches them.
    swap_on_delete: HashSet<PathBuf>,
    /// Entries another process has open without delete sharing.
    held: HashSet<PathBuf>,
    next_id: u64,
}

impl State {
    fn insert(&mut self, path: PathBuf, kind: NodeKind) {
        self.next_id += 1;
        let file_id = self.next_id;
        self.nodes.insert(path, Node { kind, file_id });
    }

    fn has_children(&self, path: &Path) -> bool {
        self.nodes.keys().any(|p| p.parent() == Some(path))
    }
}

#[derive(Debug, Default)]
pub struct SimFs {
    state: RwLock<State>,
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl SimFs {
    pub fn new() -> Self {
        Self::default()
    }

    // Test fixtures tolerate a poisoned lock; the trait methods below do not.
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|e| Error::Io {
            path: String::new(),
            message: format!("simulated filesystem lock poisoned: {e}"),
        })
    }

    /// Create a directory and any missing parents.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        let mut state = self.write();
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component.as_os_str());
            if matches!(component, Component::Normal(_)) && !state.nodes.contains_key(&current) {
                state.insert(current.clone(), NodeKind::Dir);
            }
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, size: u64) {
        let path = normalize(path.as_ref());
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.write().insert(path, NodeKind::File(size));
    }

    /// A junction/symlink stand-in. Its target is never modelled.
    pub fn add_reparse(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.write().insert(path, NodeKind::Reparse);
    }

    /// Remove an entry and everything beneath it, outside of the pipeline.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        self.write().nodes.retain(|p, _| !p.starts_with(&path));
    }

    /// Delete and recreate a file at the same path; the new file has a new id.
    pub fn replace_file(&self, path: impl AsRef<Path>, size: u64) {
        let path = normalize(path.as_ref());
        let mut state = self.write();
        state.nodes.remove(&path);
        state.insert(path, NodeKind::File(size));
    }

    /// Swap whatever lives at `path` for a reparse point.
    pub fn replace_with_reparse(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        let mut state = self.write();
        state.nodes.retain(|p, _| !p.starts_with(&path));
        state.insert(path, NodeKind::Reparse);
    }

    /// Replace the file at `path` with a fresh one the moment a delete
    /// arrives, after every earlier check has passed.
    pub fn swap_on_delete(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        self.write().swap_on_delete.insert(path);
    }

    /// Make deletes of `path` fail as if another process had it open.
    pub fn hold(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        self.write().held.insert(path);
    }

    pub fn deny(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        self.write().denied.insert(path);
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let path = normalize(path.as_ref());
        self.write().nodes.contains_key(&path)
    }

    pub fn entry_count(&self) -> usize {
        self.write().nodes.len()
    }

    fn lookup(&self, path: &Path) -> Result<Node> {
        let path = normalize(path);
        let state = self.read()?;
        if state.denied.contains(&path) {
            return Err(Error::AccessDenied(path.display().to_string()));
        }
        state
            .nodes
            .get(&path)
            .copied()
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }
}

impl FsOps for SimFs {
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        let normalized = normalize(path);
        self.lookup(&normalized)?;
        Ok(normalized)
    }

    fn open_no_follow(&self, path: &Path) -> Result<EntryMeta> {
        let node = self.lookup(path)?;
        let (kind, size, is_reparse) = match node.kind {
            NodeKind::File(size) => (EntryKind::File, size, false),
            NodeKind::Dir => (EntryKind::Directory, 0, false),
            NodeKind::Reparse => (EntryKind::Directory, 0, true),
        };
        Ok(EntryMeta {
            identity: FileIdentity::new(SIM_VOLUME_SERIAL, node.file_id),
            kind,
            size,
            is_reparse,
        })
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        let node = self.lookup(path)?;
        match node.kind {
            NodeKind::Dir => {}
            NodeKind::Reparse => return Err(Error::IsReparsePoint(path.display().to_string())),
            NodeKind::File(_) => {
                return Err(Error::Io {
                    path: path.display().to_string(),
                    message: "not a directory".to_string(),
                })
            }
        }

        let path = normalize(path);
        let state = self.read()?;
        Ok(state
            .nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path.as_path()))
            .filter_map(|(p, node)| {
                let name: OsString = p.file_name()?.to_os_string();
                let (kind, size, is_reparse) = match node.kind {
                    NodeKind::File(size) => (EntryKind::File, size, false),
                    NodeKind::Dir => (EntryKind::Directory, 0, false),
                    NodeKind::Reparse => (EntryKind::Directory, 0, true),
                };
                Some(DirEntryInfo {
                    name,
                    kind,
                    size,
                    is_reparse,
                })
            })
            .collect())
    }

    fn delete_no_follow(&self, path: &Path, kind: EntryKind, expected: FileIdentity) -> Result<()> {
        let path = normalize(path);
        let shown = path.display().to_string();
        let mut state = self.state.write().map_err(|e| Error::Io {
            path: shown.clone(),
            message: format!("simulated filesystem lock poisoned: {e}"),
        })?;
        if state.denied.contains(&path) {
            return Err(Error::AccessDenied(shown));
        }
        if state.held.contains(&path) {
            return Err(Error::InUse(shown));
        }
        if state.swap_on_delete.remove(&path) {
            if let Some(NodeKind::File(size)) = state.nodes.get(&path).map(|n| n.kind) {
                state.insert(path.clone(), NodeKind::File(size));
            }
        }

        // One lock covers the check and the removal, like a handle would.
        let node = *state
            .nodes
            .get(&path)
            .ok_or_else(|| Error::NotFound(shown.clone()))?;
        if FileIdentity::new(SIM_VOLUME_SERIAL, node.file_id) != expected {
            return Err(Error::IdentityMismatch(shown));
        }
        match (node.kind, kind) {
            (NodeKind::Reparse, _) => return Err(Error::IsReparsePoint(shown)),
            (NodeKind::File(_), EntryKind::File) => {}
            (NodeKind::Dir, EntryKind::Directory) => {
                if state.has_children(&path) {
                    return Err(Error::NotEmptyDirectory(shown));
                }
            }
            _ => return Err(Error::IdentityMismatch(shown)),
        }
        state.nodes.remove(&path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_dir_returns_direct_children_only() {
        let fs = SimFs::new();
        fs.add_file("/r/a/deep.txt", 1);
        fs.add_file("/r/b.txt", 2);
        fs.add_reparse("/r/j");

        let mut names: Vec<_> = fs
            .list_dir(Path::new("/r"))
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b.txt", "j"]);
    }

    #[test]
    fn test_delete_refuses_non_empty_directory() {
        let fs = SimFs::new();
        fs.add_file("/r/d/child", 1);
        let identity = fs.open_no_follow(Path::new("/r/d")).unwrap().identity;
        let err = fs
            .delete_no_follow(Path::new("/r/d"), EntryKind::Directory, identity)
            .unwrap_err();
        assert!(matches!(err, Error::NotEmptyDirectory(_)));
        assert!(fs.exists("/r/d/child"));
    }

    #[test]
    fn test_delete_refuses_a_different_identity() {
        let fs = SimFs::new();
        fs.add_file("/r/NUL", 1);
        let original = fs.open_no_follow(Path::new("/r/NUL")).unwrap().identity;
        fs.replace_file("/r/NUL", 1);

        let err = fs
            .delete_no_follow(Path::new("/r/NUL"), EntryKind::File, original)
            .unwrap_err();
        assert!(matches!(err, Error::IdentityMismatch(_)));
        assert!(fs.exists("/r/NUL"));

        let current = fs.open_no_follow(Path::new("/r/NUL")).unwrap().identity;
        fs.delete_no_follow(Path::new("/r/NUL"), EntryKind::File, current)
            .unwrap();
        assert!(!fs.exists("/r/NUL"));
    }

    #[test]
    fn test_canonicalize_is_lexical_and_requires_existence() {
        let fs = SimFs::new();
        fs.add_dir("/r/sub");
        assert_eq!(
            fs.canonicalize(Path::new("/r/./sub/../sub")).unwrap(),
            PathBuf::from("/r/sub")
        );
        assert!(fs.canonicalize(Path::new("/missing")).is_err());
    }
}
