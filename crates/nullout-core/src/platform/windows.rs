use super::{strip_extended_prefix, DirEntryInfo, EntryKind, EntryMeta, FsOps};
use crate::error::{Error, Result};
use crate::identity::FileIdentity;
use crate::lock::{LockInfo, LockInspector};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::os::windows::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::mem;
use std::ptr;
use tracing::{debug, trace};
use winapi::shared::minwindef::{DWORD, LPVOID, TRUE, UINT};
use winapi::shared::winerror::{
    ERROR_ACCESS_DENIED, ERROR_DIR_NOT_EMPTY, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA,
    ERROR_PATH_NOT_FOUND, ERROR_SHARING_VIOLATION, ERROR_SUCCESS,
};
use winapi::um::fileapi::{
    CreateFileW, GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION, OPEN_EXISTING,
};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::restartmanager::{
    RmEndSession, RmGetList, RmRegisterResources, RmStartSession, RM_PROCESS_INFO,
};
use winapi::um::minwinbase::FileDispositionInfo;
use winapi::um::winbase::{
    SetFileInformationByHandle, FILE_DISPOSITION_INFO, FILE_FLAG_BACKUP_SEMANTICS,
    FILE_FLAG_OPEN_REPARSE_POINT,
};
use winapi::um::winnt::{
    BOOLEAN, DELETE, FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_REPARSE_POINT,
    FILE_READ_ATTRIBUTES, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, HANDLE,
};

const BACKSLASH: u16 = b'\\' as u16;
const SLASH: u16 = b'/' as u16;
const RM_SESSION_KEY_LEN: usize = 64;
const RM_GET_LIST_ATTEMPTS: usize = 3;

/// Win32 backend. Every path is passed to the OS in `\\?\` form so reserved
/// names and trailing dots/spaces reach the API unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsFs;

struct HandleGuard(HANDLE);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}

/// `path` as UTF-16 in the extended-access namespace, without a terminator.
fn extended_wide(path: &Path) -> Vec<u16> {
    let raw: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .map(|c| if c == SLASH { BACKSLASH } else { c })
        .collect();
    let verbatim: Vec<u16> = r"\\?\".encode_utf16().collect();

    if raw.starts_with(&verbatim) {
        raw
    } else if raw.starts_with(&[BACKSLASH, BACKSLASH]) {
        let mut wide: Vec<u16> = r"\\?\UNC\".encode_utf16().collect();
        wide.extend_from_slice(&raw[2..]);
        wide
    } else {
        let mut wide = verbatim;
        wide.extend(raw);
        wide
    }
}

fn nul_terminated(mut wide: Vec<u16>) -> Vec<u16> {
    wide.push(0);
    wide
}

fn extended_path_buf(path: &Path) -> PathBuf {
    PathBuf::from(OsString::from_wide(&extended_wide(path)))
}

/// Translate an OS failure into the outward taxonomy. Raw codes stay here.
fn map_os_error(err: io::Error, path: &Path) -> Error {
    let shown = path.display().to_string();
    match err.raw_os_error().map(|code| code as DWORD) {
        Some(ERROR_FILE_NOT_FOUND) | Some(ERROR_PATH_NOT_FOUND) => Error::NotFound(shown),
        Some(ERROR_ACCESS_DENIED) => Error::AccessDenied(shown),
        Some(ERROR_SHARING_VIOLATION) => Error::InUse(shown),
        Some(ERROR_DIR_NOT_EMPTY) => Error::NotEmptyDirectory(shown),
        _ => match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(shown),
            io::ErrorKind::PermissionDenied => Error::AccessDenied(shown),
            kind => Error::Io {
                path: shown,
                message: kind.to_string(),
            },
        },
    }
}

fn kind_from_attributes(attributes: DWORD) -> (EntryKind, bool) {
    let kind = if attributes & FILE_ATTRIBUTE_DIRECTORY != 0 {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    (kind, attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0)
}

/// Open the entry itself, never a reparse target, with `access` rights.
fn open_entry(path: &Path, access: DWORD) -> Result<HandleGuard> {
    let wide = nul_terminated(extended_wide(path));
    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null_mut(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OPEN_REPARSE_POINT,
            ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(map_os_error(io::Error::last_os_error(), path));
    }
    Ok(HandleGuard(handle))
}

fn entry_meta(guard: &HandleGuard, path: &Path) -> Result<EntryMeta> {
    let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { mem::zeroed() };
    if unsafe { GetFileInformationByHandle(guard.0, &mut info) } == 0 {
        return Err(map_os_error(io::Error::last_os_error(), path));
    }

    let file_id = ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64;
    let size = ((info.nFileSizeHigh as u64) << 32) | info.nFileSizeLow as u64;
    let (kind, is_reparse) = kind_from_attributes(info.dwFileAttributes);
    trace!(
        "Opened {} (attributes 0x{:08X})",
        path.display(),
        info.dwFileAttributes
    );

    Ok(EntryMeta {
        identity: FileIdentity::new(info.dwVolumeSerialNumber, file_id),
        kind,
        size,
        is_reparse,
    })
}

impl FsOps for WindowsFs {
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        let resolved = fs::canonicalize(extended_path_buf(path))
            .map_err(|err| map_os_error(err, path))?;
        Ok(PathBuf::from(strip_extended_prefix(
            &resolved.to_string_lossy(),
        )))
    }

    fn open_no_follow(&self, path: &Path) -> Result<EntryMeta> {
        let guard = open_entry(path, FILE_READ_ATTRIBUTES)?;
        entry_meta(&guard, path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        let entries =
            fs::read_dir(extended_path_buf(path)).map_err(|err| map_os_error(err, path))?;

        let mut listed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| map_os_error(err, path))?;
            // DirEntry metadata on Windows comes from the directory listing
            // and does not traverse reparse points.
            let metadata = entry
                .metadata()
                .map_err(|err| map_os_error(err, &path.join(entry.file_name())))?;
            let (kind, is_reparse) = kind_from_attributes(metadata.file_attributes());
            listed.push(DirEntryInfo {
                name: entry.file_name(),
                kind,
                size: metadata.file_size(),
                is_reparse,
            });
        }
        Ok(listed)
    }

    fn delete_no_follow(&self, path: &Path, kind: EntryKind, expected: FileIdentity) -> Result<()> {
        // The identity check and the delete go through one handle, so the
        // entry cannot be swapped between them.
        let guard = open_entry(path, DELETE | FILE_READ_ATTRIBUTES)?;
        let meta = entry_meta(&guard, path)?;
        let shown = path.display().to_string();
        if meta.is_reparse {
            return Err(Error::IsReparsePoint(shown));
        }
        if meta.kind != kind || meta.identity != expected {
            return Err(Error::IdentityMismatch(shown));
        }

        let mut disposition = FILE_DISPOSITION_INFO {
            DeleteFile: TRUE as BOOLEAN,
        };
        let ok = unsafe {
            SetFileInformationByHandle(
                guard.0,
                FileDispositionInfo,
                &mut disposition as *mut FILE_DISPOSITION_INFO as LPVOID,
                mem::size_of::<FILE_DISPOSITION_INFO>() as DWORD,
            )
        };
        if ok == 0 {
            return Err(map_os_error(io::Error::last_os_error(), path));
        }
        // Removal takes effect when the last handle closes.
        drop(guard);
        debug!("Removed {} through a delete-on-close handle", path.display());
        Ok(())
    }
}

/// Restart Manager backed lock lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestartManagerInspector;

struct RmSession(DWORD);

impl Drop for RmSession {
    fn drop(&mut self) {
        unsafe {
            RmEndSession(self.0);
        }
    }
}

fn rm_error(operation: &str, code: DWORD, path: &Path) -> Error {
    debug!("Restart manager {} returned {}", operation, code);
    Error::Io {
        path: path.display().to_string(),
        message: format!("restart manager {operation} failed"),
    }
}

fn wide_to_string(wide: &[u16]) -> String {
    let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end])
}

impl LockInspector for RestartManagerInspector {
    fn who_is_using(&self, path: &Path) -> Result<Vec<LockInfo>> {
        let mut handle: DWORD = 0;
        let mut key = [0u16; RM_SESSION_KEY_LEN];
        let rc = unsafe { RmStartSession(&mut handle, 0, key.as_mut_ptr()) };
        if rc != ERROR_SUCCESS {
            return Err(rm_error("session start", rc, path));
        }
        let session = RmSession(handle);

        // Restart Manager expects the ordinary Win32 form.
        let wide: Vec<u16> = nul_terminated(path.as_os_str().encode_wide().collect());
        let mut resources = [wide.as_ptr()];
        let rc = unsafe {
            RmRegisterResources(
                session.0,
                1,
                resources.as_mut_ptr(),
                0,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
            )
        };
        if rc != ERROR_SUCCESS {
            return Err(rm_error("register", rc, path));
        }

        let mut infos: Vec<RM_PROCESS_INFO> = Vec::new();
        for _ in 0..RM_GET_LIST_ATTEMPTS {
            let mut needed: UINT = 0;
            let mut count: UINT = infos.len() as UINT;
            let mut reasons: DWORD = 0;
            let buffer = if infos.is_empty() {
                ptr::null_mut()
            } else {
                infos.as_mut_ptr()
            };
            let rc = unsafe { RmGetList(session.0, &mut needed, &mut count, buffer, &mut reasons) };
            match rc {
                ERROR_SUCCESS => {
                    infos.truncate(count as usize);
                    return Ok(infos
                        .iter()
                        .map(|info| LockInfo {
                            process_id: info.Process.dwProcessId,
                            process_name: wide_to_string(&info.strAppName),
                            path: path.display().to_string(),
                        })
                        .collect());
                }
                ERROR_MORE_DATA => {
                    let empty: RM_PROCESS_INFO = unsafe { std::mem::zeroed() };
                    infos = vec![empty; needed as usize];
                }
                other => return Err(rm_error("list", other, path)),
            }
        }
        Err(rm_error("list", ERROR_MORE_DATA, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_extended(path: &Path, contents: &str) {
        fs::write(extended_path_buf(path), contents).unwrap();
    }

    #[test]
    fn test_identity_is_stable_for_trailing_dot_name() {
        let tmp = tempdir().unwrap();
        let root = WindowsFs.canonicalize(tmp.path()).unwrap();
        let target = root.join("testfile.");
        write_extended(&target, "original");

        let first = WindowsFs.open_no_follow(&target).unwrap();
        let second = WindowsFs.open_no_follow(&target).unwrap();
        assert_eq!(first.identity, second.identity);
        assert_eq!(first.kind, EntryKind::File);
        assert!(!first.is_reparse);
        assert_eq!(first.size, 8);
    }

    #[test]
    fn test_reserved_name_can_be_listed_and_deleted() {
        let tmp = tempdir().unwrap();
        let root = WindowsFs.canonicalize(tmp.path()).unwrap();
        let target = root.join("NUL.txt");
        write_extended(&target, "x");

        let names: Vec<_> = WindowsFs
            .list_dir(&root)
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["NUL.txt"]);

        let identity = WindowsFs.open_no_follow(&target).unwrap().identity;
        WindowsFs
            .delete_no_follow(&target, EntryKind::File, identity)
            .unwrap();
        assert!(matches!(
            WindowsFs.open_no_follow(&target),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_non_empty_directory_is_refused_by_the_os() {
        let tmp = tempdir().unwrap();
        let root = WindowsFs.canonicalize(tmp.path()).unwrap();
        let dir = root.join("notempty ");
        fs::create_dir(extended_path_buf(&dir)).unwrap();
        write_extended(&dir.join("child.txt"), "content");

        let identity = WindowsFs.open_no_follow(&dir).unwrap().identity;
        let err = WindowsFs
            .delete_no_follow(&dir, EntryKind::Directory, identity)
            .unwrap_err();
        assert!(matches!(err, Error::NotEmptyDirectory(_)));
    }

    #[test]
    fn test_delete_refuses_a_different_identity() {
        let tmp = tempdir().unwrap();
        let root = WindowsFs.canonicalize(tmp.path()).unwrap();
        let target = root.join("CON.log");
        write_extended(&target, "first");
        let original = WindowsFs.open_no_follow(&target).unwrap().identity;

        fs::remove_file(extended_path_buf(&target)).unwrap();
        write_extended(&target, "second");

        let err = WindowsFs
            .delete_no_follow(&target, EntryKind::File, original)
            .unwrap_err();
        assert!(matches!(err, Error::IdentityMismatch(_)));
        assert!(WindowsFs.open_no_follow(&target).is_ok());
    }

    #[test]
    fn test_extended_wide_forms() {
        let show = |p: &str| String::from_utf16_lossy(&extended_wide(Path::new(p)));
        assert_eq!(show(r"C:\a\b."), r"\\?\C:\a\b.");
        assert_eq!(show(r"\\srv\share\x"), r"\\?\UNC\srv\share\x");
        assert_eq!(show(r"\\?\C:\x"), r"\\?\C:\x");
        assert_eq!(show("C:/a/b"), r"\\?\C:\a\b");
    }
}
