//! Member enumeration — the files whose bytes make up an aggregate.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dumpfs_core::{DumpfsError, DumpfsResult};

use crate::policy::AggregatePolicy;

/// A real file contributing its full content to an aggregate, with the stat
/// record captured at enumeration time. The record is valid for one logical
/// operation only; the file is owned by the underlying storage and can change
/// or vanish at any moment.
#[derive(Debug, Clone)]
pub struct MemberFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl MemberFile {
    /// Capture a member's stat record (lstat — symlinks are not followed).
    pub async fn stat(path: PathBuf) -> DumpfsResult<Self> {
        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| classify(e, &path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(MemberFile {
            size: meta.len(),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            path,
            name,
        })
    }
}

/// List the member files of `dir` in enumeration order.
///
/// The order is whatever the underlying directory yields — stable for an
/// unchanged directory, but not sorted and not portable across filesystems.
/// Fails with `NotADirectory` when `dir` stopped being a directory between
/// the caller's eligibility check and this call.
pub async fn list_members(
    dir: &Path,
    policy: &AggregatePolicy,
) -> DumpfsResult<Vec<MemberFile>> {
    let meta = tokio::fs::metadata(dir).await.map_err(|e| classify(e, dir))?;
    if !meta.is_dir() {
        return Err(DumpfsError::NotADirectory(dir.to_path_buf()));
    }

    let mut rd = tokio::fs::read_dir(dir).await.map_err(|e| classify(e, dir))?;
    let mut members = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| classify(e, dir))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !policy.is_member(name) {
            continue;
        }
        members.push(MemberFile::stat(entry.path()).await?);
    }
    Ok(members)
}

/// Convert a raw `(secs, nsecs)` Unix timestamp into `SystemTime`.
pub fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Classify a storage error against the path it occurred on. Anything that
/// does not fit the taxonomy propagates unchanged as `Io`.
pub(crate) fn classify(err: std::io::Error, path: &Path) -> DumpfsError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => DumpfsError::NoSuchEntry(path.to_path_buf()),
        ErrorKind::PermissionDenied => DumpfsError::PermissionDenied(path.to_path_buf()),
        ErrorKind::NotADirectory => DumpfsError::NotADirectory(path.to_path_buf()),
        _ => DumpfsError::Io(err),
    }
}
