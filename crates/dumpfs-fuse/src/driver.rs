//! FUSE passthrough driver: mirrors a source tree and projects an aggregate
//! dump file into every recognized directory.
//!
//! ## Virtual filesystem layout
//!
//! ```text
//! Source tree:
//!   backup/2024_01_01-00_00_00/databases/mysql/app/
//!     schema.sql   (100 B)
//!     data.sql     (5000 B)
//!
//! FUSE mountpoint /mnt/dumps:
//!   backup/2024_01_01-00_00_00/databases/mysql/app/
//!     schema.sql
//!     data.sql
//!     app_DB_DUMP.sql   (synthetic, 5100 B — the two dumps end to end)
//! ```
//!
//! Every operation on a real path delegates straight to the source tree.
//! Operations on a synthetic path are served from the live member set; the
//! aggregate is never materialized and never cached.

#[cfg(feature = "fuse")]
mod inner {
    use std::collections::HashMap;
    use std::ffi::{CString, OsStr, OsString};
    use std::io::SeekFrom;
    use std::num::NonZeroU32;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;
    use fuse3::path::prelude::*;
    use fuse3::{Errno, FileType, MountOptions, SetAttr};
    use futures_util::stream;
    use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
    use tokio::sync::Mutex;
    use tracing::{debug, info};

    use dumpfs_core::DumpfsError;
    use dumpfs_overlay::members::unix_time;
    use dumpfs_overlay::{AggregateAttrs, Overlay, Resolved};

    // ── Configuration ─────────────────────────────────────────────────────────

    /// TTL for dentry/attr replies. Zero: the aggregate is a live projection
    /// and the kernel must not answer `stat` from a stale size.
    const ATTR_TTL: Duration = Duration::from_secs(0);

    // ── File handle table ─────────────────────────────────────────────────────

    /// An open file handle.
    enum FileHandle {
        /// Passthrough handle onto a real file.
        Real(Mutex<tokio::fs::File>),
        /// Aggregate handle — holds only the member directory; membership is
        /// re-enumerated on every read.
        Synthetic { dir: PathBuf },
    }

    // ── DumpFs ────────────────────────────────────────────────────────────────

    /// The FUSE filesystem driver.
    pub struct DumpFs {
        overlay: Overlay,
        read_only: bool,
        /// Open file handles: fh → handle
        handles: Arc<Mutex<HashMap<u64, Arc<FileHandle>>>>,
        /// Monotonically increasing file-handle counter
        next_fh: Arc<AtomicU64>,
    }

    impl DumpFs {
        pub fn new(overlay: Overlay, read_only: bool) -> Self {
            DumpFs {
                overlay,
                read_only,
                handles: Arc::new(Mutex::new(HashMap::new())),
                next_fh: Arc::new(AtomicU64::new(1)),
            }
        }

        /// The single mount-wide gate in front of every mutating operation.
        fn ensure_writable(&self) -> fuse3::Result<()> {
            if self.read_only {
                return Err(errno(&DumpfsError::NotSupported("mount is read-only")));
            }
            Ok(())
        }

        /// Mutations addressed at a synthetic aggregate fail regardless of
        /// the mount-wide flag — the projection is immutable by construction.
        async fn ensure_not_synthetic(&self, vpath: &str) -> fuse3::Result<PathBuf> {
            match self.overlay.resolve(vpath).await {
                Resolved::Synthetic { .. } => Err(errno(&DumpfsError::NotSupported(
                    "synthetic aggregates are immutable",
                ))),
                Resolved::Real(real) => Ok(real),
            }
        }

        async fn register_handle(&self, handle: FileHandle) -> u64 {
            let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
            self.handles.lock().await.insert(fh, Arc::new(handle));
            fh
        }

        async fn handle(&self, fh: u64) -> fuse3::Result<Arc<FileHandle>> {
            self.handles
                .lock()
                .await
                .get(&fh)
                .cloned()
                .ok_or(Errno::from(libc::EBADF))
        }

        /// Full listing of a directory: `.`/`..`, every real entry, plus the
        /// synthetic aggregate name when the directory currently offers one.
        async fn list_dir(&self, real: &Path) -> fuse3::Result<Vec<(FileType, OsString)>> {
            let mut names: Vec<(FileType, OsString)> = vec![
                (FileType::Directory, ".".into()),
                (FileType::Directory, "..".into()),
            ];
            let mut rd = tokio::fs::read_dir(real).await.map_err(|e| io_errno(&e))?;
            while let Some(entry) = rd.next_entry().await.map_err(|e| io_errno(&e))? {
                let kind = match entry.file_type().await {
                    Ok(ft) => kind_of(&ft),
                    Err(_) => continue, // entry vanished mid-listing
                };
                names.push((kind, entry.file_name()));
            }
            if let Some(synthetic) = self.overlay.synthetic_entry(real).await {
                names.push((FileType::RegularFile, synthetic.into()));
            }
            Ok(names)
        }
    }

    // ── Attribute builders ────────────────────────────────────────────────────

    fn kind_of(ft: &std::fs::FileType) -> FileType {
        if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_fifo() {
            FileType::NamedPipe
        } else if ft.is_socket() {
            FileType::Socket
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else {
            FileType::RegularFile
        }
    }

    /// Passthrough attributes, straight from an lstat record.
    fn attr_from_meta(meta: &std::fs::Metadata) -> FileAttr {
        FileAttr {
            size: meta.len(),
            blocks: meta.blocks(),
            atime: unix_time(meta.atime(), meta.atime_nsec()),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
            #[cfg(target_os = "macos")]
            crtime: unix_time(meta.ctime(), meta.ctime_nsec()),
            kind: kind_of(&meta.file_type()),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            #[cfg(target_os = "macos")]
            flags: 0,
        }
    }

    /// Attributes of a synthetic aggregate file.
    fn synthetic_file_attr(attrs: &AggregateAttrs) -> FileAttr {
        FileAttr {
            size: attrs.size,
            blocks: attrs.size.div_ceil(512),
            atime: attrs.mtime,
            mtime: attrs.mtime,
            ctime: attrs.ctime,
            #[cfg(target_os = "macos")]
            crtime: attrs.ctime,
            kind: FileType::RegularFile,
            perm: (attrs.mode.unwrap_or(0) & 0o7777) as u16,
            nlink: attrs.nlink,
            uid: attrs.uid.unwrap_or(0),
            gid: attrs.gid.unwrap_or(0),
            rdev: 0,
            blksize: 4096,
            #[cfg(target_os = "macos")]
            flags: 0,
        }
    }

    // ── Error mapping ─────────────────────────────────────────────────────────

    fn io_errno(e: &std::io::Error) -> Errno {
        Errno::from(e.raw_os_error().unwrap_or(libc::EIO))
    }

    fn errno(err: &DumpfsError) -> Errno {
        match err {
            DumpfsError::NotADirectory(_) => Errno::from(libc::ENOTDIR),
            DumpfsError::NoSuchEntry(_) => Errno::from(libc::ENOENT),
            DumpfsError::PermissionDenied(_) => Errno::from(libc::EACCES),
            DumpfsError::NotSupported(_) => Errno::from(libc::EROFS),
            DumpfsError::Config(_) => Errno::from(libc::EINVAL),
            DumpfsError::Io(e) => io_errno(e),
            DumpfsError::Other(_) => Errno::from(libc::EIO),
        }
    }

    // ── Small path helpers ────────────────────────────────────────────────────

    fn vpath(path: &OsStr) -> fuse3::Result<&str> {
        path.to_str().ok_or(Errno::from(libc::ENOENT))
    }

    fn join_visible(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{}/{}", parent.trim_end_matches('/'), name)
        }
    }

    fn c_path(path: &Path) -> fuse3::Result<CString> {
        CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::from(libc::EINVAL))
    }

    /// Does this open request ask for any form of mutation?
    fn wants_write(flags: u32) -> bool {
        let f = flags as i32;
        let acc = f & libc::O_ACCMODE;
        acc == libc::O_WRONLY || acc == libc::O_RDWR || f & (libc::O_TRUNC | libc::O_APPEND) != 0
    }

    async fn open_with_flags(path: &Path, flags: u32) -> std::io::Result<tokio::fs::File> {
        let f = flags as i32;
        let acc = f & libc::O_ACCMODE;
        let mut opts = tokio::fs::OpenOptions::new();
        opts.read(acc == libc::O_RDONLY || acc == libc::O_RDWR)
            .write(acc == libc::O_WRONLY || acc == libc::O_RDWR)
            .append(f & libc::O_APPEND != 0)
            .truncate(f & libc::O_TRUNC != 0)
            .custom_flags(f & !(libc::O_ACCMODE | libc::O_APPEND | libc::O_TRUNC | libc::O_CREAT));
        opts.open(path).await
    }

    // ── PathFilesystem impl ───────────────────────────────────────────────────

    impl PathFilesystem for DumpFs {
        async fn init(&self, _req: Request) -> fuse3::Result<ReplyInit> {
            debug!(root = %self.overlay.translator().root().display(), "dumpfs init");
            Ok(ReplyInit {
                max_write: NonZeroU32::new(128 * 1024).unwrap(),
            })
        }

        async fn destroy(&self, _req: Request) {
            info!("dumpfs unmounted");
        }

        async fn getattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            fh: Option<u64>,
            _flags: u32,
        ) -> fuse3::Result<ReplyAttr> {
            let attr = match path {
                Some(path) => self.attr_for_visible(vpath(path)?).await?,
                // Unlinked-but-open files reach us with a handle only
                None => {
                    let fh = fh.ok_or(Errno::from(libc::ENOENT))?;
                    self.attr_for_handle(fh).await?
                }
            };
            Ok(ReplyAttr { ttl: ATTR_TTL, attr })
        }

        async fn lookup(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::ENOENT))?;
            let attr = self.attr_for_visible(&join_visible(parent, name)).await?;
            Ok(ReplyEntry { ttl: ATTR_TTL, attr })
        }

        async fn setattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            fh: Option<u64>,
            set_attr: SetAttr,
        ) -> fuse3::Result<ReplyAttr> {
            self.ensure_writable()?;
            let real = match path {
                Some(path) => self.ensure_not_synthetic(vpath(path)?).await?,
                // Path gone (unlinked-but-open): only a size change is
                // applicable through the bare handle.
                None => match &*self.handle(fh.ok_or(Errno::from(libc::ENOENT))?).await? {
                    FileHandle::Synthetic { .. } => {
                        return Err(errno(&DumpfsError::NotSupported(
                            "synthetic aggregates are immutable",
                        )))
                    }
                    FileHandle::Real(file) => {
                        let file = file.lock().await;
                        if let Some(size) = set_attr.size {
                            file.set_len(size).await.map_err(|e| io_errno(&e))?;
                        }
                        let meta = file.metadata().await.map_err(|e| io_errno(&e))?;
                        return Ok(ReplyAttr {
                            ttl: ATTR_TTL,
                            attr: attr_from_meta(&meta),
                        });
                    }
                },
            };

            if let Some(mode) = set_attr.mode {
                tokio::fs::set_permissions(&real, std::fs::Permissions::from_mode(mode))
                    .await
                    .map_err(|e| io_errno(&e))?;
            }
            if set_attr.uid.is_some() || set_attr.gid.is_some() {
                std::os::unix::fs::chown(&real, set_attr.uid, set_attr.gid)
                    .map_err(|e| io_errno(&e))?;
            }
            if let Some(size) = set_attr.size {
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(&real)
                    .await
                    .map_err(|e| io_errno(&e))?;
                file.set_len(size).await.map_err(|e| io_errno(&e))?;
            }
            if set_attr.atime.is_some() || set_attr.mtime.is_some() {
                let file = std::fs::OpenOptions::new()
                    .write(true)
                    .open(&real)
                    .map_err(|e| io_errno(&e))?;
                let mut times = std::fs::FileTimes::new();
                if let Some(atime) = set_attr.atime {
                    let atime: SystemTime = unix_time(atime.sec, atime.nsec as i64);
                    times = times.set_accessed(atime);
                }
                if let Some(mtime) = set_attr.mtime {
                    let mtime: SystemTime = unix_time(mtime.sec, mtime.nsec as i64);
                    times = times.set_modified(mtime);
                }
                file.set_times(times).map_err(|e| io_errno(&e))?;
            }

            let meta = tokio::fs::symlink_metadata(&real)
                .await
                .map_err(|e| io_errno(&e))?;
            Ok(ReplyAttr {
                ttl: ATTR_TTL,
                attr: attr_from_meta(&meta),
            })
        }

        async fn readlink(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyData> {
            let real = self.overlay.real_path(vpath(path)?);
            let target = tokio::fs::read_link(&real).await.map_err(|e| io_errno(&e))?;
            let rewritten = self.overlay.translator().rewrite_link_target(&target);
            Ok(ReplyData {
                data: Bytes::from(rewritten.into_os_string().into_encoded_bytes()),
            })
        }

        async fn symlink(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            link_path: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            self.ensure_writable()?;
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let real = self
                .ensure_not_synthetic(&join_visible(parent, name))
                .await?;
            tokio::fs::symlink(link_path, &real)
                .await
                .map_err(|e| io_errno(&e))?;
            let meta = tokio::fs::symlink_metadata(&real)
                .await
                .map_err(|e| io_errno(&e))?;
            Ok(ReplyEntry {
                ttl: ATTR_TTL,
                attr: attr_from_meta(&meta),
            })
        }

        async fn mknod(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            mode: u32,
            rdev: u32,
        ) -> fuse3::Result<ReplyEntry> {
            self.ensure_writable()?;
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let real = self
                .ensure_not_synthetic(&join_visible(parent, name))
                .await?;
            let c_real = c_path(&real)?;
            let rc = unsafe { libc::mknod(c_real.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) };
            if rc != 0 {
                return Err(io_errno(&std::io::Error::last_os_error()));
            }
            let meta = tokio::fs::symlink_metadata(&real)
                .await
                .map_err(|e| io_errno(&e))?;
            Ok(ReplyEntry {
                ttl: ATTR_TTL,
                attr: attr_from_meta(&meta),
            })
        }

        async fn mkdir(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            mode: u32,
            _umask: u32,
        ) -> fuse3::Result<ReplyEntry> {
            self.ensure_writable()?;
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let real = self
                .ensure_not_synthetic(&join_visible(parent, name))
                .await?;
            let mut builder = tokio::fs::DirBuilder::new();
            builder.mode(mode);
            builder.create(&real).await.map_err(|e| io_errno(&e))?;
            let meta = tokio::fs::symlink_metadata(&real)
                .await
                .map_err(|e| io_errno(&e))?;
            Ok(ReplyEntry {
                ttl: ATTR_TTL,
                attr: attr_from_meta(&meta),
            })
        }

        async fn unlink(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            self.ensure_writable()?;
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::ENOENT))?;
            let real = self
                .ensure_not_synthetic(&join_visible(parent, name))
                .await?;
            tokio::fs::remove_file(&real).await.map_err(|e| io_errno(&e))
        }

        async fn rmdir(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            self.ensure_writable()?;
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::ENOENT))?;
            let real = self
                .ensure_not_synthetic(&join_visible(parent, name))
                .await?;
            tokio::fs::remove_dir(&real).await.map_err(|e| io_errno(&e))
        }

        async fn rename(
            &self,
            _req: Request,
            origin_parent: &OsStr,
            origin_name: &OsStr,
            parent: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<()> {
            self.ensure_writable()?;
            let origin_parent = vpath(origin_parent)?;
            let origin_name = origin_name.to_str().ok_or(Errno::from(libc::ENOENT))?;
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let origin = self
                .ensure_not_synthetic(&join_visible(origin_parent, origin_name))
                .await?;
            let target = self
                .ensure_not_synthetic(&join_visible(parent, name))
                .await?;
            tokio::fs::rename(&origin, &target)
                .await
                .map_err(|e| io_errno(&e))
        }

        async fn link(
            &self,
            _req: Request,
            path: &OsStr,
            new_parent: &OsStr,
            new_name: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            self.ensure_writable()?;
            let origin = self.ensure_not_synthetic(vpath(path)?).await?;
            let new_parent = vpath(new_parent)?;
            let new_name = new_name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let target = self
                .ensure_not_synthetic(&join_visible(new_parent, new_name))
                .await?;
            tokio::fs::hard_link(&origin, &target)
                .await
                .map_err(|e| io_errno(&e))?;
            let meta = tokio::fs::symlink_metadata(&target)
                .await
                .map_err(|e| io_errno(&e))?;
            Ok(ReplyEntry {
                ttl: ATTR_TTL,
                attr: attr_from_meta(&meta),
            })
        }

        async fn opendir(
            &self,
            _req: Request,
            _path: &OsStr,
            _flags: u32,
        ) -> fuse3::Result<ReplyOpen> {
            Ok(ReplyOpen { fh: 0, flags: 0 })
        }

        async fn open(&self, _req: Request, path: &OsStr, flags: u32) -> fuse3::Result<ReplyOpen> {
            let vp = vpath(path)?;
            match self.overlay.resolve(vp).await {
                Resolved::Synthetic { dir } => {
                    if wants_write(flags) {
                        return Err(errno(&DumpfsError::NotSupported(
                            "synthetic aggregates are immutable",
                        )));
                    }
                    // An aggregate with no current members does not exist
                    self.overlay
                        .synthetic_attrs(&dir)
                        .await
                        .map_err(|e| errno(&e))?;
                    debug!(path = %vp, dir = %dir.display(), "open aggregate");
                    let fh = self.register_handle(FileHandle::Synthetic { dir }).await;
                    Ok(ReplyOpen { fh, flags: 0 })
                }
                Resolved::Real(real) => {
                    if self.read_only && wants_write(flags) {
                        return Err(Errno::from(libc::EROFS));
                    }
                    let file = open_with_flags(&real, flags)
                        .await
                        .map_err(|e| io_errno(&e))?;
                    let fh = self.register_handle(FileHandle::Real(Mutex::new(file))).await;
                    Ok(ReplyOpen { fh, flags: 0 })
                }
            }
        }

        async fn read(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            size: u32,
        ) -> fuse3::Result<ReplyData> {
            match &*self.handle(fh).await? {
                FileHandle::Synthetic { dir } => {
                    let data = self
                        .overlay
                        .read_synthetic(dir, offset, size as usize)
                        .await
                        .map_err(|e| errno(&e))?;
                    Ok(ReplyData { data: data.into() })
                }
                FileHandle::Real(file) => {
                    let mut file = file.lock().await;
                    file.seek(SeekFrom::Start(offset))
                        .await
                        .map_err(|e| io_errno(&e))?;
                    let mut buf = vec![0u8; size as usize];
                    let mut filled = 0;
                    while filled < buf.len() {
                        let n = file
                            .read(&mut buf[filled..])
                            .await
                            .map_err(|e| io_errno(&e))?;
                        if n == 0 {
                            break;
                        }
                        filled += n;
                    }
                    buf.truncate(filled);
                    Ok(ReplyData { data: buf.into() })
                }
            }
        }

        async fn write(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            data: &[u8],
            _write_flags: u32,
            _flags: u32,
        ) -> fuse3::Result<ReplyWrite> {
            self.ensure_writable()?;
            match &*self.handle(fh).await? {
                FileHandle::Synthetic { .. } => Err(errno(&DumpfsError::NotSupported(
                    "synthetic aggregates are immutable",
                ))),
                FileHandle::Real(file) => {
                    let mut file = file.lock().await;
                    file.seek(SeekFrom::Start(offset))
                        .await
                        .map_err(|e| io_errno(&e))?;
                    file.write_all(data).await.map_err(|e| io_errno(&e))?;
                    Ok(ReplyWrite {
                        written: data.len() as u32,
                    })
                }
            }
        }

        async fn release(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _flags: u32,
            _lock_owner: u64,
            _flush: bool,
        ) -> fuse3::Result<()> {
            self.handles.lock().await.remove(&fh);
            Ok(())
        }

        async fn flush(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<()> {
            match &*self.handle(fh).await? {
                FileHandle::Synthetic { .. } => Ok(()),
                FileHandle::Real(file) => {
                    let file = file.lock().await;
                    file.sync_data().await.map_err(|e| io_errno(&e))
                }
            }
        }

        async fn fsync(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            datasync: bool,
        ) -> fuse3::Result<()> {
            match &*self.handle(fh).await? {
                FileHandle::Synthetic { .. } => Ok(()),
                FileHandle::Real(file) => {
                    let file = file.lock().await;
                    if datasync {
                        file.sync_data().await.map_err(|e| io_errno(&e))
                    } else {
                        file.sync_all().await.map_err(|e| io_errno(&e))
                    }
                }
            }
        }

        async fn access(&self, _req: Request, path: &OsStr, mask: u32) -> fuse3::Result<()> {
            let vp = vpath(path)?;
            match self.overlay.resolve(vp).await {
                Resolved::Synthetic { dir } => {
                    if mask as i32 & libc::W_OK != 0 {
                        return Err(errno(&DumpfsError::NotSupported(
                            "synthetic aggregates are immutable",
                        )));
                    }
                    self.overlay
                        .synthetic_attrs(&dir)
                        .await
                        .map_err(|e| errno(&e))?;
                    Ok(())
                }
                Resolved::Real(real) => {
                    let c_real = c_path(&real)?;
                    let rc = unsafe { libc::access(c_real.as_ptr(), mask as i32) };
                    if rc != 0 {
                        return Err(io_errno(&std::io::Error::last_os_error()));
                    }
                    Ok(())
                }
            }
        }

        async fn create(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            mode: u32,
            flags: u32,
        ) -> fuse3::Result<ReplyCreated> {
            self.ensure_writable()?;
            let parent = vpath(parent)?;
            let name = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let real = self
                .ensure_not_synthetic(&join_visible(parent, name))
                .await?;

            let f = flags as i32;
            let acc = f & libc::O_ACCMODE;
            let mut opts = tokio::fs::OpenOptions::new();
            opts.read(acc == libc::O_RDONLY || acc == libc::O_RDWR)
                .write(true)
                .create(true)
                .truncate(f & libc::O_TRUNC != 0)
                .mode(mode);
            let file = opts.open(&real).await.map_err(|e| io_errno(&e))?;

            let meta = file.metadata().await.map_err(|e| io_errno(&e))?;
            let fh = self.register_handle(FileHandle::Real(Mutex::new(file))).await;
            Ok(ReplyCreated {
                ttl: ATTR_TTL,
                attr: attr_from_meta(&meta),
                generation: 0,
                fh,
                flags: 0,
            })
        }

        // Directory entry stream types
        type DirEntryStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
        where
            Self: 'a;

        type DirEntryPlusStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
        where
            Self: 'a;

        async fn readdir<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: i64,
        ) -> fuse3::Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
            let real = self.overlay.real_path(vpath(path)?);
            let listing = self.list_dir(&real).await?;

            let entries: Vec<fuse3::Result<DirectoryEntry>> = listing
                .into_iter()
                .enumerate()
                .skip(offset as usize)
                .map(|(i, (kind, name))| {
                    Ok(DirectoryEntry {
                        kind,
                        name,
                        offset: i as i64 + 1,
                    })
                })
                .collect();

            Ok(ReplyDirectory {
                entries: stream::iter(entries),
            })
        }

        async fn readdirplus<'a>(
            &'a self,
            _req: Request,
            parent: &'a OsStr,
            _fh: u64,
            offset: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
            let real = self.overlay.real_path(vpath(parent)?);
            let self_meta = tokio::fs::symlink_metadata(&real)
                .await
                .map_err(|e| io_errno(&e))?;

            let mut entries: Vec<(FileType, OsString, FileAttr)> = vec![
                (FileType::Directory, ".".into(), attr_from_meta(&self_meta)),
                (FileType::Directory, "..".into(), attr_from_meta(&self_meta)),
            ];

            let mut rd = tokio::fs::read_dir(&real).await.map_err(|e| io_errno(&e))?;
            while let Some(entry) = rd.next_entry().await.map_err(|e| io_errno(&e))? {
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(_) => continue, // entry vanished mid-listing
                };
                entries.push((kind_of(&meta.file_type()), entry.file_name(), attr_from_meta(&meta)));
            }
            if let Some((name, attrs)) = self.overlay.synthetic_dirent(&real).await {
                entries.push((FileType::RegularFile, name.into(), synthetic_file_attr(&attrs)));
            }

            let entries: Vec<fuse3::Result<DirectoryEntryPlus>> = entries
                .into_iter()
                .enumerate()
                .skip(offset as usize)
                .map(|(i, (kind, name, attr))| {
                    Ok(DirectoryEntryPlus {
                        kind,
                        name,
                        offset: i as i64 + 1,
                        attr,
                        entry_ttl: ATTR_TTL,
                        attr_ttl: ATTR_TTL,
                    })
                })
                .collect();

            Ok(ReplyDirectoryPlus {
                entries: stream::iter(entries),
            })
        }

        async fn statfs(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyStatFs> {
            let real = match self.overlay.resolve(vpath(path)?).await {
                Resolved::Synthetic { dir } => dir,
                Resolved::Real(real) => real,
            };
            let c_real = c_path(&real)?;
            let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::statvfs(c_real.as_ptr(), &mut st) };
            if rc != 0 {
                return Err(io_errno(&std::io::Error::last_os_error()));
            }
            Ok(ReplyStatFs {
                blocks: st.f_blocks,
                bfree: st.f_bfree,
                bavail: st.f_bavail,
                files: st.f_files,
                ffree: st.f_ffree,
                bsize: st.f_bsize as u32,
                namelen: st.f_namemax as u32,
                frsize: st.f_frsize as u32,
            })
        }
    }

    impl DumpFs {
        /// Attributes for a visible path — synthetic or passthrough.
        async fn attr_for_visible(&self, vp: &str) -> fuse3::Result<FileAttr> {
            match self.overlay.resolve(vp).await {
                Resolved::Synthetic { dir } => {
                    let attrs = self
                        .overlay
                        .synthetic_attrs(&dir)
                        .await
                        .map_err(|e| errno(&e))?;
                    Ok(synthetic_file_attr(&attrs))
                }
                Resolved::Real(real) => {
                    let meta = tokio::fs::symlink_metadata(&real)
                        .await
                        .map_err(|e| io_errno(&e))?;
                    Ok(attr_from_meta(&meta))
                }
            }
        }

        /// Attributes via an open handle (path no longer available).
        async fn attr_for_handle(&self, fh: u64) -> fuse3::Result<FileAttr> {
            match &*self.handle(fh).await? {
                FileHandle::Synthetic { dir } => {
                    let attrs = self
                        .overlay
                        .synthetic_attrs(dir)
                        .await
                        .map_err(|e| errno(&e))?;
                    Ok(synthetic_file_attr(&attrs))
                }
                FileHandle::Real(file) => {
                    let file = file.lock().await;
                    let meta = file.metadata().await.map_err(|e| io_errno(&e))?;
                    Ok(attr_from_meta(&meta))
                }
            }
        }
    }

    // ── Public mount API ──────────────────────────────────────────────────────

    /// Mount configuration
    pub struct MountConfig {
        pub overlay: Overlay,
        pub mountpoint: PathBuf,
        pub read_only: bool,
        pub allow_other: bool,
    }

    /// Mount the overlay and block until unmounted.
    ///
    /// Call from an async context. Returns when the filesystem is unmounted
    /// (e.g. via `fusermount3 -u <mountpoint>` or `dumpfs unmount`).
    pub async fn mount(cfg: MountConfig) -> std::io::Result<()> {
        let read_only = cfg.read_only;
        let fs = DumpFs::new(cfg.overlay, read_only);

        let mut opts = MountOptions::default();
        opts.fs_name("dumpfs");
        opts.read_only(read_only);
        opts.force_readdir_plus(true);
        if cfg.allow_other {
            opts.allow_other(true);
        }

        info!(mountpoint = %cfg.mountpoint.display(), read_only, "mounting dumpfs (unprivileged via fusermount3)");

        let handle = Session::new(opts)
            .mount_with_unprivileged(fs, &cfg.mountpoint)
            .await?;

        handle.await
    }
}

#[cfg(feature = "fuse")]
pub use inner::{mount, DumpFs, MountConfig};
