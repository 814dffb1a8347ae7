//! fuser adapter over a path-based [`FileOperations`] implementation.
//!
//! The kernel speaks in inode numbers and file handles; [`RpcFs`] resolves
//! them to paths through the [`InodeTable`] and to [`FileInfo`] through the
//! [`HandleTable`], then calls the matching [`FileOperations`] method on a
//! worker thread and replies from there.
//!
//! | Kernel request        | Operation(s)                                   |
//! |-----------------------|------------------------------------------------|
//! | `lookup`              | `getattr`                                      |
//! | `setattr`             | `chmod`, `chown`, `truncate`, `utimens`, then `getattr` |
//! | `mknod`/`mkdir`/`symlink`/`link` | the operation, then `getattr`       |
//! | `create`              | `create`, then `getattr`                       |
//! | `readdir`             | `readdir` (whole listing, windowed locally)    |
//! | `getlk`/`setlk`       | `lock`                                         |
//! | `forget`              | local only                                     |

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyBmap, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyLock, ReplyOpen, ReplyStatfs, ReplyWrite,
    ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use rpcfs_core::StatusCode;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::handles::HandleTable;
use crate::inode::{InodeTable, ROOT_INODE, child_path, parent_path};
use crate::native::{CallContext, ConnectionInfo, FileInfo, FileLock, FileStat, StatVfs, Timespec};
use crate::operations::FileOperations;
use crate::workers::WorkerPool;

/// Block size reported when the remote leaves `blksize` unset.
pub const BLOCK_SIZE: u32 = 4096;

/// Largest write the kernel is asked to send in one request.
const MAX_WRITE: u32 = 128 * 1024;

/// Buffer for link targets, `PATH_MAX`.
const READLINK_BUF: usize = 4096;

/// `d_ino` for listed entries the kernel has not looked up, matching libfuse's
/// `FUSE_UNKNOWN_INO`.
const UNKNOWN_INO: u64 = 0xffff_ffff;

/// Attribute changes requested by one `setattr`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<Timespec>,
    pub mtime: Option<Timespec>,
}

/// State shared between the session thread and the workers.
struct Shared<O> {
    ops: O,
    inodes: InodeTable,
    handles: HandleTable,
    config: MountConfig,
}

impl<O: FileOperations> Shared<O> {
    fn path(&self, ino: u64) -> FuseResult<String> {
        self.inodes.path(ino).ok_or(FuseError::InvalidInode(ino))
    }

    fn child(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        let name = name.to_str().ok_or(FuseError::InvalidName)?;
        Ok(child_path(&self.path(parent)?, name))
    }

    fn handle(&self, fh: u64) -> FuseResult<FileInfo> {
        self.handles.get(fh).ok_or(FuseError::InvalidHandle(fh))
    }

    fn stat(&self, ctx: &CallContext, path: &str, fi: Option<&FileInfo>) -> FuseResult<FileStat> {
        let mut st = FileStat::default();
        self.ops.getattr(ctx, path, fi, &mut st)?;
        Ok(st)
    }

    /// Stats `path` and counts a kernel lookup against its inode.
    fn entry(&self, ctx: &CallContext, path: &str) -> FuseResult<FileAttr> {
        let st = self.stat(ctx, path, None)?;
        let ino = self.inodes.lookup(path);
        Ok(to_file_attr(ino, &st))
    }

    fn setattr(
        &self,
        ctx: &CallContext,
        path: &str,
        fi: Option<&FileInfo>,
        changes: SetAttr,
    ) -> FuseResult<FileStat> {
        if let Some(mode) = changes.mode {
            self.ops.chmod(ctx, path, mode, fi)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            self.ops.chown(ctx, path, changes.uid, changes.gid, fi)?;
        }
        if let Some(size) = changes.size {
            let size = i64::try_from(size).map_err(|_| FuseError::Remote(StatusCode::Efbig))?;
            self.ops.truncate(ctx, path, size, fi)?;
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            self.ops.utimens(ctx, path, changes.atime, changes.mtime, fi)?;
        }
        self.stat(ctx, path, fi)
    }

    /// Emits `.`, `..` and the remote listing through `add`, skipping the
    /// first `offset` entries. `add` gets each entry's resume offset and
    /// returns `true` when the reply buffer is full.
    fn fill_dir(
        &self,
        ctx: &CallContext,
        ino: u64,
        path: &str,
        fi: &FileInfo,
        offset: i64,
        add: &mut dyn FnMut(u64, i64, FileType, &str) -> bool,
    ) -> FuseResult<()> {
        let mut index: i64 = 0;
        let mut emit = |ino: u64, kind: FileType, name: &str| -> bool {
            index += 1;
            if index <= offset {
                return false;
            }
            add(ino, index, kind, name)
        };

        let parent = self.inodes.ino(parent_path(path)).unwrap_or(ROOT_INODE);
        if emit(ino, FileType::Directory, ".") || emit(parent, FileType::Directory, "..") {
            return Ok(());
        }

        self.ops.readdir(ctx, path, 0, fi, &mut |name, st| {
            if name == "." || name == ".." {
                return false;
            }
            let child = self
                .inodes
                .ino(&child_path(path, name))
                .unwrap_or(UNKNOWN_INO);
            emit(child, file_type(st.mode), name)
        })
    }
}

/// FUSE filesystem forwarding every call to a [`FileOperations`].
pub struct RpcFs<O: FileOperations + 'static> {
    shared: Arc<Shared<O>>,
    workers: WorkerPool,
}

impl<O: FileOperations + 'static> RpcFs<O> {
    /// Starts `config.workers` worker threads.
    pub fn new(ops: O, config: MountConfig) -> io::Result<Self> {
        let workers = WorkerPool::new(config.workers)?;
        Ok(Self {
            shared: Arc::new(Shared {
                ops,
                inodes: InodeTable::new(),
                handles: HandleTable::new(),
                config,
            }),
            workers,
        })
    }

    pub fn operations(&self) -> &O {
        &self.shared.ops
    }

    pub fn config(&self) -> &MountConfig {
        &self.shared.config
    }

    /// Runs `job` on a worker with the shared state.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce(&Shared<O>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.workers.execute(move || job(&shared));
    }
}

fn context(req: &Request<'_>) -> CallContext {
    CallContext::new(req.uid(), req.gid(), req.pid())
}

/// Maps the `S_IFMT` bits of a mode to a fuser file type. An unset type is
/// treated as a regular file.
pub fn file_type(mode: u32) -> FileType {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
        m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
        m if m == libc::S_IFIFO as u32 => FileType::NamedPipe,
        m if m == libc::S_IFSOCK as u32 => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

/// Kernel attributes for `ino`. The remote inode number is ignored; the
/// kernel only ever sees locally allocated inodes.
pub fn to_file_attr(ino: u64, st: &FileStat) -> FileAttr {
    let mtime = st.mtime.to_system_time();
    FileAttr {
        ino,
        size: u64::try_from(st.size).unwrap_or(0),
        blocks: u64::try_from(st.blocks).unwrap_or(0),
        atime: st.atime.to_system_time(),
        mtime,
        ctime: st.ctime.to_system_time(),
        crtime: mtime,
        kind: file_type(st.mode),
        perm: (st.mode & 0o7777) as u16,
        nlink: u32::try_from(st.nlink).unwrap_or(u32::MAX).max(1),
        uid: st.uid,
        gid: st.gid,
        rdev: st.rdev as u32,
        blksize: u32::try_from(st.blksize).ok().filter(|&b| b > 0).unwrap_or(BLOCK_SIZE),
        flags: 0,
    }
}

fn time_or_now(t: TimeOrNow) -> Timespec {
    match t {
        TimeOrNow::SpecificTime(t) => Timespec::from(t),
        TimeOrNow::Now => Timespec::now(),
    }
}

macro_rules! try_reply {
    ($reply:expr, $e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                let e: FuseError = e;
                trace!(error = %e, "replying with error");
                return $reply.error(e.to_errno());
            }
        }
    };
}

impl<O: FileOperations + 'static> Filesystem for RpcFs<O> {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        let max_write = match config.set_max_write(MAX_WRITE) {
            Ok(_) => MAX_WRITE,
            Err(nearest) => {
                config.set_max_write(nearest).ok();
                nearest
            }
        };

        let conn = ConnectionInfo {
            max_write,
            ..ConnectionInfo::default()
        };
        let options = self.shared.config.mount_options();
        if let Err(e) = self.shared.ops.init(&conn, &options) {
            warn!(error = %e, "Remote init failed, continuing");
        }
        info!(workers = self.workers.threads(), "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        self.shared.ops.destroy();
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.child(parent, name));
        self.spawn(move |fs| {
            let attr = try_reply!(reply, fs.entry(&ctx, &path));
            reply.entry(&fs.config.attr_ttl, &attr, 0);
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(ino, nlookup, "forget");
        self.shared.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.shared.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let fi = fh.and_then(|fh| self.shared.handles.get(fh));
        self.spawn(move |fs| {
            let st = try_reply!(reply, fs.stat(&ctx, &path, fi.as_ref()));
            reply.attr(&fs.config.attr_ttl, &to_file_attr(ino, &st));
        });
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let fi = fh.and_then(|fh| self.shared.handles.get(fh));
        let changes = SetAttr {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(time_or_now),
            mtime: mtime.map(time_or_now),
        };
        self.spawn(move |fs| {
            let st = try_reply!(reply, fs.setattr(&ctx, &path, fi.as_ref(), changes));
            reply.attr(&fs.config.attr_ttl, &to_file_attr(ino, &st));
        });
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        self.spawn(move |fs| {
            let mut buf = vec![0u8; READLINK_BUF];
            let n = try_reply!(reply, fs.ops.readlink(&ctx, &path, &mut buf));
            reply.data(&buf[..n]);
        });
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let ctx = context(req).with_umask(umask);
        let path = try_reply!(reply, self.shared.child(parent, name));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.mknod(&ctx, &path, mode, u64::from(rdev)));
            let attr = try_reply!(reply, fs.entry(&ctx, &path));
            reply.entry(&fs.config.attr_ttl, &attr, 0);
        });
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let ctx = context(req).with_umask(umask);
        let path = try_reply!(reply, self.shared.child(parent, name));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.mkdir(&ctx, &path, mode));
            let attr = try_reply!(reply, fs.entry(&ctx, &path));
            reply.entry(&fs.config.attr_ttl, &attr, 0);
        });
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.child(parent, name));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.unlink(&ctx, &path));
            fs.inodes.invalidate_path(&path);
            reply.ok();
        });
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.child(parent, name));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.rmdir(&ctx, &path));
            fs.inodes.invalidate_path(&path);
            reply.ok();
        });
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.child(parent, link_name));
        let target = try_reply!(reply, target.to_str().map(str::to_owned).ok_or(FuseError::InvalidName));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.symlink(&ctx, &target, &path));
            let attr = try_reply!(reply, fs.entry(&ctx, &path));
            reply.entry(&fs.config.attr_ttl, &attr, 0);
        });
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let ctx = context(req);
        let from = try_reply!(reply, self.shared.child(parent, name));
        let to = try_reply!(reply, self.shared.child(newparent, newname));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.rename(&ctx, &from, &to, flags));
            fs.inodes.rename(&from, &to);
            reply.ok();
        });
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let ctx = context(req);
        let from = try_reply!(reply, self.shared.path(ino));
        let to = try_reply!(reply, self.shared.child(newparent, newname));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.link(&ctx, &from, &to));
            let attr = try_reply!(reply, fs.entry(&ctx, &to));
            reply.entry(&fs.config.attr_ttl, &attr, 0);
        });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        self.spawn(move |fs| {
            let mut fi = FileInfo::with_flags(flags);
            try_reply!(reply, fs.ops.open(&ctx, &path, &mut fi));
            let fh = fs.handles.insert(fi);
            debug!(path = %path, fh, remote_fh = fi.fh, "open");
            reply.opened(fh, fi.open_flags());
        });
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let fi = try_reply!(reply, self.shared.handle(fh));
        self.spawn(move |fs| {
            let mut buf = vec![0u8; size as usize];
            let n = try_reply!(reply, fs.ops.read(&ctx, &path, &mut buf, offset, &fi));
            reply.data(&buf[..n]);
        });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let mut fi = try_reply!(reply, self.shared.handle(fh));
        if let Some(owner) = lock_owner {
            fi.lock_owner = owner;
        }
        let data = data.to_vec();
        self.spawn(move |fs| {
            let n = try_reply!(reply, fs.ops.write(&ctx, &path, &data, offset, &fi));
            reply.written(u32::try_from(n).unwrap_or(u32::MAX));
        });
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, fh: u64, lock_owner: u64, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let mut fi = try_reply!(reply, self.shared.handle(fh));
        fi.lock_owner = lock_owner;
        fi.flush = true;
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.flush(&ctx, &path, &fi));
            reply.ok();
        });
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
        reply: ReplyEmpty,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let mut fi = try_reply!(reply, self.shared.handles.remove(fh).ok_or(FuseError::InvalidHandle(fh)));
        fi.flush = flush;
        if let Some(owner) = lock_owner {
            fi.lock_owner = owner;
        }
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.release(&ctx, &path, &fi));
            reply.ok();
        });
    }

    fn fsync(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let fi = try_reply!(reply, self.shared.handle(fh));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.fsync(&ctx, &path, datasync, &fi));
            reply.ok();
        });
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        self.spawn(move |fs| {
            let mut fi = FileInfo::with_flags(flags);
            try_reply!(reply, fs.ops.opendir(&ctx, &path, &mut fi));
            let fh = fs.handles.insert(fi);
            reply.opened(fh, fi.open_flags());
        });
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let fi = try_reply!(reply, self.shared.handle(fh));
        self.spawn(move |fs| {
            let filled = fs.fill_dir(&ctx, ino, &path, &fi, offset, &mut |ino, next, kind, name| {
                reply.add(ino, next, kind, name)
            });
            try_reply!(reply, filled);
            reply.ok();
        });
    }

    fn releasedir(&mut self, req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let fi = try_reply!(reply, self.shared.handles.remove(fh).ok_or(FuseError::InvalidHandle(fh)));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.releasedir(&ctx, &path, &fi));
            reply.ok();
        });
    }

    fn fsyncdir(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let fi = try_reply!(reply, self.shared.handle(fh));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.fsyncdir(&ctx, &path, datasync, &fi));
            reply.ok();
        });
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        self.spawn(move |fs| {
            let mut sv = StatVfs::default();
            try_reply!(reply, fs.ops.statfs(&ctx, &path, &mut sv));
            reply.statfs(
                sv.blocks,
                sv.bfree,
                sv.bavail,
                sv.files,
                sv.ffree,
                sv.bsize as u32,
                sv.namemax as u32,
                sv.frsize as u32,
            );
        });
    }

    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let name = try_reply!(reply, name.to_str().map(str::to_owned).ok_or(FuseError::InvalidName));
        let value = value.to_vec();
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.setxattr(&ctx, &path, &name, &value, flags));
            reply.ok();
        });
    }

    fn getxattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let name = try_reply!(reply, name.to_str().map(str::to_owned).ok_or(FuseError::InvalidName));
        self.spawn(move |fs| {
            let mut buf = vec![0u8; size as usize];
            let n = try_reply!(reply, fs.ops.getxattr(&ctx, &path, &name, &mut buf));
            if size == 0 {
                reply.size(u32::try_from(n).unwrap_or(u32::MAX));
            } else {
                reply.data(&buf[..n]);
            }
        });
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let mut buf = vec![0u8; size as usize];
        let n = try_reply!(reply, self.shared.ops.listxattr(&ctx, &path, &mut buf));
        if size == 0 {
            reply.size(u32::try_from(n).unwrap_or(u32::MAX));
        } else {
            reply.data(&buf[..n]);
        }
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let name = try_reply!(reply, name.to_str().ok_or(FuseError::InvalidName));
        try_reply!(reply, self.shared.ops.removexattr(&ctx, &path, name));
        reply.ok();
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        self.spawn(move |fs| {
            try_reply!(reply, fs.ops.access(&ctx, &path, mask));
            reply.ok();
        });
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let ctx = context(req).with_umask(umask);
        let path = try_reply!(reply, self.shared.child(parent, name));
        self.spawn(move |fs| {
            let mut fi = FileInfo::with_flags(flags);
            try_reply!(reply, fs.ops.create(&ctx, &path, mode, &mut fi));
            let attr = try_reply!(reply, fs.entry(&ctx, &path));
            let fh = fs.handles.insert(fi);
            reply.created(&fs.config.attr_ttl, &attr, 0, fh, fi.open_flags());
        });
    }

    fn getlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        reply: ReplyLock,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let mut fi = try_reply!(reply, self.shared.handle(fh));
        fi.lock_owner = lock_owner;
        let mut lock = flock(start, end, typ, pid);
        try_reply!(reply, self.shared.ops.lock(&ctx, &path, &fi, libc::F_GETLK, &mut lock));
        let start = u64::try_from(lock.start).unwrap_or(0);
        let end = if lock.len == 0 {
            u64::MAX
        } else {
            start.saturating_add(u64::try_from(lock.len).unwrap_or(0)).saturating_sub(1)
        };
        reply.locked(start, end, lock.typ, lock.pid);
    }

    fn setlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        sleep: bool,
        reply: ReplyEmpty,
    ) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let mut fi = try_reply!(reply, self.shared.handle(fh));
        fi.lock_owner = lock_owner;
        let mut lock = flock(start, end, typ, pid);
        let cmd = if sleep { libc::F_SETLKW } else { libc::F_SETLK };
        try_reply!(reply, self.shared.ops.lock(&ctx, &path, &fi, cmd, &mut lock));
        reply.ok();
    }

    fn bmap(&mut self, req: &Request<'_>, ino: u64, blocksize: u32, idx: u64, reply: ReplyBmap) {
        let ctx = context(req);
        let path = try_reply!(reply, self.shared.path(ino));
        let mut idx = idx;
        try_reply!(reply, self.shared.ops.bmap(&ctx, &path, u64::from(blocksize), &mut idx));
        reply.bmap(idx);
    }
}

/// `struct flock` for an inclusive kernel byte range; `end == u64::MAX`
/// means "to end of file".
fn flock(start: u64, end: u64, typ: i32, pid: u32) -> FileLock {
    let len = if end == u64::MAX {
        0
    } else {
        i64::try_from(end.saturating_sub(start).saturating_add(1)).unwrap_or(0)
    };
    FileLock {
        typ,
        whence: libc::SEEK_SET,
        start: i64::try_from(start).unwrap_or(i64::MAX),
        len,
        pid,
    }
}
