//! The path-based filesystem capability set.
//!
//! [`FileOperations`] has one method per filesystem call, in the shape of the
//! libfuse high-level API: absolute paths, caller-owned output buffers, and an
//! explicit [`CallContext`] instead of a thread-global one. The kernel-facing
//! adapter ([`RpcFs`](crate::RpcFs)) resolves inodes to paths and calls into
//! this trait; [`RemoteFs`](crate::RemoteFs) implements it against the file
//! service.
//!
//! Every method defaults to [`FuseError::NotImplemented`], so an
//! implementation only provides what it supports.

use crate::error::{FuseError, FuseResult};
use crate::native::{
    CallContext, ConnectionInfo, FileInfo, FileLock, FileStat, MountOptions, StatVfs, Timespec,
};

/// Directory listing sink. Returns `true` when the caller's buffer is full
/// and enumeration should stop.
pub type DirFiller<'a> = dyn FnMut(&str, &FileStat) -> bool + 'a;

#[allow(unused_variables)]
pub trait FileOperations: Send + Sync {
    /// Called once after the kernel connection is established.
    fn init(&self, conn: &ConnectionInfo, options: &MountOptions) -> FuseResult<()> {
        Ok(())
    }

    /// Called once when the filesystem is unmounted.
    fn destroy(&self) {}

    /// `fi` is present when the kernel supplied an open handle.
    fn getattr(
        &self,
        ctx: &CallContext,
        path: &str,
        fi: Option<&FileInfo>,
        stat: &mut FileStat,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// Copies at most `buf.len()` bytes of the link target into `buf` and
    /// returns the number copied.
    fn readlink(&self, ctx: &CallContext, path: &str, buf: &mut [u8]) -> FuseResult<usize> {
        Err(FuseError::NotImplemented)
    }

    fn mknod(&self, ctx: &CallContext, path: &str, mode: u32, rdev: u64) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn mkdir(&self, ctx: &CallContext, path: &str, mode: u32) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn unlink(&self, ctx: &CallContext, path: &str) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn rmdir(&self, ctx: &CallContext, path: &str) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// Creates `link_path` pointing at `target`.
    fn symlink(&self, ctx: &CallContext, target: &str, link_path: &str) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn rename(&self, ctx: &CallContext, from: &str, to: &str, flags: u32) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn link(&self, ctx: &CallContext, from: &str, to: &str) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn chmod(
        &self,
        ctx: &CallContext,
        path: &str,
        mode: u32,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// `None` leaves that id unchanged.
    fn chown(
        &self,
        ctx: &CallContext,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn truncate(
        &self,
        ctx: &CallContext,
        path: &str,
        size: i64,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// On success `fi` carries the handle chosen by the implementation.
    fn open(&self, ctx: &CallContext, path: &str, fi: &mut FileInfo) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// Fills `buf` from `offset` and returns the number of bytes read.
    fn read(
        &self,
        ctx: &CallContext,
        path: &str,
        buf: &mut [u8],
        offset: i64,
        fi: &FileInfo,
    ) -> FuseResult<usize> {
        Err(FuseError::NotImplemented)
    }

    /// Returns the number of bytes actually written, which may be less than
    /// `data.len()`.
    fn write(
        &self,
        ctx: &CallContext,
        path: &str,
        data: &[u8],
        offset: i64,
        fi: &FileInfo,
    ) -> FuseResult<usize> {
        Err(FuseError::NotImplemented)
    }

    fn statfs(&self, ctx: &CallContext, path: &str, stat: &mut StatVfs) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn flush(&self, ctx: &CallContext, path: &str, fi: &FileInfo) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn release(&self, ctx: &CallContext, path: &str, fi: &FileInfo) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn fsync(&self, ctx: &CallContext, path: &str, datasync: bool, fi: &FileInfo) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn setxattr(
        &self,
        ctx: &CallContext,
        path: &str,
        name: &str,
        value: &[u8],
        flags: i32,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// With an empty `buf`, returns the size of the value without copying.
    /// Otherwise copies the value and returns its length, or fails with
    /// [`FuseError::InsufficientBuffer`] if it does not fit.
    fn getxattr(
        &self,
        ctx: &CallContext,
        path: &str,
        name: &str,
        buf: &mut [u8],
    ) -> FuseResult<usize> {
        Err(FuseError::NotImplemented)
    }

    fn listxattr(&self, ctx: &CallContext, path: &str, buf: &mut [u8]) -> FuseResult<usize> {
        Err(FuseError::NotImplemented)
    }

    fn removexattr(&self, ctx: &CallContext, path: &str, name: &str) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn opendir(&self, ctx: &CallContext, path: &str, fi: &mut FileInfo) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// Feeds entries to `filler` in order until it reports a full buffer.
    /// Stopping early is not an error.
    fn readdir(
        &self,
        ctx: &CallContext,
        path: &str,
        offset: i64,
        fi: &FileInfo,
        filler: &mut DirFiller<'_>,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn releasedir(&self, ctx: &CallContext, path: &str, fi: &FileInfo) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn fsyncdir(
        &self,
        ctx: &CallContext,
        path: &str,
        datasync: bool,
        fi: &FileInfo,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// `mask` is a combination of `R_OK`, `W_OK` and `X_OK`, or `F_OK`.
    fn access(&self, ctx: &CallContext, path: &str, mask: i32) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// Creates and opens a regular file.
    fn create(
        &self,
        ctx: &CallContext,
        path: &str,
        mode: u32,
        fi: &mut FileInfo,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn lock(
        &self,
        ctx: &CallContext,
        path: &str,
        fi: &FileInfo,
        cmd: i32,
        lock: &mut FileLock,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// `None` leaves that timestamp unchanged.
    fn utimens(
        &self,
        ctx: &CallContext,
        path: &str,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    /// Maps the file-relative block `idx` to a device block in place.
    fn bmap(&self, ctx: &CallContext, path: &str, blocksize: u64, idx: &mut u64) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }
}
