//! [`FileOperations`] over a pool of file service clients.
//!
//! Every operation follows the same sequence:
//!
//! 1. translate the caller's context and handle into wire structures
//! 2. check a client out of the pool according to the [`AcquirePolicy`]
//! 3. reopen the client if an earlier transport error closed it
//! 4. invoke the remote method
//! 5. on `Success`, translate the payload into the caller's buffers
//! 6. otherwise map the status, or the transport error, to a [`FuseError`]
//!
//! The client goes back to the pool when the [`PoolGuard`](rpcfs_mount::PoolGuard)
//! drops, before any payload is handed to the caller, whatever the outcome.
//! A client that raised a transport error is closed before it is returned,
//! and the next borrower reopens it.
//!
//! Byte-range locks, block mapping and xattr listing/removal have no
//! counterpart in a stateless remote protocol and always fail with
//! [`FuseError::NotImplemented`] without borrowing a client.

use std::sync::Arc;
use std::time::Instant;

use rpcfs_core::{FileService, FileSystemResponse, FuseAccessMode, RpcError, RpcResult};
use rpcfs_mount::{AcquirePolicy, ConnectionPool, ConnectionStats};
use tracing::{debug, error, trace, warn};

use crate::error::{FuseError, FuseResult};
use crate::native::{
    CallContext, ConnectionInfo, FileInfo, FileLock, FileStat, MountOptions, StatVfs, Timespec,
};
use crate::operations::{DirFiller, FileOperations};
use crate::translate::{
    apply_handle, apply_stat, apply_statfs, config_to_wire, connection_to_wire, context_to_wire,
    dir_entry_from_wire, handle_to_wire, utimens_to_wire,
};

/// Forwards filesystem operations to a remote file service.
pub struct RemoteFs<C: FileService> {
    pool: Arc<ConnectionPool<C>>,
    policy: AcquirePolicy,
    stats: Arc<ConnectionStats>,
}

impl<C: FileService> RemoteFs<C> {
    /// Uses a blocking acquire and private statistics.
    pub fn new(pool: Arc<ConnectionPool<C>>) -> Self {
        Self {
            pool,
            policy: AcquirePolicy::Block,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AcquirePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<ConnectionStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn policy(&self) -> AcquirePolicy {
        self.policy
    }

    /// Runs one remote call on a pooled client and returns the response of a
    /// successful call.
    fn call<F>(&self, method: &'static str, path: &str, f: F) -> FuseResult<FileSystemResponse>
    where
        F: FnOnce(&mut C) -> RpcResult,
    {
        let mut conn = match self.pool.checkout(self.policy) {
            Ok(conn) => conn,
            Err(e) => {
                self.stats.record_unavailable();
                warn!(method, path, error = %e, "No connection available");
                return Err(FuseError::Unavailable(e));
            }
        };

        let outcome = self.run(&mut conn, method, path, f);

        // A client borrowed across `destroy` must not linger open.
        if let Some(client) = conn.detach()
            && let Err(mut client) = self.pool.checkin(client)
        {
            client.close();
            debug!(client = client.id(), "Closed client returned after shutdown");
        }
        outcome
    }

    fn run<F>(
        &self,
        conn: &mut C,
        method: &'static str,
        path: &str,
        f: F,
    ) -> FuseResult<FileSystemResponse>
    where
        F: FnOnce(&mut C) -> RpcResult,
    {
        if !conn.is_open() {
            if let Err(e) = conn.open() {
                error!(method, path, client = conn.id(), error = %e, "Reconnect failed");
                return Err(FuseError::Canceled(e));
            }
            self.stats.record_reconnect();
            warn!(client = conn.id(), "Reopened connection after transport error");
        }

        let start = Instant::now();
        let result = f(conn);
        let elapsed = start.elapsed();

        match result {
            Ok(resp) if resp.is_success() => {
                self.stats.record_success(elapsed);
                trace!(method, path, client = conn.id(), elapsed_us = elapsed.as_micros() as u64, "ok");
                Ok(resp)
            }
            Ok(resp) => {
                self.stats.record_remote_failure(elapsed);
                debug!(method, path, status = ?resp.status, "Remote call failed");
                Err(FuseError::Remote(resp.status))
            }
            Err(e) => {
                self.stats.record_transport_error(elapsed);
                error!(method, path, client = conn.id(), error = %e, "Transport error, call canceled");
                conn.close();
                Err(FuseError::Canceled(e))
            }
        }
    }
}

impl<C: FileService> std::fmt::Debug for RemoteFs<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFs")
            .field("pool", &self.pool)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Copies as much of `src` as fits in `dst`.
fn copy_truncated(src: &[u8], dst: &mut [u8]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

impl<C: FileService> FileOperations for RemoteFs<C> {
    fn init(&self, conn: &ConnectionInfo, options: &MountOptions) -> FuseResult<()> {
        let connection = connection_to_wire(conn);
        let config = config_to_wire(options);
        self.call("init", "/", move |c| c.init(connection, config))?;
        Ok(())
    }

    fn destroy(&self) {
        match self.pool.try_acquire() {
            Ok(mut conn) => {
                if conn.is_open()
                    && let Err(e) = conn.destroy()
                {
                    debug!(error = %e, "Remote destroy failed");
                }
                self.pool.release(conn);
            }
            Err(e) => debug!(error = %e, "Skipping remote destroy"),
        }

        self.pool.close();
        // Clients still checked out are closed as their calls return.
        for mut conn in self.pool.drain() {
            conn.close();
        }
        debug!("Connection pool closed");
    }

    fn getattr(
        &self,
        ctx: &CallContext,
        path: &str,
        fi: Option<&FileInfo>,
        stat: &mut FileStat,
    ) -> FuseResult<()> {
        let info = handle_to_wire(fi);
        let context = context_to_wire(ctx);
        let resp = self.call("getattr", path, move |c| c.getattr(path, info, context))?;
        apply_stat(resp.require_stats()?, stat);
        Ok(())
    }

    fn readlink(&self, ctx: &CallContext, path: &str, buf: &mut [u8]) -> FuseResult<usize> {
        let size = buf.len() as u64;
        let context = context_to_wire(ctx);
        let resp = self.call("readlink", path, move |c| c.readlink(path, size, context))?;
        Ok(copy_truncated(resp.require_link_path()?.as_bytes(), buf))
    }

    fn mknod(&self, ctx: &CallContext, path: &str, mode: u32, rdev: u64) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("mknod", path, move |c| c.mknod(path, mode, rdev, context))?;
        Ok(())
    }

    fn mkdir(&self, ctx: &CallContext, path: &str, mode: u32) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("mkdir", path, move |c| c.mkdir(path, mode, context))?;
        Ok(())
    }

    fn unlink(&self, ctx: &CallContext, path: &str) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("unlink", path, move |c| c.unlink(path, context))?;
        Ok(())
    }

    fn rmdir(&self, ctx: &CallContext, path: &str) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("rmdir", path, move |c| c.rmdir(path, context))?;
        Ok(())
    }

    fn symlink(&self, ctx: &CallContext, target: &str, link_path: &str) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("symlink", link_path, move |c| c.symlink(target, link_path, context))?;
        Ok(())
    }

    fn rename(&self, ctx: &CallContext, from: &str, to: &str, flags: u32) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("rename", from, move |c| c.rename(from, to, flags, context))?;
        Ok(())
    }

    fn link(&self, ctx: &CallContext, from: &str, to: &str) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("link", from, move |c| c.link(from, to, context))?;
        Ok(())
    }

    fn chmod(
        &self,
        ctx: &CallContext,
        path: &str,
        mode: u32,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        let info = handle_to_wire(fi);
        let context = context_to_wire(ctx);
        self.call("chmod", path, move |c| c.chmod(path, mode, info, context))?;
        Ok(())
    }

    fn chown(
        &self,
        ctx: &CallContext,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        let info = handle_to_wire(fi);
        let context = context_to_wire(ctx);
        self.call("chown", path, move |c| c.chown(path, uid, gid, info, context))?;
        Ok(())
    }

    fn truncate(
        &self,
        ctx: &CallContext,
        path: &str,
        size: i64,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        let info = handle_to_wire(fi);
        let context = context_to_wire(ctx);
        self.call("truncate", path, move |c| c.truncate(path, size, info, context))?;
        Ok(())
    }

    fn open(&self, ctx: &CallContext, path: &str, fi: &mut FileInfo) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        let resp = self.call("open", path, move |c| c.open_file(path, info, context))?;
        if let Some(info) = &resp.info {
            apply_handle(info, fi);
        }
        Ok(())
    }

    fn read(
        &self,
        ctx: &CallContext,
        path: &str,
        buf: &mut [u8],
        offset: i64,
        fi: &FileInfo,
    ) -> FuseResult<usize> {
        let size = buf.len() as u64;
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        let resp = self.call("read", path, move |c| c.read(path, size, offset, info, context))?;
        Ok(copy_truncated(resp.require_data()?, buf))
    }

    fn write(
        &self,
        ctx: &CallContext,
        path: &str,
        data: &[u8],
        offset: i64,
        fi: &FileInfo,
    ) -> FuseResult<usize> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        let resp = self.call("write", path, move |c| c.write(path, offset, data, info, context))?;
        let written = resp.require_data_written()?;
        let written = usize::try_from(written).map_err(|_| {
            RpcError::Protocol(format!("write reported {written} bytes written"))
        })?;
        Ok(written.min(data.len()))
    }

    fn statfs(&self, ctx: &CallContext, path: &str, stat: &mut StatVfs) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        let resp = self.call("statfs", path, move |c| c.statfs(path, context))?;
        apply_statfs(resp.require_statfs()?, stat);
        Ok(())
    }

    fn flush(&self, ctx: &CallContext, path: &str, fi: &FileInfo) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        self.call("flush", path, move |c| c.flush(path, info, context))?;
        Ok(())
    }

    fn release(&self, ctx: &CallContext, path: &str, fi: &FileInfo) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        self.call("release", path, move |c| c.release(path, info, context))?;
        Ok(())
    }

    fn fsync(&self, ctx: &CallContext, path: &str, datasync: bool, fi: &FileInfo) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        self.call("fsync", path, move |c| c.fsync(path, datasync, info, context))?;
        Ok(())
    }

    fn setxattr(
        &self,
        ctx: &CallContext,
        path: &str,
        name: &str,
        value: &[u8],
        flags: i32,
    ) -> FuseResult<()> {
        let context = context_to_wire(ctx);
        self.call("setxattr", path, move |c| {
            c.setxattr(path, name, value, flags, context)
        })?;
        Ok(())
    }

    fn getxattr(
        &self,
        ctx: &CallContext,
        path: &str,
        name: &str,
        buf: &mut [u8],
    ) -> FuseResult<usize> {
        let context = context_to_wire(ctx);
        let resp = self.call("getxattr", path, move |c| c.getxattr(path, name, context))?;
        let value = resp.require_attribute_value()?;
        if buf.is_empty() {
            return Ok(value.len());
        }
        if value.len() > buf.len() {
            return Err(FuseError::InsufficientBuffer {
                needed: value.len(),
                capacity: buf.len(),
            });
        }
        buf[..value.len()].copy_from_slice(value);
        Ok(value.len())
    }

    fn listxattr(&self, _ctx: &CallContext, _path: &str, _buf: &mut [u8]) -> FuseResult<usize> {
        Err(FuseError::NotImplemented)
    }

    fn removexattr(&self, _ctx: &CallContext, _path: &str, _name: &str) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn opendir(&self, ctx: &CallContext, path: &str, fi: &mut FileInfo) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        let resp = self.call("opendir", path, move |c| c.opendir(path, info, context))?;
        if let Some(info) = &resp.info {
            apply_handle(info, fi);
        }
        Ok(())
    }

    fn readdir(
        &self,
        ctx: &CallContext,
        path: &str,
        offset: i64,
        fi: &FileInfo,
        filler: &mut DirFiller<'_>,
    ) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        let resp = self.call("readdir", path, move |c| c.readdir(path, offset, info, context))?;
        for entry in resp.require_dir_entries()? {
            let (name, stat) = dir_entry_from_wire(entry);
            if filler(name, &stat) {
                trace!(path, name, "Directory buffer full");
                break;
            }
        }
        Ok(())
    }

    fn releasedir(&self, ctx: &CallContext, path: &str, fi: &FileInfo) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        self.call("releasedir", path, move |c| c.releasedir(path, info, context))?;
        Ok(())
    }

    fn fsyncdir(
        &self,
        ctx: &CallContext,
        path: &str,
        datasync: bool,
        fi: &FileInfo,
    ) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        self.call("fsyncdir", path, move |c| c.fsyncdir(path, datasync, info, context))?;
        Ok(())
    }

    fn access(&self, ctx: &CallContext, path: &str, mask: i32) -> FuseResult<()> {
        let mask = FuseAccessMode(mask as u32);
        let context = context_to_wire(ctx);
        self.call("access", path, move |c| c.access(path, mask, context))?;
        Ok(())
    }

    fn create(
        &self,
        ctx: &CallContext,
        path: &str,
        mode: u32,
        fi: &mut FileInfo,
    ) -> FuseResult<()> {
        let info = handle_to_wire(Some(fi));
        let context = context_to_wire(ctx);
        let resp = self.call("create", path, move |c| c.create(path, mode, info, context))?;
        if let Some(info) = &resp.info {
            apply_handle(info, fi);
        }
        Ok(())
    }

    fn lock(
        &self,
        _ctx: &CallContext,
        _path: &str,
        _fi: &FileInfo,
        _cmd: i32,
        _lock: &mut FileLock,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }

    fn utimens(
        &self,
        ctx: &CallContext,
        path: &str,
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
        fi: Option<&FileInfo>,
    ) -> FuseResult<()> {
        let times = utimens_to_wire(atime, mtime);
        let info = handle_to_wire(fi);
        let context = context_to_wire(ctx);
        self.call("utimens", path, move |c| c.utimens(path, times, info, context))?;
        Ok(())
    }

    fn bmap(
        &self,
        _ctx: &CallContext,
        _path: &str,
        _blocksize: u64,
        _idx: &mut u64,
    ) -> FuseResult<()> {
        Err(FuseError::NotImplemented)
    }
}
