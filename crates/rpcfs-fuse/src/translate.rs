//! Conversions between native structures and wire structures.
//!
//! Every function here is pure. Wire structures are sparse: a field that is
//! `None` on the wire never touches the native destination, so `apply_*`
//! functions update in place instead of returning a fresh value. Handle
//! values are carried as opaque 64-bit tokens and timestamps pass through at
//! second/nanosecond resolution.

use rpcfs_core::{
    FuseConfig, FuseConnectionInfo, FuseContext, FuseDirEntry, FuseHandleInfo, FuseStat,
    FuseStatFs, FuseTimeSpec, FuseUtimens,
};

use crate::native::{
    CallContext, ConnectionInfo, FileInfo, FileStat, MountOptions, StatVfs, Timespec,
};

/// Copies `src` into `dst` if it is present.
#[inline]
fn set<T>(dst: &mut T, src: Option<T>) {
    if let Some(v) = src {
        *dst = v;
    }
}

/// Wire form of a native handle. `None` produces an all-absent structure.
pub fn handle_to_wire(fi: Option<&FileInfo>) -> FuseHandleInfo {
    let Some(fi) = fi else {
        return FuseHandleInfo::default();
    };
    FuseHandleInfo {
        fh: Some(fi.fh),
        direct_io: Some(fi.direct_io),
        keep_cache: Some(fi.keep_cache),
        flush: Some(fi.flush),
        lock_owner: Some(fi.lock_owner),
        non_seekable: Some(fi.nonseekable),
        poll_events: Some(fi.poll_events),
        flags: Some(fi.flags),
    }
}

/// Writes the present fields of `wire` into `fi`.
pub fn apply_handle(wire: &FuseHandleInfo, fi: &mut FileInfo) {
    set(&mut fi.fh, wire.fh);
    set(&mut fi.direct_io, wire.direct_io);
    set(&mut fi.keep_cache, wire.keep_cache);
    set(&mut fi.flush, wire.flush);
    set(&mut fi.lock_owner, wire.lock_owner);
    set(&mut fi.nonseekable, wire.non_seekable);
    set(&mut fi.poll_events, wire.poll_events);
    set(&mut fi.flags, wire.flags);
}

pub fn context_to_wire(ctx: &CallContext) -> FuseContext {
    FuseContext {
        uid: Some(ctx.uid),
        gid: Some(ctx.gid),
        pid: Some(ctx.pid),
        umask: Some(ctx.umask),
    }
}

pub fn apply_context(wire: &FuseContext, ctx: &mut CallContext) {
    set(&mut ctx.uid, wire.uid);
    set(&mut ctx.gid, wire.gid);
    set(&mut ctx.pid, wire.pid);
    set(&mut ctx.umask, wire.umask);
}

/// Native context from a wire context; absent fields are zero.
pub fn context_from_wire(wire: &FuseContext) -> CallContext {
    let mut ctx = CallContext::default();
    apply_context(wire, &mut ctx);
    ctx
}

pub fn timespec_to_wire(ts: Timespec) -> FuseTimeSpec {
    FuseTimeSpec {
        sec: ts.sec,
        nsec: ts.nsec,
    }
}

pub fn timespec_from_wire(ts: FuseTimeSpec) -> Timespec {
    Timespec::new(ts.sec, ts.nsec)
}

pub fn stat_to_wire(st: &FileStat) -> FuseStat {
    FuseStat {
        dev: Some(st.dev),
        ino: Some(st.ino),
        mode: Some(st.mode),
        nlink: Some(st.nlink),
        uid: Some(st.uid),
        gid: Some(st.gid),
        rdev: Some(st.rdev),
        size: Some(st.size),
        blksize: Some(st.blksize),
        blocks: Some(st.blocks),
        access_time: Some(timespec_to_wire(st.atime)),
        modification_time: Some(timespec_to_wire(st.mtime)),
        change_time: Some(timespec_to_wire(st.ctime)),
    }
}

pub fn apply_stat(wire: &FuseStat, st: &mut FileStat) {
    set(&mut st.dev, wire.dev);
    set(&mut st.ino, wire.ino);
    set(&mut st.mode, wire.mode);
    set(&mut st.nlink, wire.nlink);
    set(&mut st.uid, wire.uid);
    set(&mut st.gid, wire.gid);
    set(&mut st.rdev, wire.rdev);
    set(&mut st.size, wire.size);
    set(&mut st.blksize, wire.blksize);
    set(&mut st.blocks, wire.blocks);
    set(&mut st.atime, wire.access_time.map(timespec_from_wire));
    set(&mut st.mtime, wire.modification_time.map(timespec_from_wire));
    set(&mut st.ctime, wire.change_time.map(timespec_from_wire));
}

pub fn statfs_to_wire(sv: &StatVfs) -> FuseStatFs {
    FuseStatFs {
        bsize: Some(sv.bsize),
        frsize: Some(sv.frsize),
        blocks: Some(sv.blocks),
        bfree: Some(sv.bfree),
        bavail: Some(sv.bavail),
        files: Some(sv.files),
        ffree: Some(sv.ffree),
        favail: Some(sv.favail),
        fsid: Some(sv.fsid),
        flags: Some(sv.flags),
        namemax: Some(sv.namemax),
    }
}

pub fn apply_statfs(wire: &FuseStatFs, sv: &mut StatVfs) {
    set(&mut sv.bsize, wire.bsize);
    set(&mut sv.frsize, wire.frsize);
    set(&mut sv.blocks, wire.blocks);
    set(&mut sv.bfree, wire.bfree);
    set(&mut sv.bavail, wire.bavail);
    set(&mut sv.files, wire.files);
    set(&mut sv.ffree, wire.ffree);
    set(&mut sv.favail, wire.favail);
    set(&mut sv.fsid, wire.fsid);
    set(&mut sv.flags, wire.flags);
    set(&mut sv.namemax, wire.namemax);
}

/// `None` leaves that timestamp unchanged on the remote side.
pub fn utimens_to_wire(atime: Option<Timespec>, mtime: Option<Timespec>) -> FuseUtimens {
    FuseUtimens {
        access_time: atime.map(timespec_to_wire),
        modification_time: mtime.map(timespec_to_wire),
    }
}

/// Name and attributes of a listing entry. Attributes absent on the wire
/// are zero.
pub fn dir_entry_from_wire(entry: &FuseDirEntry) -> (&str, FileStat) {
    let mut st = FileStat::default();
    apply_stat(&entry.stats, &mut st);
    (entry.name.as_str(), st)
}

pub fn connection_to_wire(conn: &ConnectionInfo) -> FuseConnectionInfo {
    FuseConnectionInfo {
        proto_major: Some(conn.proto_major),
        proto_minor: Some(conn.proto_minor),
        max_write: Some(conn.max_write),
        max_readahead: Some(conn.max_readahead),
        capable: Some(conn.capable),
        want: Some(conn.want),
    }
}

pub fn config_to_wire(opts: &MountOptions) -> FuseConfig {
    FuseConfig {
        attr_timeout: Some(opts.attr_timeout),
        entry_timeout: Some(opts.entry_timeout),
        negative_timeout: Some(opts.negative_timeout),
        use_ino: Some(opts.use_ino),
        readdir_ino: Some(opts.readdir_ino),
        direct_io: Some(opts.direct_io),
        kernel_cache: Some(opts.kernel_cache),
    }
}
