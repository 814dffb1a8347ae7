//! Wire structures exchanged with the remote file service.
//!
//! Every sparse structure uses one `Option` per field. A field that is `None`
//! was not set by the sender and must not be copied by the receiver, which is
//! what lets a response update only part of a caller-owned native structure.

use serde::{Deserialize, Serialize};

/// Remote status codes.
///
/// This is a closed enumeration: a reply carrying a value outside of it fails
/// to decode and is treated as a protocol error by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    #[default]
    Success,
    Eperm,
    Enoent,
    Eio,
    Ebadf,
    Enomem,
    Eacces,
    Ebusy,
    Eexist,
    Exdev,
    Enotdir,
    Eisdir,
    Einval,
    Efbig,
    Enospc,
    Erofs,
    Emlink,
    Erange,
    Enametoolong,
    Enosys,
    Enotempty,
    Eloop,
    Enodata,
    Enotsup,
    Etimedout,
    Eagain,
    /// Reserved for local translation of transport failures. A remote service
    /// may also send it, in which case it is passed through unchanged.
    Ecanceled,
}

impl StatusCode {
    /// Returns true for [`StatusCode::Success`].
    #[inline]
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

/// Per-open-file handle metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseHandleInfo {
    /// Opaque handle token chosen by the remote service.
    pub fh: Option<u64>,
    pub direct_io: Option<bool>,
    pub keep_cache: Option<bool>,
    pub flush: Option<bool>,
    pub lock_owner: Option<u64>,
    pub non_seekable: Option<bool>,
    pub poll_events: Option<u32>,
    /// `open(2)` flags.
    pub flags: Option<i32>,
}

/// Caller identity for one filesystem call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseContext {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub pid: Option<u32>,
    pub umask: Option<u32>,
}

/// Seconds + nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseTimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

/// POSIX-like file attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseStat {
    pub dev: Option<u64>,
    pub ino: Option<u64>,
    pub mode: Option<u32>,
    pub nlink: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub rdev: Option<u64>,
    pub size: Option<i64>,
    pub blksize: Option<i64>,
    pub blocks: Option<i64>,
    pub access_time: Option<FuseTimeSpec>,
    pub modification_time: Option<FuseTimeSpec>,
    pub change_time: Option<FuseTimeSpec>,
}

/// Aggregate filesystem capacity and usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseStatFs {
    pub bsize: Option<u64>,
    pub frsize: Option<u64>,
    pub blocks: Option<u64>,
    pub bfree: Option<u64>,
    pub bavail: Option<u64>,
    pub files: Option<u64>,
    pub ffree: Option<u64>,
    pub favail: Option<u64>,
    pub fsid: Option<u64>,
    pub flags: Option<u64>,
    pub namemax: Option<u64>,
}

/// One directory listing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseDirEntry {
    pub name: String,
    pub stats: FuseStat,
}

/// Timestamps for `utimens`. `None` leaves the timestamp untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseUtimens {
    pub access_time: Option<FuseTimeSpec>,
    pub modification_time: Option<FuseTimeSpec>,
}

/// Byte-range lock description (`struct flock`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseFlock {
    pub lock_type: i32,
    pub whence: i32,
    pub start: i64,
    pub len: i64,
    pub pid: u32,
}

/// Kernel connection parameters reported at mount time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseConnectionInfo {
    pub proto_major: Option<u32>,
    pub proto_minor: Option<u32>,
    pub max_write: Option<u32>,
    pub max_readahead: Option<u32>,
    pub capable: Option<u64>,
    pub want: Option<u64>,
}

/// Mount-time behaviour knobs (libfuse `fuse_config`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuseConfig {
    pub attr_timeout: Option<f64>,
    pub entry_timeout: Option<f64>,
    pub negative_timeout: Option<f64>,
    pub use_ino: Option<bool>,
    pub readdir_ino: Option<bool>,
    pub direct_io: Option<bool>,
    pub kernel_cache: Option<bool>,
}

/// `access(2)` mask bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuseAccessMode(pub u32);

impl FuseAccessMode {
    pub const EXISTS: Self = Self(0);
    pub const EXECUTE: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const READ: Self = Self(4);

    /// Returns true if every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The single response shape shared by every remote operation.
///
/// `status == Success` implies the payload fields relevant to the operation
/// are present. Callers go through the `require_*` accessors, which turn a
/// missing payload into an error instead of a panic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemResponse {
    pub status: StatusCode,
    pub stats: Option<FuseStat>,
    pub link_path: Option<String>,
    pub info: Option<FuseHandleInfo>,
    pub data: Option<Vec<u8>>,
    pub data_written: Option<i64>,
    pub dir_entry: Option<Vec<FuseDirEntry>>,
    pub attribute_value: Option<Vec<u8>>,
    pub statfs: Option<FuseStatFs>,
}

/// Name of a payload field that a successful response failed to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingField(pub &'static str);

impl FileSystemResponse {
    /// A response carrying only a status.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn require_stats(&self) -> Result<&FuseStat, MissingField> {
        self.stats.as_ref().ok_or(MissingField("stats"))
    }

    pub fn require_link_path(&self) -> Result<&str, MissingField> {
        self.link_path.as_deref().ok_or(MissingField("link_path"))
    }

    pub fn require_data(&self) -> Result<&[u8], MissingField> {
        self.data.as_deref().ok_or(MissingField("data"))
    }

    pub fn require_data_written(&self) -> Result<i64, MissingField> {
        self.data_written.ok_or(MissingField("data_written"))
    }

    pub fn require_dir_entries(&self) -> Result<&[FuseDirEntry], MissingField> {
        self.dir_entry.as_deref().ok_or(MissingField("dir_entry"))
    }

    pub fn require_attribute_value(&self) -> Result<&[u8], MissingField> {
        self.attribute_value
            .as_deref()
            .ok_or(MissingField("attribute_value"))
    }

    pub fn require_statfs(&self) -> Result<&FuseStatFs, MissingField> {
        self.statfs.as_ref().ok_or(MissingField("statfs"))
    }
}

/// One remote method invocation with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    Getattr {
        path: String,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Readlink {
        path: String,
        size: u64,
        context: FuseContext,
    },
    Mknod {
        path: String,
        mode: u32,
        rdev: u64,
        context: FuseContext,
    },
    Mkdir {
        path: String,
        mode: u32,
        context: FuseContext,
    },
    Unlink {
        path: String,
        context: FuseContext,
    },
    Rmdir {
        path: String,
        context: FuseContext,
    },
    Symlink {
        /// What the new link points to.
        target: String,
        /// Where the new link is created.
        link_path: String,
        context: FuseContext,
    },
    Rename {
        from: String,
        to: String,
        flags: u32,
        context: FuseContext,
    },
    Link {
        from: String,
        to: String,
        context: FuseContext,
    },
    Chmod {
        path: String,
        mode: u32,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Chown {
        path: String,
        uid: Option<u32>,
        gid: Option<u32>,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Truncate {
        path: String,
        size: i64,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Open {
        path: String,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Read {
        path: String,
        size: u64,
        offset: i64,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Write {
        path: String,
        offset: i64,
        data: Vec<u8>,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Statfs {
        path: String,
        context: FuseContext,
    },
    Flush {
        path: String,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Release {
        path: String,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Fsync {
        path: String,
        datasync: bool,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Setxattr {
        path: String,
        name: String,
        value: Vec<u8>,
        flags: i32,
        context: FuseContext,
    },
    Getxattr {
        path: String,
        name: String,
        context: FuseContext,
    },
    Listxattr {
        path: String,
        context: FuseContext,
    },
    Removexattr {
        path: String,
        name: String,
        context: FuseContext,
    },
    Opendir {
        path: String,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Readdir {
        path: String,
        offset: i64,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Releasedir {
        path: String,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Fsyncdir {
        path: String,
        datasync: bool,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Init {
        connection: FuseConnectionInfo,
        config: FuseConfig,
    },
    Destroy,
    Access {
        path: String,
        mask: FuseAccessMode,
        context: FuseContext,
    },
    Create {
        path: String,
        mode: u32,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Lock {
        path: String,
        cmd: i32,
        lock: FuseFlock,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Utimens {
        path: String,
        times: FuseUtimens,
        info: FuseHandleInfo,
        context: FuseContext,
    },
    Bmap {
        path: String,
        blocksize: u64,
        index: u64,
    },
    Ping,
}

impl Call {
    /// Remote method name, used for logging and statistics.
    pub fn method(&self) -> &'static str {
        match self {
            Call::Getattr { .. } => "getattr",
            Call::Readlink { .. } => "readlink",
            Call::Mknod { .. } => "mknod",
            Call::Mkdir { .. } => "mkdir",
            Call::Unlink { .. } => "unlink",
            Call::Rmdir { .. } => "rmdir",
            Call::Symlink { .. } => "symlink",
            Call::Rename { .. } => "rename",
            Call::Link { .. } => "link",
            Call::Chmod { .. } => "chmod",
            Call::Chown { .. } => "chown",
            Call::Truncate { .. } => "truncate",
            Call::Open { .. } => "open",
            Call::Read { .. } => "read",
            Call::Write { .. } => "write",
            Call::Statfs { .. } => "statfs",
            Call::Flush { .. } => "flush",
            Call::Release { .. } => "release",
            Call::Fsync { .. } => "fsync",
            Call::Setxattr { .. } => "setxattr",
            Call::Getxattr { .. } => "getxattr",
            Call::Listxattr { .. } => "listxattr",
            Call::Removexattr { .. } => "removexattr",
            Call::Opendir { .. } => "opendir",
            Call::Readdir { .. } => "readdir",
            Call::Releasedir { .. } => "releasedir",
            Call::Fsyncdir { .. } => "fsyncdir",
            Call::Init { .. } => "init",
            Call::Destroy => "destroy",
            Call::Access { .. } => "access",
            Call::Create { .. } => "create",
            Call::Lock { .. } => "lock",
            Call::Utimens { .. } => "utimens",
            Call::Bmap { .. } => "bmap",
            Call::Ping => "ping",
        }
    }
}

/// Request envelope. `seq` is echoed back in the matching [`RpcReply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub seq: u32,
    pub call: Call,
}

/// Reply envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub seq: u32,
    pub response: FileSystemResponse,
}
