//! Native structures handed to [`FileOperations`](crate::FileOperations).
//!
//! These mirror the shapes of the libfuse high-level API (`fuse_file_info`,
//! `struct stat`, `struct statvfs`, `fuse_conn_info`, `fuse_config`). Fields
//! are plain values: "absent" only exists on the wire side, and the
//! [`translate`](crate::translate) functions decide which native fields a
//! wire value overwrites.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-open-file state threaded through every call on a handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Open flags (`O_RDONLY`, `O_APPEND`, ...).
    pub flags: i32,
    /// Opaque handle value chosen by the remote service.
    pub fh: u64,
    pub direct_io: bool,
    pub keep_cache: bool,
    /// Set on `flush` when the call is the result of a `close`.
    pub flush: bool,
    pub nonseekable: bool,
    pub lock_owner: u64,
    pub poll_events: u32,
}

impl FileInfo {
    /// Handle info for a fresh open with the given flags.
    pub fn with_flags(flags: i32) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    /// Flags to hand back to the kernel in an open reply.
    pub fn open_flags(&self) -> u32 {
        let mut out = 0;
        if self.direct_io {
            out |= FOPEN_DIRECT_IO;
        }
        if self.keep_cache {
            out |= FOPEN_KEEP_CACHE;
        }
        if self.nonseekable {
            out |= FOPEN_NONSEEKABLE;
        }
        out
    }
}

/// `FOPEN_*` reply flags from the FUSE kernel ABI.
pub const FOPEN_DIRECT_IO: u32 = 1 << 0;
pub const FOPEN_KEEP_CACHE: u32 = 1 << 1;
pub const FOPEN_NONSEEKABLE: u32 = 1 << 2;

/// Identity of the process that issued a filesystem call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub umask: u32,
}

impl CallContext {
    pub fn new(uid: u32, gid: u32, pid: u32) -> Self {
        Self {
            uid,
            gid,
            pid,
            umask: 0,
        }
    }

    #[must_use]
    pub fn with_umask(mut self, umask: u32) -> Self {
        self.umask = umask;
        self
    }
}

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Converts to a `SystemTime`, clamping out-of-range values to the epoch.
    pub fn to_system_time(self) -> SystemTime {
        let nsec = u32::try_from(self.nsec.clamp(0, 999_999_999)).unwrap_or(0);
        if self.sec >= 0 {
            UNIX_EPOCH + Duration::new(self.sec.unsigned_abs(), nsec)
        } else {
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(self.sec.unsigned_abs()))
                .and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nsec))))
                .unwrap_or(UNIX_EPOCH)
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
                nsec: i64::from(d.subsec_nanos()),
            },
            Err(before) => {
                let d = before.duration();
                let mut sec = -i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
                let mut nsec = i64::from(d.subsec_nanos());
                if nsec > 0 {
                    sec -= 1;
                    nsec = 1_000_000_000 - nsec;
                }
                Self { sec, nsec }
            }
        }
    }
}

/// File attributes, `struct stat` shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    /// File type and permission bits (`S_IFMT | 0o7777`).
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl FileStat {
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT as u32
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }
}

/// Filesystem statistics, `struct statvfs` shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatVfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flags: u64,
    pub namemax: u64,
}

/// Kernel connection parameters negotiated at mount time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub proto_major: u32,
    pub proto_minor: u32,
    pub max_write: u32,
    pub max_readahead: u32,
    pub capable: u64,
    pub want: u64,
}

/// Mount-wide behaviour, the counterpart of libfuse's `fuse_config`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountOptions {
    /// Attribute cache lifetime in seconds.
    pub attr_timeout: f64,
    /// Name lookup cache lifetime in seconds.
    pub entry_timeout: f64,
    pub negative_timeout: f64,
    pub use_ino: bool,
    pub readdir_ino: bool,
    pub direct_io: bool,
    pub kernel_cache: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            attr_timeout: 1.0,
            entry_timeout: 1.0,
            negative_timeout: 0.0,
            use_ino: false,
            readdir_ino: false,
            direct_io: false,
            kernel_cache: false,
        }
    }
}

/// A POSIX record lock (`struct flock`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileLock {
    /// `F_RDLCK`, `F_WRLCK` or `F_UNLCK`.
    pub typ: i32,
    pub whence: i32,
    pub start: i64,
    pub len: i64,
    pub pid: u32,
}
