//! Error handling and mapping for the FUSE filesystem.
//!
//! Every failure is turned into a positive libc errno before it reaches the
//! kernel. Remote statuses pass through one to one; anything that went wrong
//! inside the channel is reported as `ECANCELED`.

use rpcfs_core::{MissingField, RpcError, StatusCode};
use rpcfs_mount::PoolError;
use std::io;
use thiserror::Error;

/// Errors returned by [`FileOperations`](crate::FileOperations) methods.
#[derive(Debug, Error)]
pub enum FuseError {
    /// The file service answered with a failure status.
    #[error("remote status {0:?}")]
    Remote(StatusCode),

    /// The call failed in transport or protocol handling.
    #[error("call canceled: {0}")]
    Canceled(#[from] RpcError),

    /// No pooled connection could be obtained.
    #[error("no connection available: {0}")]
    Unavailable(#[from] PoolError),

    /// A value did not fit in the caller's buffer.
    #[error("value of {needed} bytes does not fit in a {capacity} byte buffer")]
    InsufficientBuffer { needed: usize, capacity: usize },

    /// The operation has no remote counterpart.
    #[error("operation not implemented")]
    NotImplemented,

    /// A name from the kernel was not valid UTF-8.
    #[error("invalid file name")]
    InvalidName,

    /// Invalid inode.
    #[error("invalid inode: {0}")]
    InvalidInode(u64),

    /// Invalid file handle.
    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Remote(status) => status.to_errno(),
            FuseError::Canceled(_) => libc::ECANCELED,
            FuseError::Unavailable(PoolError::Closed) => libc::ENOTCONN,
            FuseError::Unavailable(PoolError::Empty | PoolError::TimedOut) => libc::EAGAIN,
            FuseError::InsufficientBuffer { .. } => libc::ERANGE,
            FuseError::NotImplemented => libc::ENOSYS,
            FuseError::InvalidName => libc::EINVAL,
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::InvalidHandle(_) => libc::EBADF,
        }
    }
}

impl From<MissingField> for FuseError {
    fn from(e: MissingField) -> Self {
        FuseError::Canceled(e.into())
    }
}

/// Result type for FUSE operations.
pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this value to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for FuseError {
    fn to_errno(&self) -> i32 {
        FuseError::to_errno(self)
    }
}

impl ToErrno for StatusCode {
    /// `Success` maps to 0.
    fn to_errno(&self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Eperm => libc::EPERM,
            StatusCode::Enoent => libc::ENOENT,
            StatusCode::Eio => libc::EIO,
            StatusCode::Ebadf => libc::EBADF,
            StatusCode::Enomem => libc::ENOMEM,
            StatusCode::Eacces => libc::EACCES,
            StatusCode::Ebusy => libc::EBUSY,
            StatusCode::Eexist => libc::EEXIST,
            StatusCode::Exdev => libc::EXDEV,
            StatusCode::Enotdir => libc::ENOTDIR,
            StatusCode::Eisdir => libc::EISDIR,
            StatusCode::Einval => libc::EINVAL,
            StatusCode::Efbig => libc::EFBIG,
            StatusCode::Enospc => libc::ENOSPC,
            StatusCode::Erofs => libc::EROFS,
            StatusCode::Emlink => libc::EMLINK,
            StatusCode::Erange => libc::ERANGE,
            StatusCode::Enametoolong => libc::ENAMETOOLONG,
            StatusCode::Enosys => libc::ENOSYS,
            StatusCode::Enotempty => libc::ENOTEMPTY,
            StatusCode::Eloop => libc::ELOOP,
            #[cfg(target_os = "linux")]
            StatusCode::Enodata => libc::ENODATA,
            #[cfg(not(target_os = "linux"))]
            StatusCode::Enodata => libc::ENOATTR,
            StatusCode::Enotsup => libc::ENOTSUP,
            StatusCode::Etimedout => libc::ETIMEDOUT,
            StatusCode::Eagain => libc::EAGAIN,
            StatusCode::Ecanceled => libc::ECANCELED,
        }
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        self.raw_os_error().unwrap_or(libc::EIO)
    }
}
