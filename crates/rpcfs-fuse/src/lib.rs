//! FUSE filesystem backed by a remote file service.
//!
//! Every kernel request is turned into one or more calls on a pooled
//! [`FileService`](rpcfs_core::FileService) client. The crate is layered:
//!
//! - [`native`] - host-side structures (`stat`, `statvfs`, open-file info)
//! - [`translate`] - conversions between native and sparse wire structures
//! - [`operations`] - the path-based [`FileOperations`] table
//! - [`dispatcher`] - [`RemoteFs`], which implements that table over a
//!   [`ConnectionPool`](rpcfs_mount::ConnectionPool)
//! - [`filesystem`] - [`RpcFs`], the fuser adapter mapping inodes and handles
//!   to paths
//! - [`backend`] - mounting and unmounting
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use rpcfs_core::{ChannelBuilder, ChannelConfig, FileService, Substrate};
//! use rpcfs_fuse::{MountConfig, RemoteFs, mount};
//! use rpcfs_mount::ConnectionPool;
//!
//! # fn main() -> anyhow::Result<()> {
//! let builder = ChannelBuilder::new(ChannelConfig::new(Substrate::TcpIp, "127.0.0.1:9090"));
//! let pool = Arc::new(ConnectionPool::new(4));
//! for id in 0..4 {
//!     let mut client = builder.build(id)?;
//!     client.open()?;
//!     pool.release(client);
//! }
//!
//! let handle = mount(RemoteFs::new(pool), Path::new("/mnt/remote"), &MountConfig::default())?;
//! // ...
//! handle.unmount();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;
pub mod native;
pub mod operations;
pub mod translate;
pub mod workers;

pub use backend::{FuseMountHandle, mount, mount_options};
pub use config::MountConfig;
pub use dispatcher::RemoteFs;
pub use error::{FuseError, FuseResult, ToErrno};
pub use filesystem::{RpcFs, SetAttr, file_type, to_file_attr};
pub use handles::HandleTable;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
pub use native::{
    CallContext, ConnectionInfo, FileInfo, FileLock, FileStat, MountOptions, StatVfs, Timespec,
};
pub use operations::{DirFiller, FileOperations};
pub use workers::WorkerPool;
