//! RPC layer of the rpcfs remote filesystem bridge.
//!
//! This crate knows nothing about FUSE. It provides:
//!
//! - the wire structures exchanged with a remote file service ([`wire`])
//! - a configurable channel stack: substrate, framing and encoding
//!   ([`ChannelConfig`], [`ChannelBuilder`])
//! - the blocking [`FileService`] stub with one method per filesystem
//!   operation and its concrete [`FileServiceClient`]
//!
//! # Usage
//!
//! ```no_run
//! use rpcfs_core::{ChannelBuilder, ChannelConfig, FileService, Substrate};
//!
//! let config = ChannelConfig::new(Substrate::TcpIp, "127.0.0.1:9090");
//! let mut client = ChannelBuilder::new(config).build(0)?;
//! client.open()?;
//! client.ping()?;
//! # Ok::<(), rpcfs_core::RpcError>(())
//! ```

pub mod channel;
pub mod codec;
pub mod error;
pub mod framing;
pub mod service;
pub(crate) mod transport;
pub mod wire;

pub use channel::{ChannelBuilder, ChannelConfig, Encoding, Framing, Substrate};
pub use error::{ChannelError, RpcError};
pub use service::{FileService, FileServiceClient, RpcResult};
pub use wire::{
    Call, FileSystemResponse, FuseAccessMode, FuseConfig, FuseConnectionInfo, FuseContext,
    FuseDirEntry, FuseFlock, FuseHandleInfo, FuseStat, FuseStatFs, FuseTimeSpec, FuseUtimens,
    MissingField, RpcReply, RpcRequest, StatusCode,
};
