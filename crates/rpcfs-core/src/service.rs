//! The remote file service stub.

use crate::channel::{ChannelConfig, Framing, Substrate};
use crate::error::RpcError;
use crate::framing::{self, MessageTransport};
use crate::transport::{ChildGuard, Link};
use crate::wire::{
    Call, FileSystemResponse, FuseAccessMode, FuseConfig, FuseConnectionInfo, FuseContext,
    FuseFlock, FuseHandleInfo, FuseUtimens, RpcReply, RpcRequest,
};
use std::fmt;
use std::time::Instant;
use tracing::{debug, trace};

/// Result of one remote call.
pub type RpcResult = Result<FileSystemResponse, RpcError>;

/// One blocking method per remote filesystem operation.
///
/// Implementors only provide the connection lifecycle and [`invoke`]; the
/// per-operation methods package their arguments into a [`Call`].
///
/// [`invoke`]: FileService::invoke
pub trait FileService: Send {
    /// Stable identifier distinguishing this client from its pool siblings.
    fn id(&self) -> usize;

    /// Connects the underlying channel. A no-op if already open.
    fn open(&mut self) -> Result<(), RpcError>;

    /// Drops the underlying channel.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Sends one call and waits for its reply.
    fn invoke(&mut self, call: Call) -> RpcResult;

    /// Round-trips an empty call to check the service is reachable.
    fn ping(&mut self) -> Result<(), RpcError> {
        let resp = self.invoke(Call::Ping)?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(RpcError::Protocol(format!(
                "ping answered with {:?}",
                resp.status
            )))
        }
    }

    fn getattr(&mut self, path: &str, info: FuseHandleInfo, context: FuseContext) -> RpcResult {
        self.invoke(Call::Getattr {
            path: path.to_owned(),
            info,
            context,
        })
    }

    fn readlink(&mut self, path: &str, size: u64, context: FuseContext) -> RpcResult {
        self.invoke(Call::Readlink {
            path: path.to_owned(),
            size,
            context,
        })
    }

    fn mknod(&mut self, path: &str, mode: u32, rdev: u64, context: FuseContext) -> RpcResult {
        self.invoke(Call::Mknod {
            path: path.to_owned(),
            mode,
            rdev,
            context,
        })
    }

    fn mkdir(&mut self, path: &str, mode: u32, context: FuseContext) -> RpcResult {
        self.invoke(Call::Mkdir {
            path: path.to_owned(),
            mode,
            context,
        })
    }

    fn unlink(&mut self, path: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Unlink {
            path: path.to_owned(),
            context,
        })
    }

    fn rmdir(&mut self, path: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Rmdir {
            path: path.to_owned(),
            context,
        })
    }

    /// Creates `link_path` pointing at `target`.
    fn symlink(&mut self, target: &str, link_path: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Symlink {
            target: target.to_owned(),
            link_path: link_path.to_owned(),
            context,
        })
    }

    fn rename(&mut self, from: &str, to: &str, flags: u32, context: FuseContext) -> RpcResult {
        self.invoke(Call::Rename {
            from: from.to_owned(),
            to: to.to_owned(),
            flags,
            context,
        })
    }

    fn link(&mut self, from: &str, to: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Link {
            from: from.to_owned(),
            to: to.to_owned(),
            context,
        })
    }

    fn chmod(
        &mut self,
        path: &str,
        mode: u32,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Chmod {
            path: path.to_owned(),
            mode,
            info,
            context,
        })
    }

    fn chown(
        &mut self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Chown {
            path: path.to_owned(),
            uid,
            gid,
            info,
            context,
        })
    }

    fn truncate(
        &mut self,
        path: &str,
        size: i64,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Truncate {
            path: path.to_owned(),
            size,
            info,
            context,
        })
    }

    fn open_file(&mut self, path: &str, info: FuseHandleInfo, context: FuseContext) -> RpcResult {
        self.invoke(Call::Open {
            path: path.to_owned(),
            info,
            context,
        })
    }

    fn read(
        &mut self,
        path: &str,
        size: u64,
        offset: i64,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Read {
            path: path.to_owned(),
            size,
            offset,
            info,
            context,
        })
    }

    fn write(
        &mut self,
        path: &str,
        offset: i64,
        data: &[u8],
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Write {
            path: path.to_owned(),
            offset,
            data: data.to_vec(),
            info,
            context,
        })
    }

    fn statfs(&mut self, path: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Statfs {
            path: path.to_owned(),
            context,
        })
    }

    fn flush(&mut self, path: &str, info: FuseHandleInfo, context: FuseContext) -> RpcResult {
        self.invoke(Call::Flush {
            path: path.to_owned(),
            info,
            context,
        })
    }

    fn release(&mut self, path: &str, info: FuseHandleInfo, context: FuseContext) -> RpcResult {
        self.invoke(Call::Release {
            path: path.to_owned(),
            info,
            context,
        })
    }

    fn fsync(
        &mut self,
        path: &str,
        datasync: bool,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Fsync {
            path: path.to_owned(),
            datasync,
            info,
            context,
        })
    }

    fn setxattr(
        &mut self,
        path: &str,
        name: &str,
        value: &[u8],
        flags: i32,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Setxattr {
            path: path.to_owned(),
            name: name.to_owned(),
            value: value.to_vec(),
            flags,
            context,
        })
    }

    fn getxattr(&mut self, path: &str, name: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Getxattr {
            path: path.to_owned(),
            name: name.to_owned(),
            context,
        })
    }

    fn listxattr(&mut self, path: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Listxattr {
            path: path.to_owned(),
            context,
        })
    }

    fn removexattr(&mut self, path: &str, name: &str, context: FuseContext) -> RpcResult {
        self.invoke(Call::Removexattr {
            path: path.to_owned(),
            name: name.to_owned(),
            context,
        })
    }

    fn opendir(&mut self, path: &str, info: FuseHandleInfo, context: FuseContext) -> RpcResult {
        self.invoke(Call::Opendir {
            path: path.to_owned(),
            info,
            context,
        })
    }

    fn readdir(
        &mut self,
        path: &str,
        offset: i64,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Readdir {
            path: path.to_owned(),
            offset,
            info,
            context,
        })
    }

    fn releasedir(&mut self, path: &str, info: FuseHandleInfo, context: FuseContext) -> RpcResult {
        self.invoke(Call::Releasedir {
            path: path.to_owned(),
            info,
            context,
        })
    }

    fn fsyncdir(
        &mut self,
        path: &str,
        datasync: bool,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Fsyncdir {
            path: path.to_owned(),
            datasync,
            info,
            context,
        })
    }

    fn init(&mut self, connection: FuseConnectionInfo, config: FuseConfig) -> RpcResult {
        self.invoke(Call::Init { connection, config })
    }

    fn destroy(&mut self) -> RpcResult {
        self.invoke(Call::Destroy)
    }

    fn access(&mut self, path: &str, mask: FuseAccessMode, context: FuseContext) -> RpcResult {
        self.invoke(Call::Access {
            path: path.to_owned(),
            mask,
            context,
        })
    }

    fn create(
        &mut self,
        path: &str,
        mode: u32,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Create {
            path: path.to_owned(),
            mode,
            info,
            context,
        })
    }

    fn lock(
        &mut self,
        path: &str,
        cmd: i32,
        lock: FuseFlock,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Lock {
            path: path.to_owned(),
            cmd,
            lock,
            info,
            context,
        })
    }

    fn utimens(
        &mut self,
        path: &str,
        times: FuseUtimens,
        info: FuseHandleInfo,
        context: FuseContext,
    ) -> RpcResult {
        self.invoke(Call::Utimens {
            path: path.to_owned(),
            times,
            info,
            context,
        })
    }

    fn bmap(&mut self, path: &str, blocksize: u64, index: u64) -> RpcResult {
        self.invoke(Call::Bmap {
            path: path.to_owned(),
            blocksize,
            index,
        })
    }
}

struct Session {
    transport: Box<dyn MessageTransport>,
    // Dropped after the transport so a pipe server sees EOF before the kill.
    _child: Option<ChildGuard>,
}

/// [`FileService`] over a channel built by [`ChannelBuilder`](crate::ChannelBuilder).
pub struct FileServiceClient {
    id: usize,
    config: ChannelConfig,
    session: Option<Session>,
    next_seq: u32,
}

impl FileServiceClient {
    pub(crate) fn new(id: usize, config: ChannelConfig) -> Self {
        Self {
            id,
            config,
            session: None,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

impl fmt::Debug for FileServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileServiceClient")
            .field("id", &self.id)
            .field("substrate", &self.config.substrate)
            .field("framing", &self.config.framing)
            .field("encoding", &self.config.encoding)
            .field("target", &self.config.target)
            .field("open", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl FileService for FileServiceClient {
    fn id(&self) -> usize {
        self.id
    }

    fn open(&mut self) -> Result<(), RpcError> {
        if self.session.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let session = match (self.config.substrate, self.config.framing) {
            // The agent dials on the first call and keeps the connection alive.
            (Substrate::TcpIp, Framing::Http) => Session {
                transport: framing::http_agent(&self.config),
                _child: None,
            },
            _ => {
                let Link {
                    reader,
                    writer,
                    child,
                } = Link::connect(&self.config)?;
                Session {
                    transport: framing::wrap(&self.config, reader, writer),
                    _child: child,
                }
            }
        };
        self.session = Some(session);
        debug!(
            client = self.id,
            substrate = %self.config.substrate,
            framing = %self.config.framing,
            encoding = %self.config.encoding,
            target = %self.config.target,
            "Opened RPC channel"
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            debug!(client = self.id, "Closed RPC channel");
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn invoke(&mut self, call: Call) -> RpcResult {
        let encoding = self.config.encoding;
        let session = self.session.as_mut().ok_or(RpcError::NotOpen)?;

        self.next_seq = self.next_seq.wrapping_add(1);
        let seq = self.next_seq;
        let method = call.method();
        let start = Instant::now();

        let request = encoding.encode(&RpcRequest { seq, call })?;
        session.transport.send(&request)?;
        let reply: RpcReply = {
            let mut message = session.transport.next_message()?;
            encoding.decode_from(&mut *message)?
        };

        if reply.seq != seq {
            return Err(RpcError::Protocol(format!(
                "{method}: reply sequence {} does not match request {seq}",
                reply.seq
            )));
        }

        trace!(
            client = self.id,
            method,
            status = ?reply.response.status,
            elapsed_us = start.elapsed().as_micros() as u64,
            "RPC call complete"
        );
        Ok(reply.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Substrate;
    use crate::wire::StatusCode;

    /// Records calls and answers each with a fixed status.
    struct Recorder {
        calls: Vec<Call>,
        status: StatusCode,
    }

    impl FileService for Recorder {
        fn id(&self) -> usize {
            0
        }
        fn open(&mut self) -> Result<(), RpcError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn is_open(&self) -> bool {
            true
        }
        fn invoke(&mut self, call: Call) -> RpcResult {
            self.calls.push(call);
            Ok(FileSystemResponse::status(self.status))
        }
    }

    #[test]
    fn test_provided_methods_package_arguments() {
        let mut svc = Recorder {
            calls: Vec::new(),
            status: StatusCode::Success,
        };
        svc.symlink("/target", "/link", FuseContext::default()).unwrap();
        svc.rename("/a", "/b", 0, FuseContext::default()).unwrap();
        svc.write("/f", 10, b"xyz", FuseHandleInfo::default(), FuseContext::default())
            .unwrap();

        assert_eq!(
            svc.calls[0],
            Call::Symlink {
                target: "/target".to_string(),
                link_path: "/link".to_string(),
                context: FuseContext::default(),
            }
        );
        assert!(matches!(
            &svc.calls[1],
            Call::Rename { from, to, .. } if from == "/a" && to == "/b"
        ));
        assert!(matches!(
            &svc.calls[2],
            Call::Write { offset: 10, data, .. } if data == b"xyz"
        ));
    }

    #[test]
    fn test_ping_requires_success() {
        let mut svc = Recorder {
            calls: Vec::new(),
            status: StatusCode::Eio,
        };
        assert!(matches!(svc.ping(), Err(RpcError::Protocol(_))));
        svc.status = StatusCode::Success;
        assert!(svc.ping().is_ok());
    }

    #[test]
    fn test_invoke_on_closed_client() {
        let mut client =
            FileServiceClient::new(1, ChannelConfig::new(Substrate::TcpIp, "127.0.0.1:1"));
        assert!(matches!(client.ping(), Err(RpcError::NotOpen)));
    }

    #[test]
    fn test_debug_omits_transport() {
        let client = FileServiceClient::new(4, ChannelConfig::new(Substrate::TcpIp, "h:1"));
        let dbg = format!("{client:?}");
        assert!(dbg.contains("id: 4"));
        assert!(dbg.contains("open: false"));
    }
}
