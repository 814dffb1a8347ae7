//! Byte-stream substrates.

use crate::channel::{ChannelConfig, Substrate, split_host_port};
use crate::error::ChannelError;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// A connected substrate split into its read and write halves.
pub(crate) struct Link {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    /// Keeps a `PIPE` server process alive for as long as the link exists.
    pub child: Option<ChildGuard>,
}

impl Link {
    pub fn connect(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let connect_err = |source: io::Error| ChannelError::Connect {
            target: config.target.clone(),
            source,
        };

        match config.substrate {
            Substrate::TcpIp => {
                let (host, port) = split_host_port(&config.target)?;
                let stream = connect_tcp(host, port, config.io_timeout).map_err(connect_err)?;
                stream.set_nodelay(true).map_err(connect_err)?;
                stream.set_read_timeout(config.io_timeout).map_err(connect_err)?;
                stream.set_write_timeout(config.io_timeout).map_err(connect_err)?;
                let reader = stream.try_clone().map_err(connect_err)?;
                Ok(Self {
                    reader: Box::new(reader),
                    writer: Box::new(stream),
                    child: None,
                })
            }
            Substrate::UnixSocket => {
                let stream = UnixStream::connect(&config.target).map_err(connect_err)?;
                stream.set_read_timeout(config.io_timeout).map_err(connect_err)?;
                stream.set_write_timeout(config.io_timeout).map_err(connect_err)?;
                let reader = stream.try_clone().map_err(connect_err)?;
                Ok(Self {
                    reader: Box::new(reader),
                    writer: Box::new(stream),
                    child: None,
                })
            }
            Substrate::Pipe => {
                let mut words = config.target.split_whitespace();
                let program = words.next().ok_or_else(|| {
                    ChannelError::InvalidConfig("PIPE transport needs a command".to_string())
                })?;
                let mut child = Command::new(program)
                    .args(words)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .spawn()
                    .map_err(connect_err)?;
                debug!(pid = child.id(), program, "Spawned pipe server");

                let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(connect_err(io::Error::other("child stdio was not captured")));
                };
                Ok(Self {
                    reader: Box::new(stdout),
                    writer: Box::new(stdin),
                    child: Some(ChildGuard(child)),
                })
            }
            Substrate::SharedMemory => Err(ChannelError::UnsupportedTransport(config.substrate)),
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((host, port));
    };

    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} did not resolve"))
    }))
}

/// Kills and reaps a pipe server process on drop.
pub(crate) struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.0.try_wait() {
            return;
        }
        if let Err(e) = self.0.kill() {
            warn!(pid = self.0.id(), error = %e, "Failed to kill pipe server");
        }
        let _ = self.0.wait();
    }
}
