//! Error types for channel construction and remote calls.

use crate::channel::{Encoding, Substrate};
use crate::wire::MissingField;
use std::io;
use thiserror::Error;

/// Errors raised while validating or opening a channel.
///
/// These are configuration-time failures and are never retried.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The substrate/framing/encoding combination or the target is malformed.
    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The substrate is recognised but has no implementation.
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(Substrate),

    /// The encoding is recognised but has no implementation.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(Encoding),

    /// The substrate could not be connected.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
}

/// Errors raised while performing a remote call.
///
/// Every variant is a transport or protocol failure. Remote-reported
/// failures arrive as a [`StatusCode`](crate::StatusCode) inside a
/// successful reply and are not represented here.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode {encoding} message: {source}")]
    Encode {
        encoding: Encoding,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to decode {encoding} message: {source}")]
    Decode {
        encoding: Encoding,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The peer sent something that violates the message protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Client is not open")]
    NotOpen,

    /// The HTTP envelope returned a non-2xx status.
    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl RpcError {
    pub(crate) fn encode(
        encoding: Encoding,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        RpcError::Encode {
            encoding,
            source: source.into(),
        }
    }

    pub(crate) fn decode(
        encoding: Encoding,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        RpcError::Decode {
            encoding,
            source: source.into(),
        }
    }

    /// Returns true if the underlying I/O operation timed out.
    pub fn is_timeout(&self) -> bool {
        match self {
            RpcError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<MissingField> for RpcError {
    fn from(field: MissingField) -> Self {
        RpcError::Protocol(format!(
            "successful response is missing its {} payload",
            field.0
        ))
    }
}
