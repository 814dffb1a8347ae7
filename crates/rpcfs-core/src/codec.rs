//! Message encodings.
//!
//! Every encoding produces a self-delimiting byte sequence, so one message can
//! be read back from a buffered stream without an outer length prefix:
//!
//! - `BINARY`: bincode with fixed-width integers; the type drives the length
//! - `COMPACT`: postcard varints, COBS-encoded and terminated by a zero byte
//! - `JSON`: one compact serde_json document per line

use crate::channel::Encoding;
use crate::error::{ChannelError, RpcError};
use crate::framing::MAX_FRAME_LEN;
use bincode::Options;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, Read};

impl Encoding {
    /// Serializes one message.
    pub fn encode<T: Serialize>(self, message: &T) -> Result<Vec<u8>, RpcError> {
        match self {
            Encoding::Binary => {
                bincode::serialize(message).map_err(|e| RpcError::encode(self, e))
            }
            Encoding::Compact => {
                postcard::to_stdvec_cobs(message).map_err(|e| RpcError::encode(self, e))
            }
            Encoding::Json => {
                let mut buf = serde_json::to_vec(message).map_err(|e| RpcError::encode(self, e))?;
                buf.push(b'\n');
                Ok(buf)
            }
            Encoding::Multiplexed => Err(ChannelError::UnsupportedEncoding(self).into()),
        }
    }

    /// Reads exactly one message from `reader`.
    ///
    /// A message longer than [`MAX_FRAME_LEN`] is rejected without being
    /// buffered.
    pub fn decode_from<T: DeserializeOwned>(self, reader: &mut dyn BufRead) -> Result<T, RpcError> {
        self.decode_limited(reader, MAX_FRAME_LEN)
    }

    fn decode_limited<T: DeserializeOwned>(
        self,
        reader: &mut dyn BufRead,
        limit: usize,
    ) -> Result<T, RpcError> {
        let mut bounded = Read::take(&mut *reader, limit as u64);
        match self {
            Encoding::Binary => bincode::DefaultOptions::new()
                .with_fixint_encoding()
                .allow_trailing_bytes()
                .with_limit(limit as u64)
                .deserialize_from(bounded)
                .map_err(|e| match *e {
                    bincode::ErrorKind::Io(io) => RpcError::Io(io),
                    other => RpcError::decode(self, Box::new(other)),
                }),
            Encoding::Compact => {
                let mut buf = Vec::new();
                bounded.read_until(0, &mut buf)?;
                if buf.last() != Some(&0) {
                    return Err(unterminated(self, &buf, limit));
                }
                postcard::from_bytes_cobs(&mut buf).map_err(|e| RpcError::decode(self, e))
            }
            Encoding::Json => {
                let mut line = String::new();
                bounded.read_line(&mut line)?;
                if !line.ends_with('\n') {
                    return Err(unterminated(self, line.as_bytes(), limit));
                }
                serde_json::from_str(line.trim_end()).map_err(|e| RpcError::decode(self, e))
            }
            Encoding::Multiplexed => Err(ChannelError::UnsupportedEncoding(self).into()),
        }
    }

    /// Decodes a message that is already fully in memory.
    pub fn decode<T: DeserializeOwned>(self, mut bytes: &[u8]) -> Result<T, RpcError> {
        self.decode_from(&mut bytes)
    }
}

fn unterminated(encoding: Encoding, partial: &[u8], limit: usize) -> RpcError {
    if partial.len() >= limit {
        return RpcError::Protocol(format!(
            "{encoding} message exceeds {limit} bytes without a terminator"
        ));
    }
    let msg = if partial.is_empty() {
        "connection closed by peer".to_string()
    } else {
        format!("connection closed mid-message after {} bytes", partial.len())
    };
    RpcError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
}
