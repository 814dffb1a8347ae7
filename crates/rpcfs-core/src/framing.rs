//! Message framings layered over a connected substrate.
//!
//! A framing turns encoded messages into bytes on the substrate and hands the
//! next incoming message back as a buffered reader the encoding decodes from.

use crate::channel::{ChannelConfig, Encoding, Framing};
use crate::error::RpcError;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};

/// Largest message accepted by the length-prefixed framings.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Largest HTTP header block accepted from the peer.
const MAX_HEADER_LINES: usize = 100;

const MAX_LINE_LEN: u64 = 8 * 1024;

type Reader = BufReader<Box<dyn Read + Send>>;
type Writer = BufWriter<Box<dyn Write + Send>>;

/// Message-level transport over a connected substrate.
pub(crate) trait MessageTransport: Send {
    /// Writes one encoded message and flushes it to the substrate.
    fn send(&mut self, message: &[u8]) -> Result<(), RpcError>;

    /// Blocks until the next message is available and returns a reader
    /// positioned at its first byte.
    fn next_message(&mut self) -> Result<Box<dyn BufRead + '_>, RpcError>;
}

/// HTTP transport that opens its own TCP connections.
pub(crate) fn http_agent(config: &ChannelConfig) -> Box<dyn MessageTransport> {
    Box::new(HttpAgent::new(config))
}

/// Stacks the configured framing on top of a substrate's read and write
/// halves.
pub(crate) fn wrap(
    config: &ChannelConfig,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
) -> Box<dyn MessageTransport> {
    match config.framing {
        Framing::Buffered => Box::new(Buffered {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }),
        Framing::Framed => Box::new(LengthPrefixed {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }),
        Framing::Http => Box::new(HttpEnvelope {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            host: config.target.clone(),
            path: request_path(config),
            content_type: content_type(config.encoding),
        }),
        Framing::Zlib => Box::new(ZlibStream {
            reader: BufReader::new(ZlibDecoder::new(reader)),
            writer: ZlibEncoder::new(writer, Compression::default()),
        }),
    }
}

/// MIME type announced by the HTTP framing.
pub fn content_type(encoding: Encoding) -> &'static str {
    match encoding {
        Encoding::Json => "application/json",
        _ => "application/octet-stream",
    }
}

/// Writes one length-prefixed frame (4-byte big-endian length).
pub fn write_frame(writer: &mut dyn Write, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", payload.len()),
        ));
    }
    let len = u32::try_from(payload.len())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)
}

/// Reads one length-prefixed frame.
pub fn read_frame(reader: &mut dyn Read) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Start line and body delimiting headers of one HTTP/1.1 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    /// Status line of a response or request line of a request.
    pub start_line: String,
    pub content_length: Option<usize>,
    /// `Transfer-Encoding: chunked` was announced.
    pub chunked: bool,
}

/// Reads an HTTP/1.1 header block.
///
/// Shared by the client (which reads a status line) and by servers written
/// against this crate (which read a request line).
pub fn read_http_head(reader: &mut dyn BufRead) -> io::Result<HttpHead> {
    let start_line = read_crlf_line(reader)?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer")
    })?;

    let mut head = HttpHead {
        start_line,
        content_length: None,
        chunked: false,
    };
    for _ in 0..MAX_HEADER_LINES {
        let line = read_crlf_line(reader)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside HTTP headers",
            )
        })?;
        if line.is_empty() {
            return Ok(head);
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("content-length") {
            let length = value.parse::<usize>().map_err(|_| {
                invalid_data(format!("malformed Content-Length '{value}'"))
            })?;
            if length > MAX_FRAME_LEN {
                return Err(invalid_data(format!(
                    "HTTP body of {length} bytes exceeds {MAX_FRAME_LEN}"
                )));
            }
            head.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            head.chunked = value
                .rsplit(',')
                .next()
                .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        }
    }
    Err(invalid_data("too many HTTP header lines"))
}

/// Reads the body that follows `head`, either chunked or `Content-Length`
/// delimited.
pub fn read_http_body(reader: &mut dyn BufRead, head: &HttpHead) -> io::Result<Vec<u8>> {
    if head.chunked {
        return read_chunked(reader);
    }
    let length = head
        .content_length
        .ok_or_else(|| invalid_data("missing Content-Length header"))?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    Ok(body)
}

fn read_chunked(reader: &mut dyn BufRead) -> io::Result<Vec<u8>> {
    let closed = || {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed inside chunked body",
        )
    };
    let mut body = Vec::new();
    loop {
        let line = read_crlf_line(reader)?.ok_or_else(closed)?;
        let size = line.split(';').next().map(str::trim).unwrap_or_default();
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| invalid_data(format!("malformed chunk size '{line}'")))?;

        if size == 0 {
            // Trailer section, ignored.
            for _ in 0..MAX_HEADER_LINES {
                if read_crlf_line(reader)?.ok_or_else(closed)?.is_empty() {
                    return Ok(body);
                }
            }
            return Err(invalid_data("too many HTTP trailer lines"));
        }

        let start = body.len();
        if start + size > MAX_FRAME_LEN {
            return Err(invalid_data(format!(
                "chunked HTTP body exceeds {MAX_FRAME_LEN} bytes"
            )));
        }
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..])?;
        if !read_crlf_line(reader)?.ok_or_else(closed)?.is_empty() {
            return Err(invalid_data("chunk data is not followed by CRLF"));
        }
    }
}

/// Reads one header line without its line terminator. `None` at EOF.
fn read_crlf_line(reader: &mut dyn BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    let read = Read::take(&mut *reader, MAX_LINE_LEN).read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if (read as u64) < MAX_LINE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside an HTTP line",
            ));
        }
        return Err(invalid_data(format!(
            "HTTP line longer than {MAX_LINE_LEN} bytes"
        )));
    }
    line.truncate(line.trim_end_matches(['\r', '\n']).len());
    Ok(Some(line))
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

struct Buffered {
    reader: Reader,
    writer: Writer,
}

impl MessageTransport for Buffered {
    fn send(&mut self, message: &[u8]) -> Result<(), RpcError> {
        self.writer.write_all(message)?;
        self.writer.flush()?;
        Ok(())
    }

    fn next_message(&mut self) -> Result<Box<dyn BufRead + '_>, RpcError> {
        Ok(Box::new(&mut self.reader))
    }
}

struct LengthPrefixed {
    reader: Reader,
    writer: Writer,
}

impl MessageTransport for LengthPrefixed {
    fn send(&mut self, message: &[u8]) -> Result<(), RpcError> {
        write_frame(&mut self.writer, message)?;
        self.writer.flush()?;
        Ok(())
    }

    fn next_message(&mut self) -> Result<Box<dyn BufRead + '_>, RpcError> {
        let frame = read_frame(&mut self.reader)?;
        Ok(Box::new(Cursor::new(frame)))
    }
}

/// HTTP envelope written directly on a connected socket.
///
/// Used where ureq cannot reach the peer (Unix domain sockets).
struct HttpEnvelope {
    reader: Reader,
    writer: Writer,
    host: String,
    path: String,
    content_type: &'static str,
}

impl MessageTransport for HttpEnvelope {
    fn send(&mut self, message: &[u8]) -> Result<(), RpcError> {
        write!(
            self.writer,
            "POST {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Content-Type: {}\r\n\
             Accept: {}\r\n\
             Content-Length: {}\r\n\
             Connection: keep-alive\r\n\r\n",
            self.path,
            self.host,
            self.content_type,
            self.content_type,
            message.len()
        )?;
        self.writer.write_all(message)?;
        self.writer.flush()?;
        Ok(())
    }

    fn next_message(&mut self) -> Result<Box<dyn BufRead + '_>, RpcError> {
        let (status, head) = loop {
            let head = read_http_head(&mut self.reader)?;
            let status = parse_status(&head.start_line)?;
            if status == 101 {
                return Err(RpcError::Protocol(
                    "peer switched protocols on the HTTP envelope".to_string(),
                ));
            }
            // Interim responses (100 Continue, 102, 103) carry no body.
            if !(100..200).contains(&status) {
                break (status, head);
            }
        };

        let body = if status == 204 || status == 304 {
            Vec::new()
        } else {
            read_http_body(&mut self.reader, &head)?
        };
        if !(200..300).contains(&status) {
            return Err(RpcError::Http { status });
        }
        Ok(Box::new(Cursor::new(body)))
    }
}

fn parse_status(line: &str) -> Result<u16, RpcError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse::<u16>()
            .map_err(|_| RpcError::Protocol(format!("malformed HTTP status line '{line}'"))),
        _ => Err(RpcError::Protocol(format!(
            "malformed HTTP status line '{line}'"
        ))),
    }
}

/// HTTP envelope over TCP, one keep-alive ureq agent per client.
///
/// The exchange completes inside `send`; `next_message` hands back the body
/// that came with it.
struct HttpAgent {
    agent: ureq::Agent,
    url: String,
    content_type: &'static str,
    reply: Option<Vec<u8>>,
}

impl HttpAgent {
    fn new(config: &ChannelConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(config.io_timeout)
            .max_idle_connections_per_host(1)
            .build()
            .into();
        Self {
            agent,
            url: format!("http://{}{}", config.target, request_path(config)),
            content_type: content_type(config.encoding),
            reply: None,
        }
    }
}

impl MessageTransport for HttpAgent {
    fn send(&mut self, message: &[u8]) -> Result<(), RpcError> {
        self.reply = None;
        let mut response = self
            .agent
            .post(self.url.as_str())
            .header("Content-Type", self.content_type)
            .header("Accept", self.content_type)
            .send(message)
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http {
                status: status.as_u16(),
            });
        }
        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_FRAME_LEN as u64)
            .read_to_vec()
            .map_err(http_error)?;
        self.reply = Some(body);
        Ok(())
    }

    fn next_message(&mut self) -> Result<Box<dyn BufRead + '_>, RpcError> {
        let body = self
            .reply
            .take()
            .ok_or_else(|| RpcError::Protocol("no HTTP reply is pending".to_string()))?;
        Ok(Box::new(Cursor::new(body)))
    }
}

fn http_error(err: ureq::Error) -> RpcError {
    match err {
        ureq::Error::StatusCode(status) => RpcError::Http { status },
        ureq::Error::Io(e) => RpcError::Io(e),
        e @ ureq::Error::Timeout(_) => RpcError::Io(io::Error::new(io::ErrorKind::TimedOut, e)),
        e => RpcError::Io(io::Error::other(e)),
    }
}

/// Service path with a leading slash.
fn request_path(config: &ChannelConfig) -> String {
    match config.service_path.as_deref() {
        Some(path) if path.starts_with('/') => path.to_string(),
        Some(path) => format!("/{path}"),
        None => "/".to_string(),
    }
}

struct ZlibStream {
    reader: BufReader<ZlibDecoder<Box<dyn Read + Send>>>,
    writer: ZlibEncoder<Box<dyn Write + Send>>,
}

impl MessageTransport for ZlibStream {
    fn send(&mut self, message: &[u8]) -> Result<(), RpcError> {
        self.writer.write_all(message)?;
        // Sync flush so the peer can inflate the whole message now.
        self.writer.flush()?;
        Ok(())
    }

    fn next_message(&mut self) -> Result<Box<dyn BufRead + '_>, RpcError> {
        Ok(Box::new(&mut self.reader))
    }
}
