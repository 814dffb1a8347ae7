//! Loopback file service used by the channel integration tests.
//!
//! The server speaks every framing and encoding the client supports and
//! answers each request through a caller-supplied handler.

#![allow(dead_code)]

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use rpcfs_core::framing::{
    content_type, read_frame, read_http_body, read_http_head, write_frame,
};
use rpcfs_core::{Call, Encoding, FileSystemResponse, Framing, RpcReply, RpcRequest};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;

pub type Handler = Arc<dyn Fn(&RpcRequest) -> RpcReply + Send + Sync>;

/// Handler that answers every call with `respond(call)` and echoes the seq.
pub fn handler<F>(respond: F) -> Handler
where
    F: Fn(&Call) -> FileSystemResponse + Send + Sync + 'static,
{
    Arc::new(move |req: &RpcRequest| RpcReply {
        seq: req.seq,
        response: respond(&req.call),
    })
}

/// Binds a loopback TCP server and returns its `host:port`.
pub fn spawn_tcp(framing: Framing, encoding: Encoding, handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let reader = stream.try_clone().expect("clone tcp stream");
                let _ = serve(reader, stream, framing, encoding, &handler);
            });
        }
    });
    format!("127.0.0.1:{}", addr.port())
}

/// Binds a Unix socket server at `path`.
pub fn spawn_unix(path: &Path, framing: Framing, encoding: Encoding, handler: Handler) {
    let listener = UnixListener::bind(path).expect("bind unix socket");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let reader = stream.try_clone().expect("clone unix stream");
                let _ = serve(reader, stream, framing, encoding, &handler);
            });
        }
    });
}

/// Serves one connection until the peer hangs up.
pub fn serve<R, W>(
    reader: R,
    writer: W,
    framing: Framing,
    encoding: Encoding,
    handler: &Handler,
) -> io::Result<()>
where
    R: Read,
    W: Write,
{
    let decode = |bytes: &[u8]| -> io::Result<RpcRequest> {
        encoding
            .decode(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    };
    let encode = |reply: &RpcReply| -> io::Result<Vec<u8>> {
        encoding
            .encode(reply)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    };

    match framing {
        Framing::Buffered => {
            let mut reader = BufReader::new(reader);
            let mut writer = BufWriter::new(writer);
            loop {
                let request: RpcRequest = encoding
                    .decode_from(&mut reader)
                    .map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()))?;
                writer.write_all(&encode(&handler(&request))?)?;
                writer.flush()?;
            }
        }
        Framing::Framed => {
            let mut reader = BufReader::new(reader);
            let mut writer = BufWriter::new(writer);
            loop {
                let request = decode(&read_frame(&mut reader)?)?;
                write_frame(&mut writer, &encode(&handler(&request))?)?;
                writer.flush()?;
            }
        }
        Framing::Http => {
            let mut reader = BufReader::new(reader);
            let mut writer = BufWriter::new(writer);
            loop {
                let body = read_post(&mut reader)?;
                let reply = encode(&handler(&decode(&body)?))?;
                write!(
                    writer,
                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
                    content_type(encoding),
                    reply.len()
                )?;
                writer.write_all(&reply)?;
                writer.flush()?;
            }
        }
        Framing::Zlib => {
            let mut reader = BufReader::new(ZlibDecoder::new(reader));
            let mut writer = ZlibEncoder::new(writer, Compression::fast());
            loop {
                let request: RpcRequest = encoding
                    .decode_from(&mut reader)
                    .map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()))?;
                writer.write_all(&encode(&handler(&request))?)?;
                writer.flush()?;
            }
        }
    }
}

/// Reads one HTTP request and answers it with a bare status line.
pub fn spawn_http_status(status: u16) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream.try_clone().expect("clone tcp stream"));
        let mut writer = stream;
        if read_post(&mut reader).is_ok() {
            let _ = write!(
                writer,
                "HTTP/1.1 {status} Nope\r\nContent-Length: 0\r\n\r\n"
            );
            let _ = writer.flush();
        }
        // Hold the connection open until the client hangs up.
        let _ = reader.fill_buf();
    });
    format!("127.0.0.1:{}", addr.port())
}

/// Reads one POST request and returns its body.
fn read_post(reader: &mut dyn BufRead) -> io::Result<Vec<u8>> {
    let head = read_http_head(reader)?;
    assert!(
        head.start_line.starts_with("POST "),
        "unexpected request line {}",
        head.start_line
    );
    read_http_body(reader, &head)
}

/// HTTP server that answers with chunked bodies, optionally preceded by a
/// `100 Continue` interim response.
pub fn serve_chunked_http<R, W>(
    reader: R,
    writer: W,
    encoding: Encoding,
    handler: &Handler,
    interim: bool,
) -> io::Result<()>
where
    R: Read,
    W: Write,
{
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);
    loop {
        let body = read_post(&mut reader)?;
        let request: RpcRequest = encoding
            .decode(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let reply = encoding
            .encode(&handler(&request))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        if interim {
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
        }
        write!(
            writer,
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
            content_type(encoding)
        )?;
        let (head, tail) = reply.split_at(reply.len() / 2);
        for chunk in [head, tail] {
            if !chunk.is_empty() {
                write!(writer, "{:x}\r\n", chunk.len())?;
                writer.write_all(chunk)?;
                writer.write_all(b"\r\n")?;
            }
        }
        writer.write_all(b"0\r\n\r\n")?;
        writer.flush()?;
    }
}

/// Binds a TCP server answering with chunked HTTP replies.
pub fn spawn_chunked_http_tcp(encoding: Encoding, handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let reader = stream.try_clone().expect("clone tcp stream");
                let _ = serve_chunked_http(reader, stream, encoding, &handler, false);
            });
        }
    });
    format!("127.0.0.1:{}", addr.port())
}

/// Binds a Unix socket server answering `100 Continue` and then a chunked
/// HTTP reply to every request.
pub fn spawn_chunked_http_unix(path: &Path, encoding: Encoding, handler: Handler) {
    let listener = UnixListener::bind(path).expect("bind unix socket");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let reader = stream.try_clone().expect("clone unix stream");
                let _ = serve_chunked_http(reader, stream, encoding, &handler, true);
            });
        }
    });
}
