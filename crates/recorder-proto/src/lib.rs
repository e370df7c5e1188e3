//! Shared wire primitives for `recorder-server` and `recorder-send`.
//!
//! Streaming session protocol v1: framed requests over a single TCP
//! connection, one acknowledgement per request. The connection itself is the
//! session identity; no session id travels on the wire.
//!
//! Frame format:
//! - magic: 4 bytes "RCRD" (once, at connection start)
//! - version: u16 LE (once, at connection start)
//! - then repeated frames:
//!   - kind: u8
//!   - len: u32 LE
//!   - payload: [u8; len]
//!
//! Strings are `u16 LE length + UTF-8`; optional fields carry a presence
//! byte; the open target is a tag byte (0 = fresh, 1 = resume).

use std::io::{self, Read, Write};

pub const MAGIC: [u8; 4] = *b"RCRD";
pub const VERSION: u16 = 1;

/// Upper bound on a single frame payload. Chunks arrive in capture-slice
/// sized pieces, so anything near this limit is a corrupt or hostile header.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Client → server: open a write session bound to a target file.
    OpenStream = 0x10,
    /// Client → server: append one chunk to the open session.
    WriteChunk = 0x11,
    /// Client → server: flush and release the open session.
    CloseStream = 0x12,

    /// Server → client: open succeeded; payload carries the serve path.
    StreamOpened = 0x30,
    /// Server → client: chunk appended.
    WriteOk = 0x31,
    /// Server → client: session released (also acks a no-op close).
    StreamClosed = 0x32,

    Error = 0x7F,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        let k = match b {
            0x10 => FrameKind::OpenStream,
            0x11 => FrameKind::WriteChunk,
            0x12 => FrameKind::CloseStream,
            0x30 => FrameKind::StreamOpened,
            0x31 => FrameKind::WriteOk,
            0x32 => FrameKind::StreamClosed,
            0x7F => FrameKind::Error,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame kind {b:#x}"),
                ))
            }
        };
        Ok(k)
    }
}

/// Machine-readable reason carried by an `Error` acknowledgement.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The connection already has an open session.
    AlreadyOpen = 0x01,
    /// No session is open on the connection.
    NotOpen = 0x02,
    /// The target could not be created or resolved.
    TargetUnavailable = 0x03,
    /// A single append failed; the session stays open and the chunk is dropped.
    SinkWrite = 0x04,
    /// Flush/release failed; the session is released regardless.
    CloseFailed = 0x05,
    /// The request payload did not decode.
    BadRequest = 0x06,
}

impl ErrorCode {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        let c = match b {
            0x01 => ErrorCode::AlreadyOpen,
            0x02 => ErrorCode::NotOpen,
            0x03 => ErrorCode::TargetUnavailable,
            0x04 => ErrorCode::SinkWrite,
            0x05 => ErrorCode::CloseFailed,
            0x06 => ErrorCode::BadRequest,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown error code {b:#x}"),
                ))
            }
        };
        Ok(c)
    }
}

/// How the server should bind the session to a target file.
///
/// Fresh targets are named by the server (extension from the MIME type);
/// resume reopens an existing target in append mode. An explicit tag on the
/// wire, not an optional field whose presence is overloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Fresh { mime_type: String },
    Resume { target_ref: String },
}

/// Payload of an `OpenStream` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub view_name: String,
    pub row_id: Option<i64>,
    pub field_name: String,
    pub view_kind: String,
    pub target: TargetSpec,
}

/// Connection prelude: magic + version.
pub fn write_prelude(mut w: impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Read and validate the connection prelude.
pub fn read_prelude(mut r: impl Read) -> io::Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }

    let mut ver = [0u8; 2];
    r.read_exact(&mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {version}"),
        ));
    }

    Ok(())
}

/// Write a frame header + payload.
pub fn write_frame(mut w: impl Write, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(kind, payload)?;
    w.write_all(&frame)?;
    Ok(())
}

/// Encode a frame into a single buffer (header + payload).
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = payload
        .len()
        .try_into()
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;

    let mut out = Vec::with_capacity(1 + 4 + payload.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read a frame header and return `(kind, len)`.
///
/// The caller should then read exactly `len` bytes of payload.
pub fn read_frame_header(mut r: impl Read) -> io::Result<(FrameKind, u32)> {
    let mut kindb = [0u8; 1];
    r.read_exact(&mut kindb)?;
    let kind = FrameKind::from_u8(kindb[0])?;

    let mut lenb = [0u8; 4];
    r.read_exact(&mut lenb)?;
    let len = u32::from_le_bytes(lenb);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload of {len} bytes exceeds limit"),
        ));
    }
    Ok((kind, len))
}

/// Read one full frame: header plus payload.
pub fn read_frame(mut r: impl Read) -> io::Result<(FrameKind, Vec<u8>)> {
    let (kind, len) = read_frame_header(&mut r)?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok((kind, payload))
}

/// Encode an `OpenStream` payload.
pub fn encode_open_request(req: &OpenRequest) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    put_str(&mut out, &req.view_name)?;
    match req.row_id {
        Some(id) => {
            out.push(1);
            out.extend_from_slice(&id.to_le_bytes());
        }
        None => out.push(0),
    }
    put_str(&mut out, &req.field_name)?;
    put_str(&mut out, &req.view_kind)?;
    match &req.target {
        TargetSpec::Fresh { mime_type } => {
            out.push(0);
            put_str(&mut out, mime_type)?;
        }
        TargetSpec::Resume { target_ref } => {
            out.push(1);
            put_str(&mut out, target_ref)?;
        }
    }
    Ok(out)
}

/// Decode an `OpenStream` payload.
pub fn decode_open_request(payload: &[u8]) -> io::Result<OpenRequest> {
    let mut r = FieldReader::new(payload);
    let view_name = r.take_str()?.to_string();
    let row_id = match r.take_u8()? {
        0 => None,
        1 => Some(r.take_i64()?),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad row id presence byte {other:#x}"),
            ))
        }
    };
    let field_name = r.take_str()?.to_string();
    let view_kind = r.take_str()?.to_string();
    let target = match r.take_u8()? {
        0 => TargetSpec::Fresh {
            mime_type: r.take_str()?.to_string(),
        },
        1 => TargetSpec::Resume {
            target_ref: r.take_str()?.to_string(),
        },
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad target tag {other:#x}"),
            ))
        }
    };
    r.finish()?;
    Ok(OpenRequest {
        view_name,
        row_id,
        field_name,
        view_kind,
        target,
    })
}

/// Encode a `StreamOpened` payload: the serve path of the bound target.
pub fn encode_stream_opened(serve_path: &str) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    put_str(&mut out, serve_path)?;
    Ok(out)
}

/// Decode a `StreamOpened` payload.
pub fn decode_stream_opened(payload: &[u8]) -> io::Result<String> {
    let mut r = FieldReader::new(payload);
    let serve_path = r.take_str()?.to_string();
    r.finish()?;
    Ok(serve_path)
}

/// Encode an `Error` payload: code + human-readable message.
pub fn encode_error(code: ErrorCode, msg: &str) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1 + 2 + msg.len());
    out.push(code as u8);
    put_str(&mut out, msg)?;
    Ok(out)
}

/// Decode an `Error` payload.
pub fn decode_error(payload: &[u8]) -> io::Result<(ErrorCode, String)> {
    let mut r = FieldReader::new(payload);
    let code = ErrorCode::from_u8(r.take_u8()?)?;
    let msg = r.take_str()?.to_string();
    r.finish()?;
    Ok((code, msg))
}

fn put_str(out: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    let len: u16 = bytes
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Sequential payload reader with bounds checks on every field.
struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated payload"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn take_u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> io::Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn take_i64(&mut self) -> io::Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn take_str(&mut self) -> io::Result<&'a str> {
        let len = self.take_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string not utf-8"))
    }

    fn finish(self) -> io::Result<()> {
        if !self.buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "trailing bytes after payload",
            ));
        }
        Ok(())
    }
}
