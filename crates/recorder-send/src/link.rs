//! Client side of the streaming session protocol.
//!
//! Every request blocks for its acknowledgement before the next one goes
//! out, matching the server's one-ack-per-request ordering. The trait seam
//! exists so the recorder state machine can be exercised without a socket.

use std::io;
use std::net::{SocketAddr, TcpStream};

use recorder_proto::{ErrorCode, FrameKind, OpenRequest};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The server rejected the request; `msg` is operator-readable.
    #[error("{msg}")]
    Remote { code: ErrorCode, msg: String },
    #[error("unexpected acknowledgement: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One logical write session on the wire: open, then chunk writes, then
/// close. Implementations acknowledge each call before returning.
pub trait StreamLink {
    /// Open the session; returns the serve path of the bound target.
    fn open(&mut self, req: &OpenRequest) -> Result<String, LinkError>;
    fn write(&mut self, chunk: &[u8]) -> Result<(), LinkError>;
    fn close(&mut self) -> Result<(), LinkError>;
}

pub struct TcpStreamLink {
    stream: TcpStream,
}

impl TcpStreamLink {
    pub fn connect(addr: SocketAddr) -> Result<Self, LinkError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok(); // best-effort; not fatal

        // Handshake once per connection.
        recorder_proto::write_prelude(&mut stream)?;
        recorder_proto::read_prelude(&mut stream)?;

        Ok(Self { stream })
    }

    fn request(
        &mut self,
        kind: FrameKind,
        payload: &[u8],
        expect: FrameKind,
    ) -> Result<Vec<u8>, LinkError> {
        recorder_proto::write_frame(&mut self.stream, kind, payload)?;

        let (ack_kind, ack_payload) = recorder_proto::read_frame(&mut self.stream)?;
        if ack_kind == expect {
            return Ok(ack_payload);
        }
        if ack_kind == FrameKind::Error {
            let (code, msg) = recorder_proto::decode_error(&ack_payload)?;
            return Err(LinkError::Remote { code, msg });
        }
        Err(LinkError::Protocol(format!(
            "expected {expect:?}, got {ack_kind:?}"
        )))
    }
}

impl StreamLink for TcpStreamLink {
    fn open(&mut self, req: &OpenRequest) -> Result<String, LinkError> {
        let payload = recorder_proto::encode_open_request(req)?;
        let ack = self.request(FrameKind::OpenStream, &payload, FrameKind::StreamOpened)?;
        Ok(recorder_proto::decode_stream_opened(&ack)?)
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), LinkError> {
        self.request(FrameKind::WriteChunk, chunk, FrameKind::WriteOk)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.request(FrameKind::CloseStream, &[], FrameKind::StreamClosed)?;
        Ok(())
    }
}
