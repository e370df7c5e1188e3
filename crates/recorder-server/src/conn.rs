//! Per-connection request loop for the streaming session protocol.
//!
//! The connection is the session identity: at most one open stream per
//! connection, and every request is acknowledged before the next frame is
//! read, so writes for one session never interleave. Whatever way the loop
//! exits (EOF, transport error, protocol violation), a still-open session is
//! forcibly closed so no file handle outlives its connection.

use std::io;
use std::net::TcpStream;

use anyhow::{Context, Result};
use recorder_proto::{ErrorCode, FrameKind};
use recorder_store::FileStore;

use crate::registry::{SessionKey, SessionRegistry, into_session};
use crate::session::{SessionError, StreamSession};

pub fn serve_connection(
    key: SessionKey,
    mut stream: TcpStream,
    registry: &SessionRegistry,
    store: &FileStore,
    folder: Option<&str>,
) -> Result<()> {
    stream.set_nodelay(true).ok(); // best-effort; not fatal

    recorder_proto::write_prelude(&mut stream).context("write prelude")?;
    recorder_proto::read_prelude(&mut stream).context("read prelude")?;

    let result = request_loop(key, &mut stream, registry, store, folder);

    if let Some(entry) = registry.deregister(key) {
        force_close(key, entry);
    }

    result
}

fn request_loop(
    key: SessionKey,
    stream: &mut TcpStream,
    registry: &SessionRegistry,
    store: &FileStore,
    folder: Option<&str>,
) -> Result<()> {
    loop {
        let (kind, payload) = match recorder_proto::read_frame(&mut *stream) {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e).context("read frame"),
        };

        match kind {
            FrameKind::OpenStream => handle_open(key, stream, registry, store, folder, &payload)?,
            FrameKind::WriteChunk => handle_write(key, stream, registry, &payload)?,
            FrameKind::CloseStream => handle_close(key, stream, registry)?,
            other => {
                // Acknowledgement kinds are server-to-client only.
                tracing::warn!(key = %key, kind = ?other, "ignoring unexpected frame");
            }
        }
    }
}

fn handle_open(
    key: SessionKey,
    stream: &mut TcpStream,
    registry: &SessionRegistry,
    store: &FileStore,
    folder: Option<&str>,
    payload: &[u8],
) -> Result<()> {
    let req = match recorder_proto::decode_open_request(payload) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(key = %key, "malformed open request: {e}");
            return send_error(stream, ErrorCode::BadRequest, &e.to_string());
        }
    };

    // Rejecting first means a duplicate open cannot touch the existing
    // session's target, not even by creating a stray empty file.
    if registry.is_open(key) {
        tracing::warn!(key = %key, field = %req.field_name, "open rejected: stream already open");
        return send_error(
            stream,
            ErrorCode::AlreadyOpen,
            &SessionError::AlreadyOpen.to_string(),
        );
    }

    match StreamSession::open(store, key, &req, None, folder) {
        Ok(session) => {
            let serve_path = session.serve_path().to_string();
            if let Err(e) = registry.register(key, session) {
                return send_error(stream, e.wire_code(), &e.to_string());
            }
            tracing::info!(key = %key, field = %req.field_name, target = %serve_path, "stream opened");
            let ack = recorder_proto::encode_stream_opened(&serve_path).context("encode ack")?;
            recorder_proto::write_frame(stream, FrameKind::StreamOpened, &ack)
                .context("write open ack")
        }
        Err(e) => {
            tracing::warn!(key = %key, field = %req.field_name, "open failed: {e}");
            send_error(stream, e.wire_code(), &e.to_string())
        }
    }
}

fn handle_write(
    key: SessionKey,
    stream: &mut TcpStream,
    registry: &SessionRegistry,
    payload: &[u8],
) -> Result<()> {
    let Some(entry) = registry.lookup(key) else {
        return send_error(
            stream,
            ErrorCode::NotOpen,
            &SessionError::NotOpen.to_string(),
        );
    };

    let append = {
        let mut session = entry.lock().unwrap_or_else(|err| err.into_inner());
        session.append(payload)
    };
    match append {
        Ok(()) => {
            recorder_proto::write_frame(stream, FrameKind::WriteOk, &[]).context("write ack")
        }
        Err(e) => {
            // A failed chunk is dropped and the stream continues; a live
            // capture source cannot replay it anyway.
            tracing::warn!(key = %key, dropped = payload.len(), "chunk dropped: {e}");
            send_error(stream, e.wire_code(), &e.to_string())
        }
    }
}

fn handle_close(key: SessionKey, stream: &mut TcpStream, registry: &SessionRegistry) -> Result<()> {
    let Some(entry) = registry.deregister(key) else {
        // Client teardown races (disconnect then explicit close) must not
        // surface as errors: closing nothing succeeds as a no-op.
        return recorder_proto::write_frame(stream, FrameKind::StreamClosed, &[])
            .context("write close ack");
    };

    let Some(session) = into_session(entry) else {
        return send_error(stream, ErrorCode::CloseFailed, "session still in use");
    };

    let target = session.serve_path().to_string();
    let bytes = session.bytes_written();
    match session.close() {
        Ok(()) => {
            tracing::info!(key = %key, target = %target, bytes, "stream closed");
            recorder_proto::write_frame(stream, FrameKind::StreamClosed, &[])
                .context("write close ack")
        }
        Err(e) => {
            // Deregistered regardless: leaking the registry entry is worse
            // than losing the flush error.
            tracing::warn!(key = %key, target = %target, "close failed: {e}");
            send_error(stream, e.wire_code(), &e.to_string())
        }
    }
}

fn force_close(key: SessionKey, entry: std::sync::Arc<std::sync::Mutex<StreamSession>>) {
    match into_session(entry) {
        Some(session) => {
            let target = session.serve_path().to_string();
            let bytes = session.bytes_written();
            if let Err(e) = session.close() {
                tracing::warn!(key = %key, target = %target, "forced close failed: {e}");
            } else {
                tracing::warn!(key = %key, target = %target, bytes, "connection lost with open stream; forced close");
            }
        }
        None => tracing::warn!(key = %key, "session still referenced after disconnect"),
    }
}

fn send_error(stream: &mut TcpStream, code: ErrorCode, msg: &str) -> Result<()> {
    let payload = recorder_proto::encode_error(code, msg).context("encode error ack")?;
    recorder_proto::write_frame(stream, FrameKind::Error, &payload).context("write error ack")
}
