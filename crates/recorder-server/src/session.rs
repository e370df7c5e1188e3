//! One open write session: a target file and its append-mode sink.

use std::fs::File;
use std::io::{self, Write};

use recorder_proto::{ErrorCode, OpenRequest, TargetSpec};
use recorder_store::{FileStore, StoreError, StoredFile, now_millis};

use crate::registry::SessionKey;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a stream is already open on this connection")]
    AlreadyOpen,
    #[error("no open stream on this connection")]
    NotOpen,
    #[error("target unavailable: {0}")]
    TargetUnavailable(String),
    #[error("sink write failed: {0}")]
    SinkWrite(#[source] io::Error),
    #[error("close failed: {0}")]
    CloseFailed(#[source] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Wire code reported in the `Error` acknowledgement.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            SessionError::AlreadyOpen => ErrorCode::AlreadyOpen,
            SessionError::NotOpen => ErrorCode::NotOpen,
            SessionError::TargetUnavailable(_) => ErrorCode::TargetUnavailable,
            SessionError::SinkWrite(_) => ErrorCode::SinkWrite,
            SessionError::CloseFailed(_) => ErrorCode::CloseFailed,
            SessionError::Store(_) => ErrorCode::TargetUnavailable,
        }
    }
}

/// Exactly one per open stream. Owns the sink for as long as the session is
/// registered; chunks append in arrival order, close syncs and releases.
#[derive(Debug)]
pub struct StreamSession {
    key: SessionKey,
    field_name: String,
    target: StoredFile,
    sink: File,
    bytes_written: u64,
}

impl StreamSession {
    /// Bind a session to a target and open its sink.
    ///
    /// `Fresh` creates a new empty file named from `name_hint` (or
    /// `<field>_<millis>` when the caller has none) with the extension
    /// derived from the MIME type. `Resume` reopens a previously returned
    /// serve path; the sink is opened in append mode either way, so resumed
    /// content is extended rather than truncated.
    pub fn open(
        store: &FileStore,
        key: SessionKey,
        req: &OpenRequest,
        name_hint: Option<&str>,
        folder: Option<&str>,
    ) -> Result<Self, SessionError> {
        let target = match &req.target {
            TargetSpec::Fresh { mime_type } => {
                let name = match name_hint {
                    Some(name) => name.to_string(),
                    None => format!("{}_{}", req.field_name, now_millis()),
                };
                store.create_from_empty(&name, mime_type, None, folder)?
            }
            TargetSpec::Resume { target_ref } => store
                .find_one(target_ref)
                .ok_or_else(|| SessionError::TargetUnavailable(target_ref.clone()))?,
        };

        let sink = store.open_append(&target).map_err(|e| {
            SessionError::TargetUnavailable(format!("{}: {e}", target.serve_path))
        })?;

        Ok(Self {
            key,
            field_name: req.field_name.clone(),
            target,
            sink,
            bytes_written: 0,
        })
    }

    /// Append one chunk verbatim. A failure leaves the session open; the
    /// caller reports the dropped chunk and the stream continues.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        self.sink.write_all(chunk).map_err(SessionError::SinkWrite)?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flush to storage and release the sink.
    pub fn close(self) -> Result<(), SessionError> {
        self.sink.sync_all().map_err(SessionError::CloseFailed)
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn serve_path(&self) -> &str {
        &self.target.serve_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
