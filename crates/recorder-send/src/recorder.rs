//! Per-recording state machine.
//!
//! A recorder is constructed per recording: `start` acquires the device,
//! learns the content type, opens the write session, and begins pumping
//! chunks. Pause and resume gate forwarding only; the device keeps producing
//! and the session stays open. Stop halts capture, closes the session, and
//! only then goes `Inactive`, which is what releases the single-active
//! guard held by the panel.

use std::fmt;

use crossbeam_channel::Receiver;
use recorder_proto::{OpenRequest, TargetSpec};

use crate::device::{self, CaptureDevice, DeviceError};
use crate::link::{LinkError, StreamLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
    Paused,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecorderState::Inactive => "inactive",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("a recorder for '{field}' is {state}, please stop it before starting a new one")]
    ConflictingRecorder { field: String, state: RecorderState },
    #[error("please stop the recording before removing the file")]
    StopBeforeRemove,
    #[error("field '{0}' has no recording to resume")]
    NothingToResume(String),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Where a recording is stored once complete: the owning view/row/field.
#[derive(Debug, Clone)]
pub struct RecordingIdentity {
    pub view_name: String,
    pub row_id: Option<i64>,
    pub field_name: String,
    pub view_kind: String,
}

/// What one pump step did with the produced chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEvent {
    /// Chunk written and acknowledged; carries the chunk size.
    Forwarded(usize),
    /// Chunk produced while paused; not forwarded.
    Gated(usize),
    /// The server failed this single write; the chunk is gone but the
    /// session and the recording continue.
    Dropped,
    /// The capture source is exhausted.
    SourceDrained,
}

pub struct Recorder {
    field_name: String,
    state: RecorderState,
    target: Option<String>,
    link: Box<dyn StreamLink>,
    chunks: Option<Receiver<Vec<u8>>>,
}

impl Recorder {
    /// Acquire the device, open the session, and enter `Recording`.
    ///
    /// Fails without side effects that outlive it: a device-access or open
    /// failure means no recorder exists and the state machine never left
    /// `Inactive`. `resume_target` reopens that serve path in append mode
    /// instead of creating a fresh target.
    pub fn start(
        identity: &RecordingIdentity,
        resume_target: Option<String>,
        device: &dyn CaptureDevice,
        mut link: Box<dyn StreamLink>,
    ) -> Result<Self, RecorderError> {
        let source = device.open()?;
        let mime_type = source.mime_type().to_string();

        let target = match resume_target {
            Some(target_ref) => TargetSpec::Resume { target_ref },
            None => TargetSpec::Fresh { mime_type },
        };
        let req = OpenRequest {
            view_name: identity.view_name.clone(),
            row_id: identity.row_id,
            field_name: identity.field_name.clone(),
            view_kind: identity.view_kind.clone(),
            target,
        };
        let serve_path = link.open(&req)?;
        tracing::info!(field = %identity.field_name, target = %serve_path, "recording started");

        let chunks = device::spawn_capture(source);
        Ok(Self {
            field_name: identity.field_name.clone(),
            state: RecorderState::Recording,
            target: Some(serve_path),
            link,
            chunks: Some(chunks),
        })
    }

    pub fn pause(&mut self) {
        if self.state == RecorderState::Recording {
            self.state = RecorderState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == RecorderState::Paused {
            self.state = RecorderState::Recording;
        }
    }

    /// Handle the next produced chunk: forward it, gate it while paused, or
    /// report the source drained.
    pub fn pump(&mut self) -> Result<PumpEvent, RecorderError> {
        let Some(chunks) = &self.chunks else {
            return Ok(PumpEvent::SourceDrained);
        };
        let chunk = match chunks.recv() {
            Ok(chunk) => chunk,
            Err(_) => {
                self.chunks = None;
                return Ok(PumpEvent::SourceDrained);
            }
        };

        if self.state != RecorderState::Recording {
            return Ok(PumpEvent::Gated(chunk.len()));
        }

        match self.link.write(&chunk) {
            Ok(()) => Ok(PumpEvent::Forwarded(chunk.len())),
            Err(LinkError::Remote { code, msg }) => {
                tracing::warn!(field = %self.field_name, code = ?code, "chunk dropped: {msg}");
                Ok(PumpEvent::Dropped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Halt capture, release the device, close the session, go `Inactive`.
    ///
    /// The guard is released even when close reports an error; leaving the
    /// recorder active over a deregistered session would wedge every field.
    pub fn stop(&mut self) -> Result<(), RecorderError> {
        self.chunks = None;
        let closed = self.link.close();
        self.state = RecorderState::Inactive;
        closed?;
        tracing::info!(field = %self.field_name, "recording stopped");
        Ok(())
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Serve path of the target this recording writes into.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}
