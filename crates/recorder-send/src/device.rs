//! Capture-device abstraction and the file-backed device used by the CLI.
//!
//! A device yields a fresh chunk source per recording; sources are not
//! restartable. The source reports its content type once, then produces
//! chunks until the device is stopped (source dropped) or the input runs
//! out. The file device slices its input on a timed cadence to mimic a live
//! capture stream.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device access denied: {0}")]
    AccessDenied(String),
}

/// Lazy, time-ordered chunk sequence from one capture run.
pub trait ChunkSource: Send + std::fmt::Debug {
    /// Content type of the produced chunks, known as soon as capture starts.
    fn mime_type(&self) -> &str;

    /// Next chunk, `None` once the source is exhausted. May block to pace
    /// production.
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Factory for chunk sources; one `open` per recording.
pub trait CaptureDevice {
    fn open(&self) -> Result<Box<dyn ChunkSource>, DeviceError>;
}

/// Streams a local file in timed slices, standing in for a live device.
pub struct FileCaptureDevice {
    path: PathBuf,
    mime_type: String,
    slice_bytes: usize,
    slice_interval: Duration,
}

impl FileCaptureDevice {
    pub fn new(
        path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        slice_bytes: usize,
        slice_interval: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            slice_bytes: slice_bytes.max(1),
            slice_interval,
        }
    }
}

impl CaptureDevice for FileCaptureDevice {
    fn open(&self) -> Result<Box<dyn ChunkSource>, DeviceError> {
        let file = File::open(&self.path)
            .map_err(|e| DeviceError::AccessDenied(format!("{}: {e}", self.path.display())))?;
        Ok(Box::new(FileChunkSource {
            file,
            mime_type: self.mime_type.clone(),
            slice_bytes: self.slice_bytes,
            slice_interval: self.slice_interval,
            first: true,
        }))
    }
}

#[derive(Debug)]
struct FileChunkSource {
    file: File,
    mime_type: String,
    slice_bytes: usize,
    slice_interval: Duration,
    first: bool,
}

impl ChunkSource for FileChunkSource {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if !self.first && !self.slice_interval.is_zero() {
            thread::sleep(self.slice_interval);
        }
        self.first = false;

        let mut buf = vec![0u8; self.slice_bytes];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

/// Run the source on its own thread, handing chunks to the recorder through
/// a channel. The device keeps producing while the recorder is paused; the
/// channel closes when the source drains or the receiver is dropped.
pub(crate) fn spawn_capture(mut source: Box<dyn ChunkSource>) -> Receiver<Vec<u8>> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        loop {
            match source.next_chunk() {
                Ok(Some(chunk)) => {
                    if tx.send(chunk).is_err() {
                        break; // recorder stopped; release the device
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("capture read error: {e}");
                    break;
                }
            }
        }
    });
    rx
}
