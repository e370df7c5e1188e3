//! Form-scoped recorder context.
//!
//! Owns the single "current recorder" for one form, the per-field stored
//! serve paths (the values the form would submit), and the operator prompt
//! for destructive choices. At most one recorder is recording or paused at
//! any time across all fields of the panel; starting a second one names the
//! blocking field in the error.

use std::collections::HashMap;

use crate::device::CaptureDevice;
use crate::link::{LinkError, StreamLink};
use crate::recorder::{PumpEvent, Recorder, RecorderError, RecorderState, RecordingIdentity};

/// Operator confirmation for destructive choices (discard, delete).
pub trait Prompt {
    fn confirm(&self, message: &str) -> bool;
}

impl<F> Prompt for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

/// Produces a fresh link per recording; the session lives and dies with it.
pub type LinkFactory = dyn Fn() -> Result<Box<dyn StreamLink>, LinkError>;

/// What a toggle press did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Paused,
    Resumed,
    /// The field already had a recording and the operator declined to
    /// discard it; nothing changed.
    Kept,
}

pub struct RecorderPanel {
    view_name: String,
    view_kind: String,
    row_id: Option<i64>,
    current: Option<Recorder>,
    values: HashMap<String, String>,
    prompt: Box<dyn Prompt>,
}

impl RecorderPanel {
    pub fn new(
        view_name: impl Into<String>,
        view_kind: impl Into<String>,
        row_id: Option<i64>,
        prompt: Box<dyn Prompt>,
    ) -> Self {
        Self {
            view_name: view_name.into(),
            view_kind: view_kind.into(),
            row_id,
            current: None,
            values: HashMap::new(),
            prompt,
        }
    }

    /// Prefill a field's stored recording (a previously submitted value).
    pub fn set_value(&mut self, field: &str, serve_path: String) {
        self.values.insert(field.to_string(), serve_path);
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// State of the named field's recorder; fields without the current
    /// recorder are `Inactive`.
    pub fn recorder_state(&self, field: &str) -> RecorderState {
        self.current
            .as_ref()
            .filter(|r| r.field_name() == field)
            .map(|r| r.state())
            .unwrap_or(RecorderState::Inactive)
    }

    /// One press of the field's record button: start a new recording, or
    /// pause/resume the field's running one.
    pub fn toggle(
        &mut self,
        field: &str,
        device: &dyn CaptureDevice,
        link_factory: &LinkFactory,
    ) -> Result<ToggleOutcome, RecorderError> {
        if let Some(rec) = self.current.as_mut() {
            let state = rec.state();
            if rec.field_name() == field {
                match state {
                    RecorderState::Recording => {
                        rec.pause();
                        return Ok(ToggleOutcome::Paused);
                    }
                    RecorderState::Paused => {
                        rec.resume();
                        return Ok(ToggleOutcome::Resumed);
                    }
                    RecorderState::Inactive => {} // completed; a new start follows
                }
            } else if state != RecorderState::Inactive {
                return Err(RecorderError::ConflictingRecorder {
                    field: rec.field_name().to_string(),
                    state,
                });
            }
        }

        if self.values.contains_key(field) {
            let msg =
                format!("The field '{field}' already has a recording, do you want to delete it?");
            if !self.prompt.confirm(&msg) {
                return Ok(ToggleOutcome::Kept);
            }
            self.discard(field);
        }

        self.start_recorder(field, None, device, link_factory)?;
        Ok(ToggleOutcome::Started)
    }

    /// Start a recording that appends into the field's existing target
    /// instead of creating a fresh one.
    pub fn resume_into(
        &mut self,
        field: &str,
        device: &dyn CaptureDevice,
        link_factory: &LinkFactory,
    ) -> Result<(), RecorderError> {
        if let Some(rec) = self.current.as_ref() {
            if rec.state() != RecorderState::Inactive {
                return Err(RecorderError::ConflictingRecorder {
                    field: rec.field_name().to_string(),
                    state: rec.state(),
                });
            }
        }
        let target = self
            .values
            .get(field)
            .cloned()
            .ok_or_else(|| RecorderError::NothingToResume(field.to_string()))?;
        self.start_recorder(field, Some(target), device, link_factory)
    }

    /// Stop the field's recording. A field with no running recorder is a
    /// no-op; the completed recording stays as the field's value.
    pub fn stop(&mut self, field: &str) -> Result<(), RecorderError> {
        match self.current.as_mut() {
            Some(rec)
                if rec.field_name() == field && rec.state() != RecorderState::Inactive =>
            {
                rec.stop()
            }
            _ => Ok(()),
        }
    }

    /// Discard the field's recording. Rejected while recording; a paused
    /// recording asks for confirmation, is stopped, and its value cleared.
    /// Returns whether the value was removed.
    pub fn remove(&mut self, field: &str) -> Result<bool, RecorderError> {
        let current_state = self
            .current
            .as_ref()
            .filter(|r| r.field_name() == field)
            .map(|r| r.state());

        match current_state {
            Some(RecorderState::Recording) => Err(RecorderError::StopBeforeRemove),
            Some(RecorderState::Paused) => {
                if !self
                    .prompt
                    .confirm("Are you sure you want to delete this recording?")
                {
                    return Ok(false);
                }
                if let Some(rec) = self.current.as_mut() {
                    rec.stop()?;
                }
                self.discard(field);
                Ok(true)
            }
            _ => {
                self.values.remove(field);
                Ok(true)
            }
        }
    }

    /// Forward the next produced chunk of the current recording.
    pub fn pump(&mut self) -> Result<PumpEvent, RecorderError> {
        match self.current.as_mut() {
            Some(rec) => rec.pump(),
            None => Ok(PumpEvent::SourceDrained),
        }
    }

    fn start_recorder(
        &mut self,
        field: &str,
        resume_target: Option<String>,
        device: &dyn CaptureDevice,
        link_factory: &LinkFactory,
    ) -> Result<(), RecorderError> {
        let identity = RecordingIdentity {
            view_name: self.view_name.clone(),
            row_id: self.row_id,
            field_name: field.to_string(),
            view_kind: self.view_kind.clone(),
        };
        let link = link_factory()?;
        let rec = Recorder::start(&identity, resume_target, device, link)?;
        if let Some(target) = rec.target() {
            self.values.insert(field.to_string(), target.to_string());
        }
        self.current = Some(rec);
        Ok(())
    }

    fn discard(&mut self, field: &str) {
        self.values.remove(field);
        if self
            .current
            .as_ref()
            .is_some_and(|r| r.field_name() == field)
        {
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChunkSource, DeviceError};
    use recorder_proto::{ErrorCode, OpenRequest, TargetSpec};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct ScriptedSource {
        mime: String,
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkSource for ScriptedSource {
        fn mime_type(&self) -> &str {
            &self.mime
        }

        fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.chunks.pop_front())
        }
    }

    struct ScriptedDevice {
        mime: String,
        chunks: Vec<Vec<u8>>,
        deny: bool,
    }

    impl ScriptedDevice {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                mime: "audio/webm".to_string(),
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                deny: false,
            }
        }

        fn denied() -> Self {
            Self {
                mime: "audio/webm".to_string(),
                chunks: Vec::new(),
                deny: true,
            }
        }
    }

    impl CaptureDevice for ScriptedDevice {
        fn open(&self) -> Result<Box<dyn ChunkSource>, DeviceError> {
            if self.deny {
                return Err(DeviceError::AccessDenied("microphone".to_string()));
            }
            Ok(Box::new(ScriptedSource {
                mime: self.mime.clone(),
                chunks: self.chunks.clone().into(),
            }))
        }
    }

    #[derive(Default)]
    struct LinkLog {
        opens: Vec<OpenRequest>,
        writes: Vec<Vec<u8>>,
        closes: usize,
    }

    struct FakeLink {
        log: Arc<Mutex<LinkLog>>,
        fail_open: bool,
        fail_writes: usize,
    }

    impl StreamLink for FakeLink {
        fn open(&mut self, req: &OpenRequest) -> Result<String, LinkError> {
            if self.fail_open {
                return Err(LinkError::Remote {
                    code: ErrorCode::TargetUnavailable,
                    msg: "target unavailable: files/gone.webm".to_string(),
                });
            }
            let mut log = self.log.lock().unwrap();
            log.opens.push(req.clone());
            Ok(format!("files/take_{}.webm", log.opens.len()))
        }

        fn write(&mut self, chunk: &[u8]) -> Result<(), LinkError> {
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
                return Err(LinkError::Remote {
                    code: ErrorCode::SinkWrite,
                    msg: "sink write failed: disk full".to_string(),
                });
            }
            self.log.lock().unwrap().writes.push(chunk.to_vec());
            Ok(())
        }

        fn close(&mut self) -> Result<(), LinkError> {
            self.log.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    fn factory(log: Arc<Mutex<LinkLog>>) -> impl Fn() -> Result<Box<dyn StreamLink>, LinkError> {
        move || {
            Ok(Box::new(FakeLink {
                log: log.clone(),
                fail_open: false,
                fail_writes: 0,
            }) as Box<dyn StreamLink>)
        }
    }

    fn panel() -> RecorderPanel {
        RecorderPanel::new("edit_note", "Recorder", Some(1), Box::new(|_: &str| true))
    }

    fn panel_declining() -> RecorderPanel {
        RecorderPanel::new("edit_note", "Recorder", Some(1), Box::new(|_: &str| false))
    }

    fn drain(panel: &mut RecorderPanel) {
        while panel.pump().unwrap() != PumpEvent::SourceDrained {}
    }

    #[test]
    fn recording_forwards_chunks_in_order() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1", b"c2", b"c3"]);

        let outcome = panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started);
        assert_eq!(panel.recorder_state("f1"), RecorderState::Recording);

        drain(&mut panel);
        panel.stop("f1").unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.writes, vec![b"c1".to_vec(), b"c2".to_vec(), b"c3".to_vec()]);
        assert_eq!(log.closes, 1);
        assert!(matches!(
            log.opens[0].target,
            TargetSpec::Fresh { ref mime_type } if mime_type == "audio/webm"
        ));
        assert_eq!(panel.value("f1"), Some("files/take_1.webm"));
        assert_eq!(panel.recorder_state("f1"), RecorderState::Inactive);
    }

    #[test]
    fn second_field_is_rejected_while_first_records() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1"]);

        panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        let err = panel.toggle("f2", &device, &factory(log.clone())).unwrap_err();
        match err {
            RecorderError::ConflictingRecorder { field, state } => {
                assert_eq!(field, "f1");
                assert_eq!(state, RecorderState::Recording);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // First recorder is unchanged by the rejected start.
        assert_eq!(panel.recorder_state("f1"), RecorderState::Recording);
        assert_eq!(panel.value("f2"), None);
        assert_eq!(log.lock().unwrap().opens.len(), 1);
    }

    #[test]
    fn paused_recorder_still_blocks_other_fields() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1"]);

        panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        assert_eq!(
            panel.toggle("f1", &device, &factory(log.clone())).unwrap(),
            ToggleOutcome::Paused
        );
        let err = panel.toggle("f2", &device, &factory(log.clone())).unwrap_err();
        assert!(matches!(
            err,
            RecorderError::ConflictingRecorder { ref field, state: RecorderState::Paused }
                if field == "f1"
        ));
    }

    #[test]
    fn stop_releases_the_guard_for_any_field() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1"]);

        panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        drain(&mut panel);
        panel.stop("f1").unwrap();

        let outcome = panel.toggle("f2", &device, &factory(log.clone())).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started);
        assert_eq!(panel.recorder_state("f2"), RecorderState::Recording);
        // f1 keeps its completed recording.
        assert_eq!(panel.value("f1"), Some("files/take_1.webm"));
    }

    #[test]
    fn pause_gates_forwarding_and_resume_restores_it() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"while-paused", b"after-resume"]);

        panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        panel.toggle("f1", &device, &factory(log.clone())).unwrap(); // pause

        // The device produced a chunk while paused; it is not forwarded.
        assert_eq!(panel.pump().unwrap(), PumpEvent::Gated(12));

        panel.toggle("f1", &device, &factory(log.clone())).unwrap(); // resume
        assert_eq!(panel.pump().unwrap(), PumpEvent::Forwarded(12));

        assert_eq!(log.lock().unwrap().writes, vec![b"after-resume".to_vec()]);
    }

    #[test]
    fn failed_write_drops_the_chunk_and_continues() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1", b"c2"]);

        let log_for_link = log.clone();
        let flaky = move || {
            Ok(Box::new(FakeLink {
                log: log_for_link.clone(),
                fail_open: false,
                fail_writes: 1,
            }) as Box<dyn StreamLink>)
        };
        panel.toggle("f1", &device, &flaky).unwrap();

        assert_eq!(panel.pump().unwrap(), PumpEvent::Dropped);
        assert_eq!(panel.pump().unwrap(), PumpEvent::Forwarded(2));
        assert_eq!(panel.recorder_state("f1"), RecorderState::Recording);
        assert_eq!(log.lock().unwrap().writes, vec![b"c2".to_vec()]);
    }

    #[test]
    fn re_record_asks_before_discarding_and_keeps_on_decline() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel_declining();
        panel.set_value("f1", "files/old.webm".to_string());

        let device = ScriptedDevice::new(&[b"c1"]);
        let outcome = panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        assert_eq!(outcome, ToggleOutcome::Kept);
        assert_eq!(panel.value("f1"), Some("files/old.webm"));
        assert_eq!(log.lock().unwrap().opens.len(), 0);
    }

    #[test]
    fn re_record_after_confirm_starts_a_fresh_target() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        panel.set_value("f1", "files/old.webm".to_string());

        let device = ScriptedDevice::new(&[b"c1"]);
        let outcome = panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started);

        let log = log.lock().unwrap();
        assert!(matches!(log.opens[0].target, TargetSpec::Fresh { .. }));
        assert_eq!(panel.value("f1"), Some("files/take_1.webm"));
    }

    #[test]
    fn resume_into_reopens_the_existing_target() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        panel.set_value("f1", "files/old.webm".to_string());

        let device = ScriptedDevice::new(&[b"c1"]);
        panel.resume_into("f1", &device, &factory(log.clone())).unwrap();

        let log = log.lock().unwrap();
        assert!(matches!(
            log.opens[0].target,
            TargetSpec::Resume { ref target_ref } if target_ref == "files/old.webm"
        ));
    }

    #[test]
    fn resume_into_requires_an_existing_value() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1"]);
        let err = panel
            .resume_into("f1", &device, &factory(log.clone()))
            .unwrap_err();
        assert!(matches!(err, RecorderError::NothingToResume(_)));
    }

    #[test]
    fn remove_while_recording_is_rejected() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1"]);

        panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        let err = panel.remove("f1").unwrap_err();
        assert!(matches!(err, RecorderError::StopBeforeRemove));
        assert_eq!(panel.recorder_state("f1"), RecorderState::Recording);
        assert!(panel.value("f1").is_some());
    }

    #[test]
    fn remove_paused_with_confirmation_stops_and_clears() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1"]);

        panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        panel.toggle("f1", &device, &factory(log.clone())).unwrap(); // pause
        assert!(panel.remove("f1").unwrap());

        assert_eq!(panel.value("f1"), None);
        assert_eq!(panel.recorder_state("f1"), RecorderState::Inactive);
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn remove_paused_declined_changes_nothing() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel_declining();
        let device = ScriptedDevice::new(&[b"c1"]);

        panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        panel.toggle("f1", &device, &factory(log.clone())).unwrap(); // pause
        assert!(!panel.remove("f1").unwrap());

        assert!(panel.value("f1").is_some());
        assert_eq!(panel.recorder_state("f1"), RecorderState::Paused);
        assert_eq!(log.lock().unwrap().closes, 0);
    }

    #[test]
    fn remove_inactive_just_clears_the_value() {
        let mut panel = panel();
        panel.set_value("f1", "files/old.webm".to_string());
        assert!(panel.remove("f1").unwrap());
        assert_eq!(panel.value("f1"), None);
    }

    #[test]
    fn device_denied_leaves_the_field_inactive() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();

        let err = panel
            .toggle("f1", &ScriptedDevice::denied(), &factory(log.clone()))
            .unwrap_err();
        assert!(matches!(err, RecorderError::Device(_)));
        assert_eq!(panel.recorder_state("f1"), RecorderState::Inactive);
        assert_eq!(panel.value("f1"), None);

        // The failed start holds no guard; a later start succeeds.
        let device = ScriptedDevice::new(&[b"c1"]);
        let outcome = panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started);
    }

    #[test]
    fn open_failure_leaves_the_field_inactive() {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let mut panel = panel();
        let device = ScriptedDevice::new(&[b"c1"]);

        let log_for_link = log.clone();
        let failing = move || {
            Ok(Box::new(FakeLink {
                log: log_for_link.clone(),
                fail_open: true,
                fail_writes: 0,
            }) as Box<dyn StreamLink>)
        };
        let err = panel.toggle("f1", &device, &failing).unwrap_err();
        assert!(matches!(err, RecorderError::Link(LinkError::Remote { .. })));
        assert_eq!(panel.recorder_state("f1"), RecorderState::Inactive);
        assert_eq!(panel.value("f1"), None);

        let outcome = panel.toggle("f1", &device, &factory(log.clone())).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started);
    }

    #[test]
    fn stop_on_an_idle_field_is_a_no_op() {
        let mut panel = panel();
        panel.stop("f1").unwrap();
        assert_eq!(panel.recorder_state("f1"), RecorderState::Inactive);
    }
}
