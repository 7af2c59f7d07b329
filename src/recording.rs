//! Recording session: one in-flight recitation attempt, from microphone
//! acquisition through the single upload+evaluate request.

use serde::Serialize;
use uuid::Uuid;

use crate::audio::MicCapture;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Idle,
    Recording,
    Uploading,
    Succeeded,
    Failed,
}

/// Acquires recorder resources. The production implementation opens the
/// default microphone at the fixed 16 kHz mono preset.
pub trait Recorder: Send {
    fn start(&self) -> Result<Box<dyn RecorderHandle>, EngineError>;
}

/// One live recorder resource; consumed by `stop`, which releases the
/// device and yields the captured samples.
pub trait RecorderHandle: Send {
    fn stop(self: Box<Self>) -> Vec<f32>;
}

pub struct MicRecorder;

impl Recorder for MicRecorder {
    fn start(&self) -> Result<Box<dyn RecorderHandle>, EngineError> {
        let capture = MicCapture::start().map_err(EngineError::RecordingStart)?;
        Ok(Box::new(MicHandle {
            capture: Some(capture),
        }))
    }
}

struct MicHandle {
    capture: Option<MicCapture>,
}

impl RecorderHandle for MicHandle {
    fn stop(mut self: Box<Self>) -> Vec<f32> {
        self.capture.take().map(MicCapture::stop).unwrap_or_default()
    }
}

pub struct RecordingSession {
    status: RecordingStatus,
    handle: Option<Box<dyn RecorderHandle>>,
    /// Verse the active attempt was started on. The eventual evaluation
    /// targets this verse even if navigation moves on mid-recording.
    verse_id: Option<String>,
    attempt_id: Option<Uuid>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            status: RecordingStatus::Idle,
            handle: None,
            verse_id: None,
            attempt_id: None,
        }
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    /// Start a new attempt for `verse_id`. Calling while already recording
    /// is absorbed as a no-op (exactly one live recorder handle either
    /// way); starting while the previous upload is still in flight is
    /// rejected. Succeeded/Failed are ready states: a new attempt may
    /// start from them.
    pub fn start(&mut self, recorder: &dyn Recorder, verse_id: &str) -> Result<(), EngineError> {
        match self.status {
            RecordingStatus::Recording => Ok(()),
            RecordingStatus::Uploading => Err(EngineError::RecordingStart(
                "previous attempt is still uploading".to_string(),
            )),
            _ => {
                let handle = recorder.start()?;
                let attempt_id = Uuid::new_v4();
                tracing::info!(%attempt_id, verse_id, "recording started");
                self.handle = Some(handle);
                self.verse_id = Some(verse_id.to_string());
                self.attempt_id = Some(attempt_id);
                self.status = RecordingStatus::Recording;
                Ok(())
            }
        }
    }

    /// Stop the active attempt. Releases the recorder and yields the
    /// captured samples plus the verse the attempt was started on; the
    /// session moves to Uploading and the caller issues exactly one
    /// evaluate request. Returns `None` when nothing is recording.
    pub fn stop(&mut self) -> Option<(Vec<f32>, String)> {
        if self.status != RecordingStatus::Recording {
            return None;
        }
        let handle = self.handle.take()?;
        let samples = handle.stop();
        let verse_id = self.verse_id.clone().unwrap_or_default();
        if let Some(attempt_id) = self.attempt_id {
            tracing::info!(%attempt_id, %verse_id, samples = samples.len(), "recording stopped, uploading");
        }
        self.status = RecordingStatus::Uploading;
        Some((samples, verse_id))
    }

    /// Outcome of the upload issued after `stop`.
    pub fn finish_upload(&mut self, success: bool) {
        if self.status != RecordingStatus::Uploading {
            return;
        }
        self.status = if success {
            RecordingStatus::Succeeded
        } else {
            RecordingStatus::Failed
        };
        self.verse_id = None;
        self.attempt_id = None;
    }

    /// Drop any live recorder and reset. Used at engine teardown; a plain
    /// navigation does not abort a recording in progress.
    pub fn release(&mut self) {
        self.handle = None;
        self.verse_id = None;
        self.attempt_id = None;
        self.status = RecordingStatus::Idle;
    }

    #[cfg(test)]
    pub(crate) fn has_live_handle(&self) -> bool {
        self.handle.is_some()
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}
