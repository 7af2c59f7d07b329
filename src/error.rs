use std::fmt;

/// Error taxonomy for the engine. Each variant is scoped to the operation
/// that produced it and leaves the owning session in a well-defined idle
/// state; none is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Chapter or verse list failed to load. Retried implicitly on the next
    /// navigation; surfaced as inline text, never an alert.
    DataFetch(String),
    /// Reference audio could not be downloaded or decoded.
    PlaybackLoad(String),
    /// Microphone permission or hardware failure while starting a recording.
    RecordingStart(String),
    /// Network or server failure during the upload+evaluate round-trip.
    /// No automatic retry; the user retries by recording again.
    EvaluationUpload(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::DataFetch(msg) => write!(f, "Data fetch failed: {msg}"),
            EngineError::PlaybackLoad(msg) => write!(f, "Audio load failed: {msg}"),
            EngineError::RecordingStart(msg) => write!(f, "Recording failed to start: {msg}"),
            EngineError::EvaluationUpload(msg) => write!(f, "Evaluation upload failed: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
