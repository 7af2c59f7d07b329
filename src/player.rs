//! Audio output behind a trait seam, so the playback state machine can be
//! exercised without a sound device. The production backend is rodio.

use std::io::Cursor;
use std::time::Duration;

use rodio::{Decoder, OutputStream, Sink};

use crate::error::EngineError;

/// One live playback resource. Exactly one exists per navigation position;
/// dropping the handle releases the underlying output device.
pub trait AudioHandle: Send {
    fn pause(&mut self);
    fn resume(&mut self);
    /// Rewind to the beginning and keep playing (used to replay a finished verse).
    fn seek_to_start(&mut self);
    fn position_ms(&self) -> u64;
    fn is_finished(&self) -> bool;
}

/// Opens playback handles from encoded audio bytes. Playback starts
/// immediately on open.
pub trait AudioBackend: Send {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn AudioHandle>, EngineError>;
}

pub struct RodioBackend;

struct RodioHandle {
    // The stream must outlive the sink or output goes silent.
    _stream: OutputStream,
    sink: Sink,
    /// Original encoded bytes, kept so a finished sink can be replayed by
    /// re-appending a fresh decoder (a drained sink cannot seek).
    bytes: Vec<u8>,
}

// Safety: the handle lives inside the engine state behind a Mutex and is
// dropped in place. rodio's OutputStream is !Send on some platforms due to
// internal raw pointers, but it is never moved across threads once built.
unsafe impl Send for RodioHandle {}

impl AudioBackend for RodioBackend {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn AudioHandle>, EngineError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| EngineError::PlaybackLoad(format!("no audio output device: {e}")))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| EngineError::PlaybackLoad(format!("failed to open sink: {e}")))?;
        let source = Decoder::new(Cursor::new(bytes.clone()))
            .map_err(|e| EngineError::PlaybackLoad(format!("failed to decode audio: {e}")))?;
        sink.append(source);
        sink.play();
        Ok(Box::new(RodioHandle {
            _stream: stream,
            sink,
            bytes,
        }))
    }
}

impl AudioHandle for RodioHandle {
    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.sink.play();
    }

    fn seek_to_start(&mut self) {
        if self.sink.empty() {
            // The source was fully consumed; decode it again.
            if let Ok(source) = Decoder::new(Cursor::new(self.bytes.clone())) {
                self.sink.append(source);
            }
        } else if let Err(e) = self.sink.try_seek(Duration::ZERO) {
            tracing::warn!("seek to start failed: {e}");
        }
        self.sink.play();
    }

    fn position_ms(&self) -> u64 {
        self.sink.get_pos().as_millis() as u64
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }
}
