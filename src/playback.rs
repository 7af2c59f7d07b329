//! Playback session: one audio handle for the currently selected verse and
//! the live position-to-word mapping driven by progress ticks.

use serde::Serialize;

use crate::player::AudioHandle;
use crate::segments::{self, WordSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Finished,
}

/// What the caller must do after a `toggle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Handled internally (pause/resume/replay, or a load already underway).
    Handled,
    /// Nothing is loaded; the caller should fetch the audio and attach it.
    NeedsLoad,
}

pub struct PlaybackSession {
    status: PlaybackStatus,
    handle: Option<Box<dyn AudioHandle>>,
    position_ms: u64,
    current_word: Option<usize>,
    segments: Vec<WordSegment>,
    lead_ms: u64,
}

impl PlaybackSession {
    pub fn new(lead_ms: u64) -> Self {
        Self {
            status: PlaybackStatus::Idle,
            handle: None,
            position_ms: 0,
            current_word: None,
            segments: Vec::new(),
            lead_ms,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn current_word(&self) -> Option<usize> {
        self.current_word
    }

    pub fn handle(&self) -> Option<&dyn AudioHandle> {
        self.handle.as_deref()
    }

    /// Bind the word timing of the verse this session plays. An empty list
    /// means no timing (no highlight). Does not touch the handle; releasing
    /// is the navigation reset's job.
    pub fn bind_segments(&mut self, segments: Vec<WordSegment>) {
        self.segments = segments;
        self.current_word = None;
    }

    /// Mark a load underway. The previous handle is released first, so at
    /// most one live handle exists even across rapid repeated navigation;
    /// whether a completed load still applies is the orchestrator's epoch
    /// check, not this session's concern.
    pub fn begin_load(&mut self) {
        self.handle = None;
        self.position_ms = 0;
        self.current_word = None;
        self.status = PlaybackStatus::Loading;
    }

    /// Attach a freshly opened handle and start playing.
    pub fn attach(&mut self, handle: Box<dyn AudioHandle>) {
        self.handle = Some(handle);
        self.position_ms = 0;
        self.current_word = None;
        self.status = PlaybackStatus::Playing;
    }

    /// A load underway failed; back to Idle with no handle.
    pub fn load_failed(&mut self) {
        self.release();
    }

    pub fn toggle(&mut self) -> ToggleOutcome {
        match self.status {
            PlaybackStatus::Playing => {
                if let Some(handle) = self.handle.as_mut() {
                    handle.pause();
                }
                self.status = PlaybackStatus::Paused;
                ToggleOutcome::Handled
            }
            PlaybackStatus::Paused => {
                if let Some(handle) = self.handle.as_mut() {
                    handle.resume();
                }
                self.status = PlaybackStatus::Playing;
                ToggleOutcome::Handled
            }
            PlaybackStatus::Finished => match self.handle.as_mut() {
                Some(handle) => {
                    handle.seek_to_start();
                    self.position_ms = 0;
                    self.current_word = None;
                    self.status = PlaybackStatus::Playing;
                    ToggleOutcome::Handled
                }
                None => ToggleOutcome::NeedsLoad,
            },
            PlaybackStatus::Idle => ToggleOutcome::NeedsLoad,
            PlaybackStatus::Loading => ToggleOutcome::Handled,
        }
    }

    /// Progress notification from the live handle. Ignored unless playing.
    pub fn tick(&mut self, position_ms: u64) {
        if self.status != PlaybackStatus::Playing {
            return;
        }
        self.position_ms = position_ms;
        self.current_word = segments::word_index_at(position_ms, &self.segments, self.lead_ms);
    }

    /// The source played to its end: no highlighted word, position rewound.
    /// The handle is kept so a subsequent toggle can replay without a refetch.
    pub fn finish(&mut self) {
        self.status = PlaybackStatus::Finished;
        self.position_ms = 0;
        self.current_word = None;
    }

    /// Release the audio handle and reset to Idle. Called on every exit
    /// path: navigation change, load failure, teardown.
    pub fn release(&mut self) {
        self.handle = None;
        self.status = PlaybackStatus::Idle;
        self.position_ms = 0;
        self.current_word = None;
    }

    #[cfg(test)]
    pub(crate) fn has_live_handle(&self) -> bool {
        self.handle.is_some()
    }
}
