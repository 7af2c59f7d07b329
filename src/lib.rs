//! Recitation synchronization engine.
//!
//! Keeps three independently timed activities consistent for a recitation
//! practice session: reference-audio playback with live word highlighting,
//! the record→upload→evaluate lifecycle of the user's own attempt, and
//! user-driven navigation across chapters and verses. The presentation
//! layer consumes one immutable [`engine::EngineSnapshot`] per state
//! transition and issues operations through an [`engine::EngineHandle`];
//! everything else (staleness checks, resource release, auto-advance) is
//! internal.

pub mod api;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod overlay;
pub mod playback;
pub mod player;
pub mod recording;
pub mod segments;

pub use api::{Ayah, Evaluation, QuranClient, Surah};
pub use config::{EngineConfig, load_engine_config, save_engine_config};
pub use engine::{Effect, EngineEvent, EngineHandle, EngineSnapshot, RecitationEngine};
pub use error::EngineError;
pub use navigation::{NavCommand, NavigationPosition, NavigationState};
pub use overlay::ScoreTier;
pub use playback::{PlaybackSession, PlaybackStatus};
pub use recording::{RecordingSession, RecordingStatus};

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
