//! Engine configuration persisted as JSON in the platform config dir.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};

/// Config directory using the platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/muraajaa/`
/// - Linux: `~/.config/muraajaa/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/muraajaa/`
///
/// Falls back to `~/.muraajaa/` if the platform dir is unavailable.
pub(crate) fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("muraajaa"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".muraajaa")
        })
}

/// Engine configuration with serde defaults, so a partial or missing file
/// still yields a usable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// GraphQL endpoint of the verse/chapter data collaborator.
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    /// Prefix the zero-padded audio source key and `.mp3` extension are
    /// appended to verbatim, including any trailing separator or reciter
    /// filename prefix.
    #[serde(default = "default_audio_base_url")]
    pub audio_base_url: String,
    /// Pre-roll before a word's segment during which it already highlights.
    #[serde(default = "default_highlight_lead_ms")]
    pub highlight_lead_ms: u64,
}

fn default_graphql_url() -> String {
    "https://be.ilearnquran.org/graphql".to_string()
}

fn default_audio_base_url() -> String {
    "https://be.ilearnquran.org/media/audio/quran/Husary_64kbps_".to_string()
}

fn default_highlight_lead_ms() -> u64 {
    crate::segments::DEFAULT_LEAD_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            audio_base_url: default_audio_base_url(),
            highlight_lead_ms: default_highlight_lead_ms(),
        }
    }
}

const ENGINE_CONFIG_FILE: &str = "engine-config.json";

pub fn load_engine_config() -> EngineConfig {
    load_json_config_from(&config_dir(), ENGINE_CONFIG_FILE)
}

pub fn save_engine_config(config: &EngineConfig) -> Result<(), String> {
    save_json_config_to(&config_dir(), ENGINE_CONFIG_FILE, config)
}

/// Load a JSON config file, falling back to defaults when the file is
/// missing, unreadable, or corrupt. A bad config never blocks startup.
fn load_json_config_from<T: DeserializeOwned + Default>(dir: &Path, filename: &str) -> T {
    let path = dir.join(filename);
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("could not read config {}: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("corrupt config {}: {e}, using defaults", path.display());
            T::default()
        }
    }
}

/// Save a JSON config file atomically (temp file + rename).
fn save_json_config_to<T: Serialize>(dir: &Path, filename: &str, config: &T) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create config directory: {e}"))?;

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {e}"))?;

    let target = dir.join(filename);
    let temp = dir.join(format!("{}.tmp.{}", filename, std::process::id()));

    std::fs::write(&temp, &json).map_err(|e| format!("Failed to write temp config: {e}"))?;

    // Atomic rename: either the old file or the new file exists, never a partial one
    std::fs::rename(&temp, &target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        format!("Failed to commit config: {e}")
    })
}
