use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::game::searcher::Difficulty;

/// Environment variable naming a JSON settings file.
pub const SETTINGS_ENV: &str = "TRIS_SETTINGS";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub thinking_delay_ms: u64,
    pub difficulty: Difficulty,
    pub player_names: [String; 2],
    pub display_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thinking_delay_ms: 600,
            difficulty: Difficulty::Medium,
            player_names: ["Player X".to_owned(), "Player O".to_owned()],
            display_name: "Player".to_owned(),
        }
    }
}

impl Settings {
    /// Reads the file named by `TRIS_SETTINGS`, or the defaults when unset.
    pub fn load() -> Result<Self, SettingsError> {
        match std::env::var_os(SETTINGS_ENV) {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn thinking_delay(&self) -> Duration {
        Duration::from_millis(self.thinking_delay_ms)
    }
}
