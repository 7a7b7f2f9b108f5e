use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::DownloadKind;

/// Environment variable that overrides the yt-dlp binary location
pub const YTDLP_ENV: &str = "TUBEFETCH_YTDLP";

const SETTINGS_FILE: &str = "settings.json";

/// Startup settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder pre-filled in the destination field
    pub download_dir: PathBuf,
    /// yt-dlp executable, a bare name is looked up on PATH
    pub ytdlp_path: PathBuf,
    /// Download type selected when the window opens
    pub default_kind: DownloadKind,
    /// How often the UI drains the worker channel
    pub poll_interval_ms: u64,
    /// Quiet period after the last URL edit before streams are fetched
    pub fetch_debounce_ms: u64,
    /// Oldest log lines are dropped past this count
    pub max_log_lines: usize,
    pub dark_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let bin = if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" };
        Self {
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from("./downloads")),
            ytdlp_path: PathBuf::from(bin),
            default_kind: DownloadKind::Video,
            poll_interval_ms: 100,
            fetch_debounce_ms: 600,
            max_log_lines: 2000,
            dark_mode: true,
        }
    }
}

impl Settings {
    /// `<config_dir>/tubefetch/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tubefetch").join(SETTINGS_FILE))
    }

    /// Loads settings from the platform config dir and applies env overrides.
    ///
    /// Never fails: a missing file is normal, a broken one is logged and ignored.
    pub fn load() -> Self {
        let mut settings = match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        if let Some(bin) = std::env::var_os(YTDLP_ENV) {
            settings.ytdlp_path = PathBuf::from(bin);
        }
        settings
    }

    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Could not read settings file {}: {e}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring malformed settings file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn fetch_debounce(&self) -> Duration {
        Duration::from_millis(self.fetch_debounce_ms)
    }
}
