use std::fmt;
use std::path::PathBuf;

use eframe::egui::ColorImage;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::logging::LogLine;

/// What the user wants out of a URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    /// Single video, muxed audio and video
    #[default]
    Video,
    /// Audio track only
    Audio,
    /// Every video of a playlist
    Playlist,
}

impl DownloadKind {
    pub const ALL: [DownloadKind; 3] = [DownloadKind::Video, DownloadKind::Audio, DownloadKind::Playlist];

    /// Label used on the radio buttons
    pub fn label(self) -> &'static str {
        match self {
            DownloadKind::Video => "Single Video",
            DownloadKind::Audio => "Audio Only",
            DownloadKind::Playlist => "Playlist",
        }
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadKind::Video => "Video",
            DownloadKind::Audio => "Audio",
            DownloadKind::Playlist => "Playlist",
        };
        f.write_str(name)
    }
}

/// One resolution or bitrate variant offered for a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOption {
    /// Human-readable text shown in the quality menu
    pub label: String,
    /// Backend format id
    pub identifier: String,
}

/// Frozen copy of the form taken when Download is clicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: DownloadKind,
    pub selected_quality: Option<StreamOption>,
}

/// Bytes transferred so far for the item being downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(bytes_done: u64, bytes_total: u64) -> Self {
        Self {
            bytes_done,
            bytes_total,
            message: None,
        }
    }

    /// Completed fraction in `[0, 1]`; zero while the total is unknown.
    pub fn fraction(&self) -> f32 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64).clamp(0.0, 1.0) as f32
    }
}

/// Result of resolving a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub streams: Vec<StreamOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

/// Which stream the backend should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatChoice {
    /// A format id taken from a `StreamOption`
    Exact(String),
    /// Highest-resolution progressive MP4
    BestVideo,
}

/// What a finished download produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub title: String,
    pub files: Vec<PathBuf>,
    pub failed: usize,
}

/// Decoded preview image, waiting to be uploaded as a texture
pub struct ThumbnailImage(pub ColorImage);

impl fmt::Debug for ThumbnailImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThumbnailImage({}x{})", self.0.size[0], self.0.size[1])
    }
}

/// Messages from background tasks to the UI thread
#[derive(Debug)]
pub enum WorkerEvent {
    Log(LogLine),
    Progress(ProgressEvent),
    /// A new playlist entry starts; progress restarts from zero
    ItemStarted { index: usize, total: usize, title: String },
    StreamsResolved { fetch_id: u64, info: MediaInfo },
    FetchFailed { fetch_id: u64, error: AppError },
    Thumbnail { fetch_id: u64, image: ThumbnailImage },
    DownloadFinished(Result<DownloadSummary, AppError>),
}
