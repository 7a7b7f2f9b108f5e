use std::io;

use thiserror::Error;

/// Every failure the downloader can surface to the user.
///
/// Cloneable so it can travel inside a `WorkerEvent` to the UI thread.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Video not found or unavailable: {0}")]
    NotFound(String),

    #[error("No compatible stream: {0}")]
    NoCompatibleStream(String),

    #[error("Playlist is empty or private: {0}")]
    EmptyOrPrivatePlaylist(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Downloader backend error: {0}")]
    Backend(String),

    #[error("A download is already running")]
    Busy,
}

impl AppError {
    /// Whether trying the same action again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::Busy)
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Filesystem(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Backend(format!("unexpected yt-dlp output: {err}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;
