//! Seam between the application and the component that actually talks to YouTube.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use crate::error::{AppError, AppResult};
use crate::model::{DownloadKind, FormatChoice, MediaInfo, Playlist};
use crate::worker::Reporter;

/// External download component.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Resolves title and stream options of a single video.
    ///
    /// Streams come back best first with unique identifiers; `Playlist` is
    /// treated like `Video`.
    async fn fetch_info(&self, url: &str, kind: DownloadKind) -> AppResult<MediaInfo>;

    /// Lists the entries of a playlist without resolving their streams.
    async fn playlist(&self, url: &str) -> AppResult<Playlist>;

    /// Downloads one video into `dir`, reporting progress as bytes arrive.
    /// Returns the path of the written file.
    async fn download(&self, url: &str, format: &FormatChoice, dir: &Path, reporter: &Reporter) -> AppResult<PathBuf>;
}

/// Cheap local check before the backend gets involved.
pub fn validate_url(raw: &str) -> AppResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidUrl("URL is empty".into()));
    }
    let url = Url::parse(trimmed)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::InvalidUrl(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::InvalidUrl(format!("'{trimmed}' has no host")));
    }
    Ok(url)
}
