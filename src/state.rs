//! Everything the window shows, and the only place background results land.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use eframe::egui::{ColorImage, TextureHandle};
use tracing::debug;

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::logging::{LogLevel, LogLine};
use crate::model::{DownloadKind, DownloadRequest, StreamOption, WorkerEvent};

/// URLs this short are still being typed
const MIN_URL_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing resolved yet
    Idle,
    Fetching,
    /// Streams resolved, Download enabled
    Ready,
    Downloading,
}

/// Modal message shown after a download ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

/// A fetch the UI should start now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub fetch_id: u64,
    pub url: String,
    pub kind: DownloadKind,
}

pub struct AppState {
    pub kind: DownloadKind,
    pub url: String,
    pub download_dir: String,
    pub streams: Vec<StreamOption>,
    /// Index into `streams`
    pub selected: Option<usize>,
    pub title: Option<String>,
    pub phase: Phase,
    pub progress: f32,
    /// `(index, total)` while a playlist runs
    pub item: Option<(usize, usize)>,
    pub status: Option<String>,
    pub log: VecDeque<LogLine>,
    pub notice: Option<Notice>,
    /// Folder offered by "Open Folder" after a success
    pub finished_dir: Option<PathBuf>,
    pub thumbnail: Option<TextureHandle>,
    pending_thumbnail: Option<ColorImage>,
    max_log_lines: usize,
    fetch_id: u64,
    url_edited_at: Option<Instant>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Self {
        let mut state = Self {
            kind: settings.default_kind,
            url: String::new(),
            download_dir: settings.download_dir.display().to_string(),
            streams: Vec::new(),
            selected: None,
            title: None,
            phase: Phase::Idle,
            progress: 0.0,
            item: None,
            status: None,
            log: VecDeque::new(),
            notice: None,
            finished_dir: None,
            thumbnail: None,
            pending_thumbnail: None,
            max_log_lines: settings.max_log_lines.max(1),
            fetch_id: 0,
            url_edited_at: None,
        };
        state.push_log(LogLevel::Info, "Welcome! Please select a download type and enter a URL.");
        state
    }

    pub fn push_log(&mut self, level: LogLevel, text: impl Into<String>) {
        self.push_line(LogLine::new(level, text));
    }

    fn push_line(&mut self, line: LogLine) {
        self.log.push_back(line);
        while self.log.len() > self.max_log_lines {
            self.log.pop_front();
        }
    }

    pub fn selected_stream(&self) -> Option<&StreamOption> {
        self.selected.and_then(|i| self.streams.get(i))
    }

    pub fn can_download(&self) -> bool {
        self.phase == Phase::Ready && self.selected_stream().is_some()
    }

    /// Resets the quality menu, preview and progress.
    pub fn clear_fields(&mut self) {
        self.streams.clear();
        self.selected = None;
        self.title = None;
        self.thumbnail = None;
        self.pending_thumbnail = None;
        if self.phase != Phase::Downloading {
            self.phase = Phase::Idle;
            self.progress = 0.0;
            self.item = None;
            self.status = None;
        }
    }

    pub fn set_kind(&mut self, kind: DownloadKind) {
        if kind == self.kind {
            return;
        }
        self.kind = kind;
        // Results of a fetch for the old kind are now meaningless.
        self.fetch_id += 1;
        self.clear_fields();
        self.push_log(LogLevel::Info, format!("Switched to '{kind}' download type."));
        if self.url.trim().len() > MIN_URL_LEN {
            self.url_edited_at = Some(Instant::now());
        }
    }

    /// Called whenever the URL field changes; the fetch itself is debounced.
    pub fn on_url_edited(&mut self, now: Instant) {
        self.fetch_id += 1;
        // Streams fetched for the previous URL must not pair with the new one.
        self.clear_fields();
        self.url_edited_at = (self.url.trim().len() > MIN_URL_LEN).then_some(now);
    }

    /// Returns the fetch to start once the URL has been quiet for `debounce`.
    /// Deferred while a download runs.
    pub fn due_fetch(&mut self, now: Instant, debounce: Duration) -> Option<FetchJob> {
        let edited = self.url_edited_at?;
        if self.phase == Phase::Downloading || now.duration_since(edited) < debounce {
            return None;
        }
        self.url_edited_at = None;
        self.fetch_id += 1;
        self.clear_fields();
        self.phase = Phase::Fetching;
        self.push_log(LogLevel::Info, "URL detected. Starting to fetch details...");
        Some(FetchJob {
            fetch_id: self.fetch_id,
            url: self.url.trim().to_owned(),
            kind: self.kind,
        })
    }

    /// Freezes the form into a request and enters `Downloading`.
    pub fn begin_download(&mut self) -> AppResult<DownloadRequest> {
        match self.phase {
            Phase::Downloading => return Err(AppError::Busy),
            Phase::Ready => {}
            Phase::Idle | Phase::Fetching => {
                return Err(AppError::NoCompatibleStream("streams have not been fetched yet".into()));
            }
        }
        let selected = self
            .selected_stream()
            .cloned()
            .ok_or_else(|| AppError::NoCompatibleStream("no quality selected".into()))?;

        self.phase = Phase::Downloading;
        self.progress = 0.0;
        self.item = None;
        self.status = None;
        self.finished_dir = None;
        self.push_log(LogLevel::Info, "Download button clicked. Starting download process...");
        Ok(DownloadRequest {
            url: self.url.trim().to_owned(),
            kind: self.kind,
            selected_quality: Some(selected),
        })
    }

    /// Takes a decoded thumbnail that still has to become a texture.
    pub fn take_pending_thumbnail(&mut self) -> Option<ColorImage> {
        self.pending_thumbnail.take()
    }

    /// Applies one event from a background task.
    pub fn apply(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Log(line) => self.push_line(line),
            WorkerEvent::Progress(progress) => {
                if self.phase != Phase::Downloading {
                    return;
                }
                let fraction = progress.fraction();
                if fraction > self.progress {
                    self.progress = fraction;
                }
                if progress.message.is_some() {
                    self.status = progress.message;
                }
            }
            WorkerEvent::ItemStarted { index, total, title } => {
                self.progress = 0.0;
                self.item = Some((index, total));
                self.status = Some(title);
            }
            WorkerEvent::StreamsResolved { fetch_id, info } => {
                if fetch_id != self.fetch_id {
                    debug!("Dropping stale fetch result {fetch_id}");
                    return;
                }
                self.selected = (!info.streams.is_empty()).then_some(0);
                self.streams = info.streams;
                self.title = Some(info.title);
                self.phase = Phase::Ready;
                self.push_log(
                    LogLevel::Info,
                    "Ready to download. Please select a quality and click 'Download'.",
                );
            }
            WorkerEvent::FetchFailed { fetch_id, error } => {
                if fetch_id != self.fetch_id {
                    debug!("Dropping stale fetch failure {fetch_id}: {error}");
                    return;
                }
                self.clear_fields();
            }
            WorkerEvent::Thumbnail { fetch_id, image } => {
                if fetch_id == self.fetch_id {
                    self.pending_thumbnail = Some(image.0);
                }
            }
            WorkerEvent::DownloadFinished(result) => {
                self.phase = if self.streams.is_empty() { Phase::Idle } else { Phase::Ready };
                self.item = None;
                match result {
                    Ok(summary) => {
                        self.progress = 1.0;
                        self.finished_dir = summary
                            .files
                            .first()
                            .and_then(|f| f.parent())
                            .map(PathBuf::from)
                            .or_else(|| Some(PathBuf::from(&self.download_dir)));
                        let text = match summary.failed {
                            0 => format!("'{}' has been downloaded successfully!", summary.title),
                            n => format!(
                                "'{}' finished: {} downloaded, {n} failed.",
                                summary.title,
                                summary.files.len()
                            ),
                        };
                        self.notice = Some(Notice::Success(text));
                    }
                    Err(e) => {
                        self.progress = 0.0;
                        self.notice = Some(Notice::Error(format!("An error occurred: {e}")));
                    }
                }
            }
        }
    }
}
