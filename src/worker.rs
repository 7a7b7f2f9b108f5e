//! Background work: resolving stream options and running downloads.
//!
//! Nothing here touches UI state. Every outcome, log line and progress tick is
//! posted to the UI thread as a `WorkerEvent`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc::UnboundedSender};
use tracing::debug;

use crate::backend::{MediaBackend, validate_url};
use crate::error::{AppError, AppResult};
use crate::logging::{LogLevel, LogLine};
use crate::model::{
    DownloadKind, DownloadRequest, DownloadSummary, FormatChoice, MediaInfo, PlaylistEntry, ProgressEvent,
    StreamOption, ThumbnailImage, WorkerEvent,
};
use crate::thumbnail;

/// Sending half of the UI channel, with logging helpers.
#[derive(Clone)]
pub struct Reporter {
    tx: UnboundedSender<WorkerEvent>,
}

impl Reporter {
    pub fn new(tx: UnboundedSender<WorkerEvent>) -> Self {
        Self { tx }
    }

    /// Posts an event; a closed window just means nobody is listening anymore.
    pub fn send(&self, event: WorkerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.send(WorkerEvent::Log(LogLine::new(LogLevel::Info, text)));
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.send(WorkerEvent::Log(LogLine::new(LogLevel::Warn, text)));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.send(WorkerEvent::Log(LogLine::new(LogLevel::Error, text)));
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.send(WorkerEvent::Progress(event));
    }
}

/// Single permit that serializes downloads.
#[derive(Clone)]
pub struct DownloadSlot(Arc<Semaphore>);

impl Default for DownloadSlot {
    fn default() -> Self {
        Self(Arc::new(Semaphore::new(1)))
    }
}

impl DownloadSlot {
    /// Takes the slot, or `Busy` if another download holds it. Never waits.
    pub fn try_acquire(&self) -> AppResult<OwnedSemaphorePermit> {
        self.0.clone().try_acquire_owned().map_err(|_| AppError::Busy)
    }
}

/// Resolves the stream options for `url` and posts them as `StreamsResolved`
/// or `FetchFailed` tagged with `fetch_id`.
pub async fn fetch_streams(backend: Arc<dyn MediaBackend>, url: String, kind: DownloadKind, fetch_id: u64, reporter: Reporter) {
    match resolve_streams(backend.as_ref(), &url, kind, &reporter).await {
        Ok(info) => {
            if let Some(thumb_url) = info.thumbnail_url.clone() {
                let thumb_reporter = reporter.clone();
                tokio::task::spawn_blocking(move || {
                    if let Some(image) = thumbnail::fetch_thumbnail(&thumb_url) {
                        thumb_reporter.send(WorkerEvent::Thumbnail {
                            fetch_id,
                            image: ThumbnailImage(image),
                        });
                    }
                });
            }
            reporter.send(WorkerEvent::StreamsResolved { fetch_id, info });
        }
        Err(error) => {
            match &error {
                AppError::EmptyOrPrivatePlaylist(_) => reporter.error("Error: This playlist is empty or private."),
                AppError::NoCompatibleStream(_) => {
                    reporter.error("Error: No compatible streams were found for this URL.")
                }
                AppError::InvalidUrl(reason) => reporter.error(format!("Error: Invalid URL ({reason}).")),
                _ => {
                    reporter.error(
                        "FATAL ERROR: Could not fetch details. Please check the URL and your internet connection.",
                    );
                    reporter.error(format!("--> {error}"));
                }
            }
            reporter.send(WorkerEvent::FetchFailed { fetch_id, error });
        }
    }
}

async fn resolve_streams(
    backend: &dyn MediaBackend,
    url: &str,
    kind: DownloadKind,
    reporter: &Reporter,
) -> AppResult<MediaInfo> {
    let url = validate_url(url)?;
    reporter.info(format!("Connecting to URL: {url}"));

    let info = match kind {
        DownloadKind::Video | DownloadKind::Audio => {
            let info = backend.fetch_info(url.as_str(), kind).await?;
            reporter.info(format!("Successfully connected. Video Title: {}", info.title));
            if kind == DownloadKind::Video {
                reporter.info("Fetching available video streams (progressive MP4)...");
            } else {
                reporter.info("Fetching available audio streams (MP4)...");
            }
            info
        }
        DownloadKind::Playlist => {
            let playlist = backend.playlist(url.as_str()).await?;
            reporter.info(format!("Successfully connected. Playlist Title: '{}'", playlist.title));
            reporter.info(format!("Found {} videos in the playlist.", playlist.entries.len()));
            let first = playlist
                .entries
                .first()
                .ok_or_else(|| AppError::EmptyOrPrivatePlaylist(playlist.title.clone()))?;
            reporter.info(format!("Fetching sample quality options from first video: '{}'", first.title));
            let sample = backend.fetch_info(&first.url, DownloadKind::Playlist).await?;
            MediaInfo {
                title: playlist.title,
                ..sample
            }
        }
    };

    if info.streams.is_empty() {
        return Err(AppError::NoCompatibleStream(info.title));
    }
    reporter.info(format!("Found {} quality options.", info.streams.len()));
    Ok(info)
}

/// Runs one download to completion and posts exactly one `DownloadFinished`.
pub async fn run_download(
    backend: Arc<dyn MediaBackend>,
    slot: DownloadSlot,
    request: DownloadRequest,
    dir: PathBuf,
    reporter: Reporter,
) {
    let result = match slot.try_acquire() {
        Ok(_permit) => download(backend.as_ref(), &request, &dir, &reporter).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        reporter.error("An error occurred during the download process.");
        reporter.error(format!("--> {e}"));
        if e.is_retryable() {
            reporter.info("This looks temporary. Try again in a moment.");
        }
    }
    reporter.send(WorkerEvent::DownloadFinished(result));
}

async fn download(
    backend: &dyn MediaBackend,
    request: &DownloadRequest,
    dir: &Path,
    reporter: &Reporter,
) -> AppResult<DownloadSummary> {
    let selected = request
        .selected_quality
        .as_ref()
        .ok_or_else(|| AppError::NoCompatibleStream("no quality selected".into()))?;
    validate_url(&request.url)?;
    tokio::fs::create_dir_all(dir).await?;
    reporter.info(format!("Files will be saved to: {}", dir.display()));

    match request.kind {
        DownloadKind::Video | DownloadKind::Audio => {
            download_single(backend, &request.url, request.kind, selected, dir, reporter).await
        }
        DownloadKind::Playlist => download_playlist(backend, &request.url, selected, dir, reporter).await,
    }
}

async fn download_single(
    backend: &dyn MediaBackend,
    url: &str,
    kind: DownloadKind,
    selected: &StreamOption,
    dir: &Path,
    reporter: &Reporter,
) -> AppResult<DownloadSummary> {
    let info = backend.fetch_info(url, kind).await?;
    if !info.streams.iter().any(|s| s.identifier == selected.identifier) {
        return Err(AppError::NoCompatibleStream(format!(
            "could not find the selected stream for '{}'",
            selected.label
        )));
    }

    reporter.info(format!("Starting download for: '{}'", info.title));
    let path = backend
        .download(url, &FormatChoice::Exact(selected.identifier.clone()), dir, reporter)
        .await?;
    report_complete(&path, reporter).await;
    reporter.info(format!("SUCCESS: Download complete for '{}'.", info.title));

    Ok(DownloadSummary {
        title: info.title,
        files: vec![path],
        failed: 0,
    })
}

async fn download_playlist(
    backend: &dyn MediaBackend,
    url: &str,
    selected: &StreamOption,
    dir: &Path,
    reporter: &Reporter,
) -> AppResult<DownloadSummary> {
    let playlist = backend.playlist(url).await?;
    if playlist.entries.is_empty() {
        return Err(AppError::EmptyOrPrivatePlaylist(playlist.title));
    }

    reporter.info(format!("--- Starting playlist download: '{}' ---", playlist.title));
    let total = playlist.entries.len();
    let mut files = Vec::with_capacity(total);
    let mut failed = 0;

    for (i, entry) in playlist.entries.iter().enumerate() {
        let index = i + 1;
        reporter.send(WorkerEvent::ItemStarted {
            index,
            total,
            title: entry.title.clone(),
        });
        reporter.info(format!("[{index}/{total}] Downloading: '{}'", entry.title));

        match download_entry(backend, entry, selected, dir, reporter, index, total).await {
            Ok(path) => {
                reporter.info(format!("[{index}/{total}] SUCCESS: Downloaded '{}'.", entry.title));
                files.push(path);
            }
            Err(e) => {
                reporter.error(format!("[{index}/{total}] ERROR: Could not download '{}'. Skipping.", entry.title));
                reporter.error(format!("--> {e}"));
                failed += 1;
            }
        }
    }

    reporter.info(format!(
        "--- Playlist download complete! {} downloaded, {failed} failed ---",
        files.len()
    ));
    Ok(DownloadSummary {
        title: playlist.title,
        files,
        failed,
    })
}

async fn download_entry(
    backend: &dyn MediaBackend,
    entry: &PlaylistEntry,
    selected: &StreamOption,
    dir: &Path,
    reporter: &Reporter,
    index: usize,
    total: usize,
) -> AppResult<PathBuf> {
    let info = backend.fetch_info(&entry.url, DownloadKind::Playlist).await?;
    let choice = if info.streams.iter().any(|s| s.identifier == selected.identifier) {
        FormatChoice::Exact(selected.identifier.clone())
    } else {
        reporter.warn(format!(
            "[{index}/{total}] WARNING: Quality '{}' not found for this video. Falling back to highest resolution.",
            selected.label
        ));
        FormatChoice::BestVideo
    };
    let path = backend.download(&entry.url, &choice, dir, reporter).await?;
    report_complete(&path, reporter).await;
    Ok(path)
}

/// Final progress tick so a successful item always ends at its full size.
/// Skipped when the file cannot be stat'ed; a zero tick would move progress back.
async fn report_complete(path: &Path, reporter: &Reporter) {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            debug!("Could not stat {}: {e}", path.display());
            return;
        }
    };
    reporter.progress(ProgressEvent {
        bytes_done: size,
        bytes_total: size,
        message: Some(format!("Saved {}", path.display())),
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;
    use crate::model::Playlist;

    /// In-memory backend that writes real files in chunks.
    #[derive(Default)]
    struct FakeBackend {
        pub videos: HashMap<String, MediaInfo>,
        pub playlists: HashMap<String, Playlist>,
        pub broken: Vec<String>,
        /// Report success without leaving a file behind
        pub unwritten: Vec<String>,
        pub calls: AtomicUsize,
        pub downloads: Mutex<Vec<(String, FormatChoice)>>,
    }

    impl FakeBackend {
        fn with_video(mut self, url: &str, title: &str, streams: &[(&str, &str)]) -> Self {
            let streams = streams
                .iter()
                .map(|(label, id)| StreamOption {
                    label: label.to_string(),
                    identifier: id.to_string(),
                })
                .collect();
            self.videos.insert(
                url.to_owned(),
                MediaInfo {
                    title: title.to_owned(),
                    thumbnail_url: None,
                    streams,
                },
            );
            self
        }

        fn with_playlist(mut self, url: &str, title: &str, entries: &[&str]) -> Self {
            let entries = entries
                .iter()
                .map(|u| PlaylistEntry {
                    url: u.to_string(),
                    title: format!("title of {u}"),
                })
                .collect();
            self.playlists.insert(
                url.to_owned(),
                Playlist {
                    title: title.to_owned(),
                    entries,
                },
            );
            self
        }
    }

    #[async_trait]
    impl MediaBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_info(&self, url: &str, _kind: DownloadKind) -> AppResult<MediaInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.videos
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::NotFound(url.to_owned()))
        }

        async fn playlist(&self, url: &str) -> AppResult<Playlist> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.playlists
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::Network(format!("cannot reach {url}")))
        }

        async fn download(&self, url: &str, format: &FormatChoice, dir: &Path, reporter: &Reporter) -> AppResult<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.downloads.lock().unwrap().push((url.to_owned(), format.clone()));
            if self.broken.iter().any(|b| b == url) {
                return Err(AppError::Network("connection reset".into()));
            }
            let title = self.videos.get(url).map(|v| v.title.clone()).unwrap_or_default();
            let payload = vec![7u8; 4000];
            for done in (0..=payload.len()).step_by(1000) {
                reporter.progress(ProgressEvent::new(done as u64, payload.len() as u64));
            }
            let path = dir.join(format!("{title}.mp4"));
            if !self.unwritten.iter().any(|u| u == url) {
                tokio::fs::write(&path, &payload).await?;
            }
            Ok(path)
        }
    }

    fn channel() -> (Reporter, UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = unbounded_channel();
        (Reporter::new(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn log_texts(events: &[WorkerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Log(line) => Some(line.text.clone()),
                _ => None,
            })
            .collect()
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    const WATCH: &str = "https://youtube.com/watch?v=X";

    fn sample_backend() -> Arc<FakeBackend> {
        Arc::new(FakeBackend::default().with_video(WATCH, "Clip", &[("720p", "22"), ("480p", "18")]))
    }

    #[tokio::test]
    async fn fetch_then_download_writes_exactly_one_file() {
        let backend = sample_backend();
        let (reporter, mut rx) = channel();
        fetch_streams(backend.clone(), WATCH.into(), DownloadKind::Video, 1, reporter).await;

        let events = drain(&mut rx);
        let info = events
            .iter()
            .find_map(|e| match e {
                WorkerEvent::StreamsResolved { fetch_id: 1, info } => Some(info.clone()),
                _ => None,
            })
            .expect("streams resolved");
        let labels: Vec<_> = info.streams.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["720p", "480p"]);

        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = channel();
        let request = DownloadRequest {
            url: WATCH.into(),
            kind: DownloadKind::Video,
            selected_quality: Some(info.streams[0].clone()),
        };
        run_download(backend.clone(), DownloadSlot::default(), request, dir.path().to_path_buf(), reporter).await;

        let events = drain(&mut rx);
        assert_eq!(files_in(dir.path()), 1);
        assert_eq!(
            backend.downloads.lock().unwrap().as_slice(),
            [(WATCH.to_owned(), FormatChoice::Exact("22".into()))]
        );

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0].bytes_done <= w[1].bytes_done));
        let last = progress.last().unwrap();
        assert_eq!(last.bytes_done, last.bytes_total);
        assert_eq!(last.bytes_total, 4000);

        let logs = log_texts(&events);
        assert!(logs.last().unwrap().starts_with("SUCCESS"));
        match events.last() {
            Some(WorkerEvent::DownloadFinished(Ok(summary))) => {
                assert_eq!(summary.files.len(), 1);
                assert_eq!(summary.title, "Clip");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_url_never_reaches_the_backend() {
        let backend = sample_backend();
        let (reporter, mut rx) = channel();
        fetch_streams(backend.clone(), "youtube dot com".into(), DownloadKind::Video, 7, reporter).await;

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::FetchFailed {
                fetch_id: 7,
                error: AppError::InvalidUrl(_)
            })
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_playlist_reports_network_failure() {
        let backend = sample_backend();
        let (reporter, mut rx) = channel();
        fetch_streams(backend, "https://youtube.com/playlist?list=gone".into(), DownloadKind::Playlist, 2, reporter).await;
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::FetchFailed {
                error: AppError::Network(_),
                ..
            })
        ));
        assert!(log_texts(&events).iter().any(|l| l.starts_with("FATAL ERROR")));
    }

    #[tokio::test]
    async fn video_without_streams_is_no_compatible_stream() {
        let backend = Arc::new(FakeBackend::default().with_video(WATCH, "Live", &[]));
        let (reporter, mut rx) = channel();
        fetch_streams(backend, WATCH.into(), DownloadKind::Video, 3, reporter).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(WorkerEvent::FetchFailed {
                error: AppError::NoCompatibleStream(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn empty_playlist_fails_and_writes_nothing() {
        let list = "https://youtube.com/playlist?list=empty";
        let backend = Arc::new(FakeBackend::default().with_playlist(list, "Nothing", &[]));

        let (reporter, mut rx) = channel();
        fetch_streams(backend.clone(), list.into(), DownloadKind::Playlist, 4, reporter).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(WorkerEvent::FetchFailed {
                error: AppError::EmptyOrPrivatePlaylist(_),
                ..
            })
        ));

        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = channel();
        let request = DownloadRequest {
            url: list.into(),
            kind: DownloadKind::Playlist,
            selected_quality: Some(StreamOption {
                label: "720p - video/mp4".into(),
                identifier: "22".into(),
            }),
        };
        run_download(backend, DownloadSlot::default(), request, dir.path().to_path_buf(), reporter).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(WorkerEvent::DownloadFinished(Err(AppError::EmptyOrPrivatePlaylist(_))))
        ));
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn playlist_falls_back_and_skips_broken_entries() {
        let list = "https://youtube.com/playlist?list=mix";
        let (a, b, c) = ("https://y.t/a", "https://y.t/b", "https://y.t/c");
        let mut fake = FakeBackend::default()
            .with_video(a, "A", &[("720p - video/mp4", "22")])
            .with_video(b, "B", &[("360p - video/mp4", "18")])
            .with_video(c, "C", &[("720p - video/mp4", "22")])
            .with_playlist(list, "Mix", &[a, b, c]);
        fake.broken.push(c.to_owned());
        let backend = Arc::new(fake);

        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = channel();
        let request = DownloadRequest {
            url: list.into(),
            kind: DownloadKind::Playlist,
            selected_quality: Some(StreamOption {
                label: "720p - video/mp4".into(),
                identifier: "22".into(),
            }),
        };
        run_download(backend.clone(), DownloadSlot::default(), request, dir.path().join("out"), reporter).await;

        let events = drain(&mut rx);
        assert_eq!(files_in(&dir.path().join("out")), 2);
        let formats: Vec<_> = backend.downloads.lock().unwrap().iter().map(|(_, f)| f.clone()).collect();
        assert_eq!(
            formats,
            [FormatChoice::Exact("22".into()), FormatChoice::BestVideo, FormatChoice::Exact("22".into())]
        );

        let started = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::ItemStarted { total: 3, .. }))
            .count();
        assert_eq!(started, 3);
        let logs = log_texts(&events);
        assert!(logs.iter().any(|l| l.starts_with("[2/3] WARNING")));
        assert!(logs.iter().any(|l| l.starts_with("[3/3] ERROR")));
        match events.last() {
            Some(WorkerEvent::DownloadFinished(Ok(summary))) => {
                assert_eq!(summary.files.len(), 2);
                assert_eq!(summary.failed, 1);
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_download_is_refused_while_slot_is_held() {
        let backend = sample_backend();
        let slot = DownloadSlot::default();
        let held = slot.try_acquire().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = channel();
        let request = DownloadRequest {
            url: WATCH.into(),
            kind: DownloadKind::Video,
            selected_quality: Some(StreamOption {
                label: "720p".into(),
                identifier: "22".into(),
            }),
        };
        run_download(backend.clone(), slot.clone(), request, dir.path().to_path_buf(), reporter).await;

        assert!(matches!(
            drain(&mut rx).last(),
            Some(WorkerEvent::DownloadFinished(Err(AppError::Busy)))
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        drop(held);
        assert!(slot.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn missing_output_file_does_not_rewind_progress() {
        let mut fake = FakeBackend::default().with_video(WATCH, "Clip", &[("720p", "22")]);
        fake.unwritten.push(WATCH.to_owned());
        let backend = Arc::new(fake);

        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = channel();
        let request = DownloadRequest {
            url: WATCH.into(),
            kind: DownloadKind::Video,
            selected_quality: Some(StreamOption {
                label: "720p".into(),
                identifier: "22".into(),
            }),
        };
        run_download(backend, DownloadSlot::default(), request, dir.path().to_path_buf(), reporter).await;

        let events = drain(&mut rx);
        let done: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress(p) => Some(p.bytes_done),
                _ => None,
            })
            .collect();
        assert_eq!(done, [0, 1000, 2000, 3000, 4000]);
        assert!(matches!(events.last(), Some(WorkerEvent::DownloadFinished(Ok(_)))));
    }

    #[tokio::test]
    async fn stale_quality_is_rejected() {
        let backend = sample_backend();
        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = channel();
        let request = DownloadRequest {
            url: WATCH.into(),
            kind: DownloadKind::Video,
            selected_quality: Some(StreamOption {
                label: "1080p".into(),
                identifier: "137".into(),
            }),
        };
        run_download(backend, DownloadSlot::default(), request, dir.path().to_path_buf(), reporter).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(WorkerEvent::DownloadFinished(Err(AppError::NoCompatibleStream(_))))
        ));
        assert_eq!(files_in(dir.path()), 0);
    }
}
