//! `MediaBackend` implemented by driving the yt-dlp executable.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, warn};

use crate::backend::MediaBackend;
use crate::config::YTDLP_ENV;
use crate::error::{AppError, AppResult};
use crate::model::{DownloadKind, FormatChoice, MediaInfo, Playlist, PlaylistEntry, StreamOption};
use crate::progress::{FILE_PREFIX, OutputLine, PROGRESS_PREFIX, parse_output_line};
use crate::worker::Reporter;

const BEST_VIDEO: &str = "best[ext=mp4][vcodec!=none][acodec!=none]/best";

pub struct YtDlp {
    bin: PathBuf,
}

impl YtDlp {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: io::Error) -> AppError {
        if err.kind() == io::ErrorKind::NotFound {
            AppError::Backend(format!(
                "'{}' was not found. Install yt-dlp or point {YTDLP_ENV} at it",
                self.bin.display()
            ))
        } else {
            AppError::Backend(format!("could not start '{}': {err}", self.bin.display()))
        }
    }

    /// Runs yt-dlp to completion and returns its stdout.
    async fn run_json(&self, args: &[&str]) -> AppResult<Vec<u8>> {
        debug!("Running {} {}", self.bin.display(), args.join(" "));
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaBackend for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch_info(&self, url: &str, kind: DownloadKind) -> AppResult<MediaInfo> {
        let stdout = self.run_json(&["-J", "--no-playlist", "--no-warnings", url]).await?;
        let video: VideoJson = serde_json::from_slice(&stdout)?;
        Ok(media_info(video, kind))
    }

    async fn playlist(&self, url: &str) -> AppResult<Playlist> {
        let stdout = self
            .run_json(&["-J", "--flat-playlist", "--no-warnings", url])
            .await
            .map_err(|e| match e {
                AppError::NotFound(msg) => AppError::EmptyOrPrivatePlaylist(msg),
                other => other,
            })?;
        let playlist: PlaylistJson = serde_json::from_slice(&stdout)?;
        Ok(playlist_from_json(playlist))
    }

    async fn download(&self, url: &str, format: &FormatChoice, dir: &Path, reporter: &Reporter) -> AppResult<PathBuf> {
        let args = download_args(url, format, dir);
        debug!("Running {} {}", self.bin.display(), args.join(" "));

        let mut child = self
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Backend("yt-dlp stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Backend("yt-dlp stderr was not captured".into()))?;

        // With --print, yt-dlp may route progress to stderr; watch both streams.
        let err_reporter = reporter.clone();
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stderr).split(b'\n');
            while let Ok(Some(raw)) = lines.next_segment().await {
                let line = decode_line(&raw);
                match parse_output_line(&line) {
                    Some(OutputLine::Progress(event)) => err_reporter.progress(event),
                    Some(OutputLine::File(_)) => {}
                    None => collected.push(line),
                }
            }
            collected
        });

        let mut written = None;
        let mut lines = BufReader::new(stdout).split(b'\n');
        while let Some(raw) = lines.next_segment().await? {
            let line = decode_line(&raw);
            match parse_output_line(&line) {
                Some(OutputLine::Progress(event)) => reporter.progress(event),
                Some(OutputLine::File(path)) => written = Some(path),
                None => debug!("yt-dlp> {line}"),
            }
        }

        let status = child.wait().await?;
        let stderr_lines = stderr_task.await.unwrap_or_else(|e| {
            warn!("stderr reader task failed: {e}");
            Vec::new()
        });

        if !status.success() {
            return Err(classify_failure(&stderr_lines.join("\n")));
        }
        written.ok_or_else(|| AppError::Backend("yt-dlp finished without reporting the output file".into()))
    }
}

/// yt-dlp echoes titles and paths in whatever encoding the platform hands it.
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches('\r').to_owned()
}

pub(crate) fn download_args(url: &str, format: &FormatChoice, dir: &Path) -> Vec<String> {
    let selector = match format {
        FormatChoice::Exact(id) => id.clone(),
        FormatChoice::BestVideo => BEST_VIDEO.to_owned(),
    };
    vec![
        "--newline".to_owned(),
        "--progress".to_owned(),
        "--no-warnings".to_owned(),
        "--progress-template".to_owned(),
        format!(
            "download:{PROGRESS_PREFIX} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s"
        ),
        "--print".to_owned(),
        format!("after_move:{FILE_PREFIX} %(filepath)s"),
        "-f".to_owned(),
        selector,
        "-o".to_owned(),
        dir.join("%(title)s.%(ext)s").display().to_string(),
        "--no-playlist".to_owned(),
        url.to_owned(),
    ]
}

/// Maps yt-dlp's stderr onto the error taxonomy.
pub(crate) fn classify_failure(stderr: &str) -> AppError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().trim_start_matches("ERROR:").trim().to_owned())
        .unwrap_or_else(|| "yt-dlp failed without an error message".to_owned());
    let lower = stderr.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["unsupported url", "is not a valid url", "invalid url"]) {
        AppError::InvalidUrl(message)
    } else if has(&["requested format is not available", "no video formats found"]) {
        AppError::NoCompatibleStream(message)
    } else if has(&["permission denied", "no space left", "read-only file system", "unable to open for writing"]) {
        AppError::Filesystem(message)
    } else if has(&[
        "video unavailable",
        "private video",
        "this video is unavailable",
        "does not exist",
        "http error 404",
        "has been removed",
    ]) {
        AppError::NotFound(message)
    } else if has(&[
        "unable to download",
        "urlopen error",
        "timed out",
        "name resolution",
        "getaddrinfo",
        "connection",
        "http error",
        "network is unreachable",
    ]) {
        AppError::Network(message)
    } else {
        AppError::Backend(message)
    }
}

#[derive(Debug, Deserialize)]
struct VideoJson {
    title: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<FormatJson>,
}

#[derive(Debug, Deserialize)]
struct FormatJson {
    format_id: String,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    abr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

impl FormatJson {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref().is_some_and(|c| c != "none")
    }

    fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|c| c != "none")
    }

    fn ext_is(&self, exts: &[&str]) -> bool {
        self.ext.as_deref().is_some_and(|e| exts.contains(&e))
    }

    fn size_label(&self) -> String {
        match self.filesize.or(self.filesize_approx) {
            Some(bytes) => format!("{:.2} MB", bytes / (1024.0 * 1024.0)),
            None => "size unknown".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistJson {
    title: Option<String>,
    #[serde(default)]
    entries: Vec<Option<EntryJson>>,
}

#[derive(Debug, Deserialize)]
struct EntryJson {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
}

fn media_info(video: VideoJson, kind: DownloadKind) -> MediaInfo {
    MediaInfo {
        title: video.title.clone().unwrap_or_else(|| "Untitled".to_owned()),
        thumbnail_url: video.thumbnail.clone(),
        streams: stream_options(&video.formats, kind),
    }
}

/// Progressive MP4 by resolution for video, MP4 audio by bitrate for audio,
/// best first, identifiers deduplicated.
fn stream_options(formats: &[FormatJson], kind: DownloadKind) -> Vec<StreamOption> {
    let mut picked: Vec<&FormatJson> = match kind {
        DownloadKind::Video | DownloadKind::Playlist => formats
            .iter()
            .filter(|f| f.has_video() && f.has_audio() && f.ext_is(&["mp4"]) && f.height.is_some())
            .collect(),
        DownloadKind::Audio => formats
            .iter()
            .filter(|f| !f.has_video() && f.has_audio() && f.ext_is(&["m4a", "mp4"]))
            .collect(),
    };
    match kind {
        DownloadKind::Audio => picked.sort_by(|a, b| b.abr.unwrap_or(0.0).total_cmp(&a.abr.unwrap_or(0.0))),
        _ => picked.sort_by_key(|f| std::cmp::Reverse(f.height.unwrap_or(0))),
    }

    let mut seen = HashSet::new();
    picked
        .into_iter()
        .filter(|f| seen.insert(f.format_id.clone()))
        .map(|f| {
            let label = match kind {
                DownloadKind::Video => format!("{}p - {}", f.height.unwrap_or(0), f.size_label()),
                DownloadKind::Audio => format!("{:.0}kbps - {}", f.abr.unwrap_or(0.0), f.size_label()),
                DownloadKind::Playlist => {
                    format!("{}p - video/{}", f.height.unwrap_or(0), f.ext.as_deref().unwrap_or("mp4"))
                }
            };
            StreamOption {
                label,
                identifier: f.format_id.clone(),
            }
        })
        .collect()
}

fn playlist_from_json(playlist: PlaylistJson) -> Playlist {
    let entries = playlist
        .entries
        .into_iter()
        .flatten()
        .filter_map(|e| {
            let id = e.id?;
            let url = match e.url {
                Some(url) if url.starts_with("http") => url,
                _ => format!("https://www.youtube.com/watch?v={id}"),
            };
            Some(PlaylistEntry {
                url,
                title: e.title.unwrap_or(id),
            })
        })
        .collect();
    Playlist {
        title: playlist.title.unwrap_or_else(|| "Untitled playlist".to_owned()),
        entries,
    }
}
