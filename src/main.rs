//! Desktop front end for downloading YouTube videos, audio and playlists with yt-dlp

// egui window and form handling
mod app;
// Seam to the external download component
mod backend;
// Startup settings
mod config;
// Error taxonomy
mod error;
// Tracing setup and log pane lines
mod logging;
// Data shared between the UI and the workers
mod model;
// yt-dlp output line parsing
mod progress;
// State behind the window, updated from worker events
mod state;
// Thumbnail fetching module
mod thumbnail;
// Background fetch and download tasks
mod worker;
// yt-dlp backend
mod ytdlp;

use std::sync::Arc;

use eframe::egui::{self, Visuals};
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;
use tracing::info;

use app::DownloaderApp;
use config::Settings;
use ytdlp::YtDlp;

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Program entry point: initializes logging, settings and runtime, then launches the GUI
fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    let settings = Settings::load();
    info!("yt-dlp binary: {}", settings.ytdlp_path.display());
    let runtime = RUNTIME.get_or_try_init(Runtime::new)?;
    let backend = Arc::new(YtDlp::new(settings.ytdlp_path.clone()));

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("YouTube Downloader")
            .with_inner_size([650.0, 720.0])
            .with_min_inner_size([560.0, 600.0]),
        ..Default::default()
    };
    eframe::run_native(
        "YouTube Downloader",
        options,
        Box::new(move |cc| {
            let visuals = if settings.dark_mode { Visuals::dark() } else { Visuals::light() };
            cc.egui_ctx.set_visuals(visuals);
            Box::new(DownloaderApp::new(settings, backend, runtime.handle().clone()))
        }),
    )?;
    Ok(())
}
