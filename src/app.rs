//! The egui window: form, progress bar and log pane.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use eframe::{App, Frame, egui};
use egui::{Color32, RichText, TextureOptions};
use rfd::FileDialog;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

use crate::backend::MediaBackend;
use crate::config::Settings;
use crate::logging::LogLevel;
use crate::model::{DownloadKind, WorkerEvent};
use crate::state::{AppState, Notice, Phase};
use crate::worker::{self, DownloadSlot, Reporter};

pub struct DownloaderApp {
    state: AppState,
    settings: Settings,
    backend: Arc<dyn MediaBackend>,
    slot: DownloadSlot,
    runtime: Handle,
    tx: UnboundedSender<WorkerEvent>,
    rx: UnboundedReceiver<WorkerEvent>,
}

impl DownloaderApp {
    pub fn new(settings: Settings, backend: Arc<dyn MediaBackend>, runtime: Handle) -> Self {
        info!("Using {} backend", backend.name());
        let (tx, rx) = unbounded_channel();
        Self {
            state: AppState::new(&settings),
            settings,
            backend,
            slot: DownloadSlot::default(),
            runtime,
            tx,
            rx,
        }
    }

    /// Applies everything the workers posted since the last frame, in order.
    fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.state.apply(event);
        }
    }

    fn start_due_fetch(&mut self) {
        if let Some(job) = self.state.due_fetch(Instant::now(), self.settings.fetch_debounce()) {
            self.runtime.spawn(worker::fetch_streams(
                Arc::clone(&self.backend),
                job.url,
                job.kind,
                job.fetch_id,
                Reporter::new(self.tx.clone()),
            ));
        }
    }

    fn start_download(&mut self) {
        if self.state.download_dir.trim().is_empty() {
            self.state.push_log(LogLevel::Info, "Please select a directory to save your file(s).");
            match FileDialog::new().pick_folder() {
                Some(folder) => self.state.download_dir = folder.display().to_string(),
                None => {
                    self.state
                        .push_log(LogLevel::Warn, "Download cancelled: No directory was selected.");
                    return;
                }
            }
        }

        let request = match self.state.begin_download() {
            Ok(request) => request,
            Err(e) => {
                self.state.push_log(LogLevel::Error, format!("Error: {e}"));
                return;
            }
        };
        let dir = PathBuf::from(self.state.download_dir.trim());
        self.runtime.spawn(worker::run_download(
            Arc::clone(&self.backend),
            self.slot.clone(),
            request,
            dir,
            Reporter::new(self.tx.clone()),
        ));
    }

    fn kind_section(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label(RichText::new("1. Choose Download Type").strong());
            let mut kind = self.state.kind;
            for option in DownloadKind::ALL {
                ui.radio_value(&mut kind, option, option.label());
            }
            self.state.set_kind(kind);
        });
    }

    fn url_section(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label(RichText::new("2. Enter YouTube URL").strong());
            let response = ui.add(
                egui::TextEdit::singleline(&mut self.state.url)
                    .hint_text("https://www.youtube.com/watch?v=...")
                    .desired_width(f32::INFINITY),
            );
            if response.changed() {
                self.state.on_url_edited(Instant::now());
            }
        });
    }

    fn quality_section(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            let heading = if self.state.kind == DownloadKind::Playlist {
                "3. Select Quality (for all videos)"
            } else {
                "3. Select Quality"
            };
            ui.label(RichText::new(heading).strong());

            ui.horizontal(|ui| {
                if let Some(tex) = &self.state.thumbnail {
                    ui.image(tex);
                }
                ui.vertical(|ui| {
                    match (&self.state.title, self.state.phase) {
                        (_, Phase::Fetching) => {
                            ui.horizontal(|ui| {
                                ui.spinner();
                                ui.label("Fetching details...");
                            });
                        }
                        (Some(title), _) => {
                            ui.label(title);
                        }
                        (None, _) => {
                            ui.weak("No URL resolved yet");
                        }
                    }

                    let enabled = !self.state.streams.is_empty() && self.state.phase == Phase::Ready;
                    ui.add_enabled_ui(enabled, |ui| {
                        let selected_text = self
                            .state
                            .selected_stream()
                            .map(|s| s.label.clone())
                            .unwrap_or_default();
                        egui::ComboBox::from_id_source("quality")
                            .selected_text(selected_text)
                            .width(320.0)
                            .show_ui(ui, |ui| {
                                for (i, stream) in self.state.streams.iter().enumerate() {
                                    ui.selectable_value(&mut self.state.selected, Some(i), &stream.label);
                                }
                            });
                    });
                });
            });
        });
    }

    fn folder_section(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Save to:");
            ui.add_enabled(
                self.state.phase != Phase::Downloading,
                egui::TextEdit::singleline(&mut self.state.download_dir).desired_width(380.0),
            );
            if ui
                .add_enabled(self.state.phase != Phase::Downloading, egui::Button::new("Browse…"))
                .clicked()
            {
                if let Some(folder) = FileDialog::new().set_directory(&self.state.download_dir).pick_folder() {
                    self.state.download_dir = folder.display().to_string();
                }
            }
        });
    }

    fn download_section(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let download = ui.add_enabled(
                self.state.can_download(),
                egui::Button::new(RichText::new("Download").strong()),
            );
            let text = match self.state.item {
                Some((index, total)) => format!("[{index}/{total}] {:.0}%", self.state.progress * 100.0),
                None => format!("{:.0}%", self.state.progress * 100.0),
            };
            ui.add(egui::ProgressBar::new(self.state.progress).text(text).animate(self.state.phase == Phase::Downloading));
            if download.clicked() {
                self.start_download();
            }
        });

        ui.horizontal(|ui| {
            if let Some(status) = &self.state.status {
                ui.weak(status);
            }
            if let Some(dir) = self.state.finished_dir.clone() {
                if ui.button("Open Folder").clicked() {
                    open_folder(&dir);
                }
            }
        });
    }

    fn log_section(&self, ui: &mut egui::Ui) {
        ui.label(RichText::new("Logs & Status").strong());
        egui::Frame::group(ui.style()).show(ui, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in &self.state.log {
                        let text = RichText::new(line.to_string()).monospace();
                        let text = match line.level {
                            LogLevel::Info => text,
                            LogLevel::Warn => text.color(Color32::YELLOW),
                            LogLevel::Error => text.color(Color32::LIGHT_RED),
                        };
                        ui.label(text);
                    }
                });
        });
    }

    fn notice_window(&mut self, ctx: &egui::Context) {
        let Some(notice) = self.state.notice.clone() else {
            return;
        };
        let (title, text) = match notice {
            Notice::Success(text) => ("Success", text),
            Notice::Error(text) => ("Download Error", text),
        };
        let mut open = true;
        let mut dismissed = false;
        egui::Window::new(title)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .open(&mut open)
            .show(ctx, |ui| {
                ui.label(text);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if !open || dismissed {
            self.state.notice = None;
        }
    }
}

impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.drain_events();

        if let Some(image) = self.state.take_pending_thumbnail() {
            self.state.thumbnail = Some(ctx.load_texture("thumbnail", image, TextureOptions::default()));
        }

        self.start_due_fetch();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("YouTube Downloader");
            ui.add_space(6.0);
            self.kind_section(ui);
            self.url_section(ui);
            self.quality_section(ui);
            ui.add_space(4.0);
            self.folder_section(ui);
            ui.add_space(4.0);
            self.download_section(ui);
            ui.separator();
            self.log_section(ui);
        });

        self.notice_window(ctx);

        // Poll the worker channel even when the user is idle.
        ctx.request_repaint_after(self.settings.poll_interval());
    }
}

/// Opens `dir` in the platform file manager.
fn open_folder(dir: &Path) {
    let dir = dir.to_path_buf();
    std::thread::spawn(move || {
        let program = if cfg!(target_os = "windows") {
            "explorer"
        } else if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        if let Err(e) = std::process::Command::new(program).arg(&dir).spawn() {
            warn!("Could not open {}: {e}", dir.display());
        }
    });
}
