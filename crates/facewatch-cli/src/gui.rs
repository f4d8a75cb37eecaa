//! Desktop front end on eframe/egui.

use crate::session::{Session, SessionEvent};
use crate::store::LogEntry;
use anyhow::Result;
use eframe::egui::{self, Color32, FontId, Stroke};
use facewatch_core::{ConfidenceBand, HistoryRecord, Snapshot};
use std::path::{Path, PathBuf};
use std::time::Duration;

const REPAINT: Duration = Duration::from_millis(15);
const DB_HISTORY_LIMIT: usize = 200;
const THUMBNAIL_SIZE: u32 = 150;
const GALLERY_COLUMNS: usize = 3;

pub fn run(session: Session, video: String) -> Result<()> {
    let width = session.config().display_max_width as f32 + 320.0;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([width, 720.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };
    eframe::run_native(
        "facewatch",
        options,
        Box::new(move |_cc| Ok(Box::new(GuiApp::new(session, video)))),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {e}"))
}

/// One cell of the known-faces gallery window.
struct GalleryTile {
    name: String,
    added: Option<String>,
    thumbnail: Option<egui::TextureHandle>,
}

struct GuiApp {
    session: Session,
    video: String,
    texture: Option<egui::TextureHandle>,
    shown_sequence: u64,
    new_name: String,
    image_path: String,
    selected: Option<String>,
    status: String,
    cooldown: u64,
    auto_save: bool,
    show_history: bool,
    show_today: bool,
    show_db: bool,
    show_gallery: bool,
    db_rows: Vec<LogEntry>,
    gallery_tiles: Vec<GalleryTile>,
}

impl GuiApp {
    fn new(session: Session, video: String) -> Self {
        let status = if session.recognition_available() {
            format!("Ready. {} known face(s).", session.gallery().len())
        } else {
            "Face models not found; recognition unavailable.".to_string()
        };
        Self {
            cooldown: session.cooldown_secs(),
            auto_save: session.history().auto_save(),
            session,
            video,
            texture: None,
            shown_sequence: 0,
            new_name: String::new(),
            image_path: String::new(),
            selected: None,
            status,
            show_history: false,
            show_today: false,
            show_db: false,
            show_gallery: false,
            db_rows: Vec::new(),
            gallery_tiles: Vec::new(),
        }
    }

    fn handle_events(&mut self) {
        for event in self.session.poll() {
            match event {
                SessionEvent::Logged(record) => {
                    self.status = format!("Recognized {} ({:.1}%)", record.name, record.confidence);
                }
                SessionEvent::UnknownSaved(path) => {
                    self.status = format!("Unknown face saved to {}", path.display());
                }
                SessionEvent::CaptureEnded(reason) => {
                    self.status = format!("Capture ended: {reason}");
                }
            }
        }
    }

    fn refresh_texture(&mut self, ctx: &egui::Context, snapshot: &Snapshot) {
        if self.texture.is_some() && snapshot.sequence == self.shown_sequence {
            return;
        }
        let frame = &snapshot.frame;
        let image = egui::ColorImage::from_rgb([frame.width() as usize, frame.height() as usize], frame.as_raw());
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => self.texture = Some(ctx.load_texture("video", image, egui::TextureOptions::LINEAR)),
        }
        self.shown_sequence = snapshot.sequence;
    }

    fn start(&mut self) {
        match self.session.start_camera(&self.video) {
            Ok(()) => self.status = format!("Capturing from {}", self.session.source().unwrap_or(&self.video)),
            Err(e) => self.status = format!("Could not start capture: {e}"),
        }
    }

    fn stop(&mut self) {
        self.session.stop_camera();
        self.texture = None;
        self.status = "Capture stopped".to_string();
    }

    fn capture_face(&mut self) {
        let name = self.new_name.trim().to_string();
        if name.is_empty() {
            self.status = "Enter a name first".to_string();
            return;
        }
        match self.session.add_face_from_frame(&name) {
            Ok(_) => {
                self.status = format!("Added {name}");
                self.new_name.clear();
            }
            Err(e) => self.status = format!("Could not add {name}: {e}"),
        }
    }

    fn add_from_file(&mut self) {
        let name = self.new_name.trim().to_string();
        let path = PathBuf::from(self.image_path.trim());
        if name.is_empty() || path.as_os_str().is_empty() {
            self.status = "Enter a name and an image path".to_string();
            return;
        }
        match self.session.add_face_from_file(&path, &name) {
            Ok(_) => {
                self.status = format!("Added {name} from {}", path.display());
                self.new_name.clear();
                self.image_path.clear();
            }
            Err(e) => self.status = format!("Could not add {name}: {e}"),
        }
    }

    fn remove_selected(&mut self) {
        let Some(name) = self.selected.take() else {
            self.status = "Select a face to remove".to_string();
            return;
        };
        match self.session.remove_face(&name) {
            Ok(()) => self.status = format!("Removed {name}"),
            Err(e) => self.status = format!("Could not remove {name}: {e}"),
        }
    }

    fn screenshot(&mut self) {
        match self.session.save_screenshot() {
            Ok(path) => self.status = format!("Screenshot saved to {}", path.display()),
            Err(e) => self.status = format!("Screenshot failed: {e}"),
        }
    }

    fn open_db_history(&mut self) {
        match self.session.db_history(None, Some(DB_HISTORY_LIMIT)) {
            Ok(rows) => {
                self.db_rows = rows;
                self.show_db = true;
            }
            Err(e) => self.status = format!("Database history unavailable: {e}"),
        }
    }

    /// Build the gallery tiles from the database, or from the gallery file
    /// when the database is unavailable.
    fn open_gallery(&mut self, ctx: &egui::Context) {
        let entries: Vec<(String, Option<String>, Option<PathBuf>)> = match self.session.db_summary() {
            Ok((persons, _)) => persons
                .into_iter()
                .map(|p| {
                    let added = p.added_date.get(..10).unwrap_or(&p.added_date).to_string();
                    (p.name, Some(added), p.image_path.map(PathBuf::from))
                })
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "gallery window falling back to gallery file");
                let gallery = self.session.gallery();
                gallery
                    .names()
                    .into_iter()
                    .map(|name| (name.to_string(), None, Some(gallery.image_path_for(name))))
                    .collect()
            }
        };

        self.gallery_tiles = entries
            .into_iter()
            .map(|(name, added, path)| {
                let thumbnail = path.as_deref().and_then(load_thumbnail).map(|image| {
                    ctx.load_texture(format!("thumb_{name}"), image, egui::TextureOptions::LINEAR)
                });
                GalleryTile {
                    name,
                    added,
                    thumbnail,
                }
            })
            .collect();
        self.show_gallery = true;
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        ui.heading("Camera");
        ui.horizontal(|ui| {
            ui.label("Source");
            ui.text_edit_singleline(&mut self.video);
        });
        ui.horizontal(|ui| {
            if self.session.is_capturing() {
                if ui.button("Stop").clicked() {
                    self.stop();
                }
            } else if ui.button("Start").clicked() {
                self.start();
            }
            if ui.button("Screenshot").clicked() {
                self.screenshot();
            }
        });

        ui.separator();
        ui.heading("Known faces");
        ui.horizontal(|ui| {
            ui.label("Name");
            ui.text_edit_singleline(&mut self.new_name);
        });
        if ui.button("Capture face").clicked() {
            self.capture_face();
        }
        ui.horizontal(|ui| {
            ui.label("Image");
            ui.text_edit_singleline(&mut self.image_path);
        });
        if ui.button("Add from image").clicked() {
            self.add_from_file();
        }

        let names: Vec<String> = self.session.gallery().names().into_iter().map(String::from).collect();
        egui::ScrollArea::vertical()
            .id_salt("known_faces")
            .max_height(160.0)
            .show(ui, |ui| {
                for name in names {
                    let selected = self.selected.as_deref() == Some(name.as_str());
                    if ui.selectable_label(selected, &name).clicked() {
                        self.selected = Some(name);
                    }
                }
            });
        ui.horizontal(|ui| {
            if ui.button("Remove selected").clicked() {
                self.remove_selected();
            }
            if ui.button("Gallery").clicked() {
                let ctx = ui.ctx().clone();
                self.open_gallery(&ctx);
            }
        });

        ui.separator();
        ui.heading("Detections");
        match self.session.latest() {
            Some(snapshot) if !snapshot.detections.is_empty() => {
                for face in snapshot.detections.faces() {
                    let band = ConfidenceBand::classify(&face.identity, face.confidence);
                    ui.colored_label(band_color(band), format!("{}: {:.1}%", face.identity, face.confidence));
                }
                if let Some(avg) = snapshot.detections.average_confidence() {
                    ui.label(format!("Average confidence: {avg:.1}%"));
                }
            }
            _ => {
                ui.label("No faces");
            }
        }

        ui.separator();
        ui.heading("History");
        let stats = self.session.stats();
        ui.label(format!("{} recognitions, {} people", stats.total, stats.unique_people));
        ui.horizontal(|ui| {
            if ui.button("All").clicked() {
                self.show_history = true;
            }
            if ui.button("Today").clicked() {
                self.show_today = true;
            }
            if ui.button("Database").clicked() {
                self.open_db_history();
            }
        });
        if ui.button("Clear history").clicked() {
            self.status = match self.session.clear_history() {
                Ok(()) => "History cleared".to_string(),
                Err(e) => format!("Could not clear history: {e}"),
            };
        }
        if ui.checkbox(&mut self.auto_save, "Auto-save").changed() {
            self.session.set_auto_save(self.auto_save);
        }
        if ui
            .add(egui::Slider::new(&mut self.cooldown, 1..=60).text("Cooldown (s)"))
            .changed()
        {
            self.session.set_cooldown(self.cooldown);
        }
    }

    fn video(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let Some(snapshot) = self.session.latest() else {
            ui.centered_and_justified(|ui| {
                ui.label("No video. Press Start.");
            });
            return;
        };
        self.refresh_texture(ctx, &snapshot);
        let Some(texture) = &self.texture else {
            return;
        };

        let (w, h) = (snapshot.frame.width() as f32, snapshot.frame.height() as f32);
        let max_w = ui.available_width().min(self.session.config().display_max_width as f32);
        let scale = (max_w / w).min(1.0);
        let response = ui.image((texture.id(), egui::vec2(w * scale, h * scale)));
        let origin = response.rect.min;
        let painter = ui.painter_at(response.rect);

        for face in snapshot.detections.faces() {
            let color = band_color(ConfidenceBand::classify(&face.identity, face.confidence));
            let loc = &face.location;
            let rect = egui::Rect::from_min_size(
                origin + egui::vec2(loc.x * scale, loc.y * scale),
                egui::vec2(loc.width * scale, loc.height * scale),
            );
            painter.rect_stroke(rect, 0.0, Stroke::new(2.0, color));
            let label = if face.identity.is_known() {
                format!("{} ({:.1}%)", face.identity, face.confidence)
            } else {
                face.identity.to_string()
            };
            let band = egui::Rect::from_min_max(egui::pos2(rect.min.x, rect.max.y - 20.0), rect.max);
            painter.rect_filled(band, 0.0, color);
            painter.text(
                egui::pos2(band.min.x + 4.0, band.center().y),
                egui::Align2::LEFT_CENTER,
                label,
                FontId::proportional(14.0),
                Color32::WHITE,
            );
        }
    }
}

impl eframe::App for GuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_events();

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            let fps = self.session.latest().map(|s| s.fps).unwrap_or(0.0);
            ui.horizontal(|ui| {
                ui.label(&self.status);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("{fps:.1} fps"));
                });
            });
        });
        egui::SidePanel::right("controls")
            .min_width(280.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.controls(ui));
            });
        egui::CentralPanel::default().show(ctx, |ui| self.video(ctx, ui));

        if self.show_history {
            let records: Vec<HistoryRecord> = self.session.history().records().to_vec();
            egui::Window::new("Recognition history")
                .open(&mut self.show_history)
                .show(ctx, |ui| history_table(ui, "all_history", records.iter().rev()));
        }

        if self.show_today {
            let today: Vec<HistoryRecord> = self.session.today().into_iter().cloned().collect();
            egui::Window::new("Today")
                .open(&mut self.show_today)
                .show(ctx, |ui| {
                    ui.label(format!("{} recognitions today", today.len()));
                    history_table(ui, "today_history", today.iter().rev());
                });
        }

        let tiles = &self.gallery_tiles;
        egui::Window::new("Known Faces Gallery")
            .open(&mut self.show_gallery)
            .show(ctx, |ui| gallery_grid(ui, tiles));

        let rows = &self.db_rows;
        egui::Window::new("Database history")
            .open(&mut self.show_db)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().max_height(400.0).show(ui, |ui| {
                    egui::Grid::new("db_history").striped(true).show(ui, |ui| {
                        ui.strong("Name");
                        ui.strong("Time");
                        ui.strong("Confidence");
                        ui.end_row();
                        for row in rows {
                            ui.label(&row.name);
                            ui.label(&row.timestamp);
                            ui.label(format!("{:.1}%", row.confidence * 100.0));
                            ui.end_row();
                        }
                    });
                });
            });

        ctx.request_repaint_after(REPAINT);
    }
}

impl Drop for GuiApp {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

fn history_table<'a>(ui: &mut egui::Ui, id: &str, records: impl Iterator<Item = &'a HistoryRecord>) {
    egui::ScrollArea::vertical().max_height(400.0).show(ui, |ui| {
        egui::Grid::new(id).striped(true).show(ui, |ui| {
            ui.strong("Time");
            ui.strong("Name");
            ui.strong("Confidence");
            ui.end_row();
            for record in records {
                ui.label(record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
                ui.label(&record.name);
                ui.label(format!("{:.1}%", record.confidence));
                ui.end_row();
            }
        });
    });
}

fn gallery_grid(ui: &mut egui::Ui, tiles: &[GalleryTile]) {
    if tiles.is_empty() {
        ui.label("No known faces");
        return;
    }
    egui::ScrollArea::vertical().max_height(500.0).show(ui, |ui| {
        egui::Grid::new("gallery_grid").spacing([20.0, 20.0]).show(ui, |ui| {
            for (i, tile) in tiles.iter().enumerate() {
                ui.vertical(|ui| {
                    match &tile.thumbnail {
                        Some(texture) => {
                            ui.image((texture.id(), texture.size_vec2()));
                        }
                        None => {
                            ui.label("(no photo)");
                        }
                    }
                    ui.strong(&tile.name);
                    if let Some(added) = &tile.added {
                        ui.small(format!("Added: {added}"));
                    }
                });
                if (i + 1) % GALLERY_COLUMNS == 0 {
                    ui.end_row();
                }
            }
        });
    });
}

/// Photo scaled to fit `THUMBNAIL_SIZE` square, aspect ratio kept.
fn load_thumbnail(path: &Path) -> Option<egui::ColorImage> {
    let image = match image::open(path) {
        Ok(image) => image.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE).to_rgb8(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no thumbnail");
            return None;
        }
    };
    let size = [image.width() as usize, image.height() as usize];
    Some(egui::ColorImage::from_rgb(size, image.as_raw()))
}

fn band_color(band: ConfidenceBand) -> Color32 {
    let [r, g, b] = band.color();
    Color32::from_rgb(r, g, b)
}
