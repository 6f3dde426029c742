//! User interface of the topology viewer.
//!
//! The diagram runs its transitions as futures on a local task set; the app pumps that set for a
//! short slice of every frame and reads the diagram state to paint it.
//!
//! # Module Organization
//!
//! - `state` - The app struct, the egui render surface and pointer interaction state
//! - `canvas` - Hit testing and routing pointer input to the diagram
//! - `rendering` - Drawing layers, groups, links and nodes

mod canvas;
mod rendering;
mod state;

pub use state::{AppConfig, EguiSurface, TopologyApp};

use crate::data::{DataSource, JsonDirectorySource, StaticSource};
use crate::demo;
use crate::diagram::{Diagram, Subscription, RESET_PROMPT};
use crate::error::Result;
use crate::persistence::{MemoryStore, Store};
use crate::settings::SettingsPatch;
use eframe::egui;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

/// eframe storage key of the diagram's key-value entries.
const STORAGE_KEY: &str = "topology_store";

/// Time slice the task set gets every frame.
const TASK_SLICE: Duration = Duration::from_millis(2);

/// Repaint interval while nothing animates, so pending timers keep firing.
const IDLE_REPAINT: Duration = Duration::from_millis(100);

/// Canvas size assumed until the first frame is laid out.
const INITIAL_CANVAS_SIZE: egui::Vec2 = egui::vec2(1200.0, 800.0);

/// Most recent error messages kept for the status line.
const MAX_MESSAGES: usize = 3;

impl TopologyApp {
    /// Creates the app and starts loading the root layer.
    ///
    /// Persisted entries are restored from eframe storage. Payloads come from `config.data_dir`
    /// when given, otherwise from the built-in sample topology.
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> std::io::Result<Self> {
        let entries = cc
            .storage
            .and_then(|storage| storage.get_string(STORAGE_KEY))
            .and_then(|json| match serde_json::from_str::<BTreeMap<String, String>>(&json) {
                Ok(entries) => Some(entries),
                Err(err) => {
                    log::warn!("discarding stored diagram state: {err}");
                    None
                }
            })
            .unwrap_or_default();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let app = Self {
            runtime,
            tasks: tokio::task::LocalSet::new(),
            diagram: None,
            pending: Rc::new(RefCell::new(None)),
            surface: EguiSurface::default(),
            memory: MemoryStore::from_entries(entries),
            interaction: Default::default(),
            messages: Rc::new(RefCell::new(Vec::new())),
            canvas_size: INITIAL_CANVAS_SIZE,
        };

        let source: Rc<dyn DataSource> = match &config.data_dir {
            Some(dir) => {
                log::info!("loading topology from {}", dir.display());
                Rc::new(JsonDirectorySource::new(dir))
            }
            None => Rc::new(StaticSource::new(demo::sample_topology())),
        };
        app.spawn_create(config.diagram_id, source);
        Ok(app)
    }

    fn spawn_create(&self, id: String, source: Rc<dyn DataSource>) {
        let store = Store::new(id.clone(), Some(Box::new(self.memory.clone())));
        let surface = self.surface.clone();
        let pending = Rc::clone(&self.pending);
        let size = self.canvas_size;
        let overrides = SettingsPatch {
            toolbar: Some(true),
            ..SettingsPatch::default()
        };
        self.tasks.spawn_local(async move {
            let result = Diagram::create(id, overrides, Box::new(surface), source, store, size).await;
            if let Ok(diagram) = &result {
                diagram.spawn_persistence_task();
            }
            *pending.borrow_mut() = Some(result);
        });
    }

    /// Runs `future` on the task set, reporting a failure in the status line.
    pub(super) fn spawn_action<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = Result<()>> + 'static,
    {
        let messages = Rc::clone(&self.messages);
        self.tasks.spawn_local(async move {
            if let Err(err) = future.await {
                log::warn!("{name} failed: {err}");
                let mut messages = messages.borrow_mut();
                messages.push(format!("{name}: {err}"));
                if messages.len() > MAX_MESSAGES {
                    messages.remove(0);
                }
            }
        });
    }

    /// Gives the task set a short slice to make progress.
    fn pump_tasks(&mut self) {
        self.tasks
            .block_on(&self.runtime, tokio::time::sleep(TASK_SLICE));
    }

    /// Adopts the diagram once its creation task has finished.
    fn adopt_created_diagram(&mut self) {
        let Some(result) = self.pending.borrow_mut().take() else {
            return;
        };
        match result {
            Ok(diagram) => {
                let messages = Rc::clone(&self.messages);
                diagram.subscribe(Subscription::new("messages", move || {
                    messages.borrow_mut().clear();
                }));
                self.diagram = Some(diagram);
            }
            Err(err) => {
                log::error!("failed to load the topology: {err}");
                self.messages
                    .borrow_mut()
                    .push(format!("failed to load the topology: {err}"));
            }
        }
    }

    /// Handles keyboard shortcuts: `T` toggles the toolbar, `Escape` leaves a focused group or
    /// goes back one layer.
    fn handle_shortcuts(&mut self, ctx: &egui::Context, diagram: &Diagram) {
        if ctx.wants_keyboard_input() {
            return;
        }
        if ctx.input(|i| i.key_pressed(egui::Key::T)) {
            diagram.toggle_toolbar();
        }
        if ctx.input(|i| i.key_pressed(egui::Key::Escape))
            && !diagram.dismiss_focus()
            && diagram.layer_count() > 1
        {
            let target = diagram.clone();
            self.spawn_action("back", async move { target.back().await });
        }
    }

    /// Draws the toolbar with search, zoom and display toggles.
    fn draw_toolbar(&mut self, ui: &mut egui::Ui, diagram: &Diagram) {
        ui.horizontal(|ui| {
            let search = ui.add(
                egui::TextEdit::singleline(&mut self.interaction.search)
                    .hint_text("Find device or subnet")
                    .desired_width(220.0),
            );
            let submitted = search.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if (submitted || ui.button("Find").clicked()) && !self.interaction.search.is_empty() {
                self.find(diagram);
            }

            ui.separator();

            if ui.button("➕").on_hover_text("Zoom in").clicked() {
                diagram.increment();
            }
            if ui.button("➖").on_hover_text("Zoom out").clicked() {
                diagram.decrement();
            }

            ui.separator();

            let surface = self.surface.state();
            let (mut float_mode, mut ip_labels, mut grouping) =
                (surface.float_mode, surface.ip_labels, surface.grouping);
            drop(surface);

            if ui.checkbox(&mut float_mode, "Float").changed() {
                diagram.toggle_float_mode();
            }
            if ui.checkbox(&mut ip_labels, "IP addresses").changed() {
                diagram.toggle_ip_address();
            }
            let has_groups = diagram.read(|state| {
                state
                    .current_layer()
                    .is_some_and(|layer| !layer.groups.is_empty())
            });
            ui.add_enabled_ui(has_groups, |ui| {
                if ui.checkbox(&mut grouping, "Groups").changed() {
                    diagram.toggle_grouping();
                }
            });

            ui.separator();

            ui.add_enabled_ui(diagram.layer_count() > 1, |ui| {
                if ui.button("⬅ Back").clicked() {
                    let target = diagram.clone();
                    self.spawn_action("back", async move { target.back().await });
                }
            });
            if ui.button("Reset").clicked() {
                self.interaction.confirm_reset = true;
            }
        });

        let prefix = self.interaction.search.trim().to_string();
        if !prefix.is_empty() && diagram.find_node(&prefix).is_none() {
            let matches = diagram.autocomplete(&prefix);
            if !matches.is_empty() {
                ui.horizontal_wrapped(|ui| {
                    for item in matches.into_iter().take(8) {
                        if ui.small_button(&item).clicked() {
                            self.interaction.search = item;
                            self.find(diagram);
                        }
                    }
                });
            }
        }
    }

    fn find(&self, diagram: &Diagram) {
        let target = diagram.clone();
        let value = self.interaction.search.trim().to_string();
        self.spawn_action("find", async move { target.find_and_focus(&value).await });
    }

    fn draw_reset_dialog(&mut self, ctx: &egui::Context, diagram: &Diagram) {
        if !self.interaction.confirm_reset {
            return;
        }
        let mut confirmed = false;
        let mut open = true;
        egui::Window::new("Reset")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .open(&mut open)
            .show(ctx, |ui| {
                ui.label(RESET_PROMPT);
                ui.horizontal(|ui| {
                    confirmed = ui.button("Reset").clicked();
                    if ui.button("Cancel").clicked() {
                        self.interaction.confirm_reset = false;
                    }
                });
            });
        if !open {
            self.interaction.confirm_reset = false;
        }
        if confirmed {
            self.interaction.confirm_reset = false;
            let target = diagram.clone();
            self.spawn_action("reset", async move {
                target.reset(|_| true).await.map(|_| ())
            });
        }
    }

    /// Draws the canvas and routes its input to the diagram.
    fn draw_canvas(&mut self, ui: &mut egui::Ui, diagram: &Diagram) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());

        if response.rect.size() != self.canvas_size {
            self.canvas_size = response.rect.size();
            diagram.resize(self.canvas_size);
        }

        self.handle_canvas_input(ui, &response, diagram);

        let surface = self.surface.state();
        diagram.read(|state| rendering::render_diagram(&painter, response.rect, state, &surface));
        drop(surface);

        if let Some(index) = self.interaction.hovered_node {
            let info = diagram.read(|state| {
                let node = state.current_layer()?.nodes.get(index)?;
                let mut lines = vec![node.name.clone()];
                let info = &node.info;
                for (label, value) in [
                    ("IP", &info.ip_address),
                    ("Vendor", &info.manufacturer),
                    ("Model", &info.model),
                    ("OS", &info.software_os),
                    ("Location", &info.location),
                ] {
                    if let Some(value) = value {
                        lines.push(format!("{label}: {value}"));
                    }
                }
                Some(lines.join("\n"))
            });
            if let Some(info) = info {
                response.on_hover_text_at_pointer(info);
            }
        }
    }

    fn draw_status(&self, ui: &mut egui::Ui) {
        let messages = self.messages.borrow();
        if let Some(message) = messages.last() {
            ui.colored_label(egui::Color32::from_rgb(200, 60, 40), message);
        }
    }
}

impl eframe::App for TopologyApp {
    /// Persist the diagram's key-value entries between restarts.
    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        if let Some(diagram) = &self.diagram {
            diagram.flush_persistence(Instant::now());
        }
        match serde_json::to_string(&self.memory.entries()) {
            Ok(json) => storage.set_string(STORAGE_KEY, json),
            Err(err) => log::error!("failed to serialize diagram state: {err}"),
        }
    }

    /// Main update function called by egui for each frame.
    ///
    /// Pumps the diagram's tasks, advances its animations, then draws the toolbar and canvas.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.pump_tasks();
        self.adopt_created_diagram();

        let Some(diagram) = self.diagram.clone() else {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    if self.messages.borrow().is_empty() {
                        ui.spinner();
                    } else {
                        self.draw_status(ui);
                    }
                });
            });
            ctx.request_repaint_after(IDLE_REPAINT);
            return;
        };

        let animating = diagram.tick(Instant::now());
        self.handle_shortcuts(ctx, &diagram);

        if self.surface.state().toolbar {
            egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
                self.draw_toolbar(ui, &diagram);
                self.draw_status(ui);
            });
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| self.draw_canvas(ui, &diagram));

        self.draw_reset_dialog(ctx, &diagram);

        if animating || self.surface.take_dirty() {
            ctx.request_repaint();
        } else {
            ctx.request_repaint_after(IDLE_REPAINT);
        }
    }
}

impl Drop for TopologyApp {
    fn drop(&mut self) {
        if let Some(diagram) = self.diagram.take() {
            diagram.destroy();
        }
    }
}
