//! Application state management structures.
//!
//! This module contains the state the window keeps next to the diagram: the visual flags the
//! diagram pushes through its render surface, the pointer interaction in progress, and the
//! application struct tying the async task set to the egui frame loop.

use crate::diagram::Diagram;
use crate::error::Result;
use crate::layers::{Fade, Layer, LayerKey};
use crate::persistence::MemoryStore;
use crate::render::RenderSurface;
use crate::settings::Settings;
use eframe::egui;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

/// Visual state driven by the diagram through [`EguiSurface`].
#[derive(Debug, Default)]
pub struct SurfaceState {
    /// Whether a layer payload is being fetched
    pub loading: bool,
    /// Whether the toolbar panel is shown
    pub toolbar: bool,
    /// Whether group boxes are drawn
    pub grouping: bool,
    pub float_mode: bool,
    /// Whether device IP address labels are drawn
    pub ip_labels: bool,
    /// Group overlays hidden while their group is focused
    pub hidden_overlays: HashSet<(LayerKey, usize)>,
    /// Dismiss button of the focused group, per layer, in world space
    pub close_buttons: HashMap<LayerKey, egui::Pos2>,
    /// Layers with live primitives
    pub layers: HashSet<LayerKey>,
    /// Something changed since the last frame
    pub dirty: bool,
}

/// Render surface painting into the egui window.
///
/// Geometry is read straight from the diagram state every frame; the surface only keeps the
/// decorations and flags the diagram toggles.
#[derive(Debug, Clone, Default)]
pub struct EguiSurface {
    state: Rc<RefCell<SurfaceState>>,
}

impl EguiSurface {
    pub fn state(&self) -> std::cell::Ref<'_, SurfaceState> {
        self.state.borrow()
    }

    /// Returns and clears the dirty flag.
    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.state.borrow_mut().dirty)
    }

    fn with(&self, f: impl FnOnce(&mut SurfaceState)) {
        let mut state = self.state.borrow_mut();
        f(&mut state);
        state.dirty = true;
    }
}

impl RenderSurface for EguiSurface {
    fn create_layer(&mut self, key: LayerKey, id: &str, _root: bool) {
        log::debug!("creating primitives for layer {id}");
        self.with(|s| {
            s.layers.insert(key);
        });
    }

    fn build_layer(&mut self, _layer: &Layer, _settings: &Settings) {
        self.with(|_| {});
    }

    fn update_positions(&mut self, _layer: &Layer) {
        self.with(|_| {});
    }

    fn update_groups(&mut self, _layer: &Layer) {
        self.with(|_| {});
    }

    fn fade_layer(&mut self, _key: LayerKey, _fade: &Fade) {
        self.with(|_| {});
    }

    fn remove_layer(&mut self, key: LayerKey) {
        self.with(|s| {
            s.layers.remove(&key);
            s.close_buttons.remove(&key);
            s.hidden_overlays.retain(|(layer, _)| *layer != key);
        });
    }

    fn set_loading(&mut self, loading: bool) {
        self.with(|s| s.loading = loading);
    }

    fn set_group_overlay_visible(&mut self, key: LayerKey, group: usize, visible: bool) {
        self.with(|s| {
            if visible {
                s.hidden_overlays.remove(&(key, group));
            } else {
                s.hidden_overlays.insert((key, group));
            }
        });
    }

    fn set_close_button(&mut self, key: LayerKey, position: Option<egui::Pos2>) {
        self.with(|s| match position {
            Some(position) => {
                s.close_buttons.insert(key, position);
            }
            None => {
                s.close_buttons.remove(&key);
            }
        });
    }

    fn set_ip_labels_visible(&mut self, visible: bool) {
        self.with(|s| s.ip_labels = visible);
    }

    fn set_toolbar_visible(&mut self, visible: bool) {
        self.with(|s| s.toolbar = visible);
    }

    fn set_grouping_visible(&mut self, visible: bool) {
        self.with(|s| s.grouping = visible);
    }

    fn set_float_mode(&mut self, float_mode: bool) {
        self.with(|s| s.float_mode = float_mode);
    }

    fn teardown(&mut self) {
        self.with(|s| *s = SurfaceState::default());
    }
}

/// State related to pointer interactions with the canvas.
#[derive(Debug, Default)]
pub struct InteractionState {
    /// A node or group drag handed to the diagram is in progress
    pub dragging: bool,
    /// Whether the user is currently panning the canvas
    pub is_panning: bool,
    /// Node under the pointer, for the info tooltip
    pub hovered_node: Option<usize>,
    /// Text of the search box
    pub search: String,
    /// Whether the reset confirmation dialog is open
    pub confirm_reset: bool,
}

/// Startup options of the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Scope of persisted keys
    pub diagram_id: String,
    /// Directory of JSON payloads; the built-in sample topology is used without one
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            diagram_id: "topology".to_string(),
            data_dir: None,
        }
    }
}

impl AppConfig {
    /// Reads the payload directory from the first command line argument.
    pub fn from_args() -> Self {
        Self {
            data_dir: std::env::args().nth(1).map(PathBuf::from),
            ..Self::default()
        }
    }
}

/// Main application state for the topology viewer.
pub struct TopologyApp {
    /// Runtime driving timers of the diagram's async operations
    pub(super) runtime: tokio::runtime::Runtime,
    /// Task set the diagram's futures run on, pumped once per frame
    pub(super) tasks: tokio::task::LocalSet,
    pub(super) diagram: Option<Diagram>,
    /// Slot the creation task fills once the root layer is loaded
    pub(super) pending: Rc<RefCell<Option<Result<Diagram>>>>,
    pub(super) surface: EguiSurface,
    /// Backend of the diagram's key-value store, snapshotted into eframe storage
    pub(super) memory: MemoryStore,
    pub(super) interaction: InteractionState,
    /// Errors reported by async operations, newest last
    pub(super) messages: Rc<RefCell<Vec<String>>>,
    /// Size of the canvas in the last frame
    pub(super) canvas_size: egui::Vec2,
}
