//! The render surface seam.
//!
//! The layout engine never draws. It tells a [`RenderSurface`] which layers exist, when their
//! positions or group boxes changed and which decorations to show; the surface decides how to
//! turn that into pixels. The eframe application implements it for the native window, and
//! [`RecordingSurface`] records every call for tests.

use crate::layers::{Fade, Layer, LayerKey};
use crate::settings::Settings;
use eframe::egui::Pos2;
use std::cell::RefCell;
use std::rc::Rc;

/// Visual primitives of a diagram.
pub trait RenderSurface {
    /// Allocates the drawing container of a new layer.
    fn create_layer(&mut self, key: LayerKey, id: &str, root: bool);

    /// Builds the primitives of a freshly ingested layer.
    fn build_layer(&mut self, layer: &Layer, settings: &Settings);

    /// Node positions (and therefore link endpoints) changed.
    fn update_positions(&mut self, layer: &Layer);

    /// Group boxes changed.
    fn update_groups(&mut self, layer: &Layer);

    fn fade_layer(&mut self, key: LayerKey, fade: &Fade);

    /// Releases every primitive of a layer.
    fn remove_layer(&mut self, key: LayerKey);

    fn set_loading(&mut self, loading: bool);

    fn set_group_overlay_visible(&mut self, key: LayerKey, group: usize, visible: bool);

    /// Shows the dismiss button of a focused group at a world position, or hides it.
    fn set_close_button(&mut self, key: LayerKey, position: Option<Pos2>);

    fn set_ip_labels_visible(&mut self, visible: bool);

    fn set_toolbar_visible(&mut self, visible: bool);

    fn set_grouping_visible(&mut self, visible: bool);

    fn set_float_mode(&mut self, float_mode: bool);

    /// Releases everything the surface holds.
    fn teardown(&mut self);
}

/// A call received by a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    CreateLayer { key: LayerKey, id: String, root: bool },
    BuildLayer { key: LayerKey, nodes: usize, edges: usize, groups: usize },
    UpdatePositions(LayerKey),
    UpdateGroups(LayerKey),
    Fade { key: LayerKey, to: f32 },
    RemoveLayer(LayerKey),
    Loading(bool),
    GroupOverlay { key: LayerKey, group: usize, visible: bool },
    CloseButton { key: LayerKey, position: Option<Pos2> },
    IpLabels(bool),
    Toolbar(bool),
    Grouping(bool),
    FloatMode(bool),
    Teardown,
}

/// Surface that records every call; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    events: Rc<RefCell<Vec<SurfaceEvent>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded calls.
    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.borrow().clone()
    }

    pub fn contains(&self, event: &SurfaceEvent) -> bool {
        self.events.borrow().contains(event)
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn record(&self, event: SurfaceEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl RenderSurface for RecordingSurface {
    fn create_layer(&mut self, key: LayerKey, id: &str, root: bool) {
        self.record(SurfaceEvent::CreateLayer {
            key,
            id: id.to_string(),
            root,
        });
    }

    fn build_layer(&mut self, layer: &Layer, _settings: &Settings) {
        self.record(SurfaceEvent::BuildLayer {
            key: layer.key,
            nodes: layer.nodes.len(),
            edges: layer.edges.len(),
            groups: layer.groups.len(),
        });
    }

    fn update_positions(&mut self, layer: &Layer) {
        self.record(SurfaceEvent::UpdatePositions(layer.key));
    }

    fn update_groups(&mut self, layer: &Layer) {
        self.record(SurfaceEvent::UpdateGroups(layer.key));
    }

    fn fade_layer(&mut self, key: LayerKey, fade: &Fade) {
        self.record(SurfaceEvent::Fade { key, to: fade.to });
    }

    fn remove_layer(&mut self, key: LayerKey) {
        self.record(SurfaceEvent::RemoveLayer(key));
    }

    fn set_loading(&mut self, loading: bool) {
        self.record(SurfaceEvent::Loading(loading));
    }

    fn set_group_overlay_visible(&mut self, key: LayerKey, group: usize, visible: bool) {
        self.record(SurfaceEvent::GroupOverlay { key, group, visible });
    }

    fn set_close_button(&mut self, key: LayerKey, position: Option<Pos2>) {
        self.record(SurfaceEvent::CloseButton { key, position });
    }

    fn set_ip_labels_visible(&mut self, visible: bool) {
        self.record(SurfaceEvent::IpLabels(visible));
    }

    fn set_toolbar_visible(&mut self, visible: bool) {
        self.record(SurfaceEvent::Toolbar(visible));
    }

    fn set_grouping_visible(&mut self, visible: bool) {
        self.record(SurfaceEvent::Grouping(visible));
    }

    fn set_float_mode(&mut self, float_mode: bool) {
        self.record(SurfaceEvent::FloatMode(float_mode));
    }

    fn teardown(&mut self) {
        self.record(SurfaceEvent::Teardown);
    }
}
