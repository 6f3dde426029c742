//! The diagram handle and its public operations.
//!
//! A [`Diagram`] is a cheap-to-clone handle around the shared [`DiagramState`]. Async
//! operations (layer transitions, camera moves) borrow the state only between await points, so
//! the frame loop keeps ticking simulations and painting fades while a transition is in flight.

use crate::constants::*;
use crate::data::{DataSource, Query};
use crate::error::{DiagramError, Result};
use crate::gesture::GestureContext;
use crate::grouping::{self, DragRelease, GroupDrag, NodeDrag};
use crate::layers::{self, Layer, LayerKey, LayerKind, LayerStack, PushOptions, ROOT_LAYER_ID};
use crate::persistence::{LayoutRecord, LayoutStore, Store};
use crate::render::RenderSurface;
use crate::settings::{Settings, SettingsPatch, GROUPING_FLAG, SHOW_IP_FLAG};
use crate::simulation::{Simulation, SimulationPair};
use crate::viewport::{self, Viewport};
use eframe::egui::{Pos2, Vec2};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use tokio::time::{Instant, MissedTickBehavior};

/// Question asked before a reset wipes the stored layout.
pub const RESET_PROMPT: &str = "Reset the diagram? All saved positions will be lost.";

/// A registered listener or task, released on [`Diagram::destroy`].
pub struct Subscription {
    name: String,
    release: Box<dyn FnOnce()>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + 'static) -> Self {
        Self {
            name: name.into(),
            release: Box::new(release),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release(self) {
        log::debug!("releasing subscription {}", self.name);
        (self.release)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("name", &self.name).finish()
    }
}

/// The drag gesture in progress, if any.
#[derive(Debug, Clone)]
pub enum DragState {
    Node(NodeDrag),
    Group(GroupDrag),
}

/// Everything a diagram owns.
pub struct DiagramState {
    pub id: String,
    pub settings: Settings,
    pub layers: LayerStack,
    /// Layers popped off the stack that are still fading out
    pub closing: Vec<Layer>,
    pub store: Store,
    pub persistence: LayoutStore,
    pub surface: Box<dyn RenderSurface>,
    pub source: Rc<dyn DataSource>,
    pub viewport_size: Vec2,
    drag: Option<DragState>,
    subscriptions: Vec<Subscription>,
    destroyed: bool,
}

impl DiagramState {
    pub fn current_layer(&self) -> Option<&Layer> {
        self.layers.current()
    }

    pub fn current_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.current_mut()
    }

    /// Whether a group of the current layer is focused.
    pub fn is_focused(&self) -> bool {
        self.current_layer()
            .is_some_and(|layer| layer.focused_group.is_some())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Schedules the root transform for saving; ignored while a drilled-down layer is open.
    pub(crate) fn viewport_interaction_ended(&mut self, now: Instant) {
        if self.layers.len() != 1 {
            return;
        }
        if let Some(layer) = self.layers.current().filter(|layer| layer.is_root()) {
            self.persistence
                .save_transform(&layer.id, layer.viewport.target(), now);
        }
    }

    fn save_current_layout(&mut self, now: Instant) {
        if let Some(layer) = self.layers.current() {
            if layer.simulations.is_some() {
                let record = LayoutRecord::capture(&layer.nodes, &layer.groups);
                self.persistence.save_layout(&layer.id, record, now);
            }
        }
    }

    fn release_layers(&mut self) {
        let mut layers = self.layers.drain();
        layers.append(&mut self.closing);
        for mut layer in layers {
            if let Some(simulations) = &mut layer.simulations {
                simulations.stop();
            }
            self.surface.remove_layer(layer.key);
        }
        self.drag = None;
    }
}

/// Handle to a diagram instance.
#[derive(Clone)]
pub struct Diagram {
    state: Rc<RefCell<DiagramState>>,
}

impl fmt::Debug for Diagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Diagram")
                .field("id", &state.id)
                .field("layers", &state.layers.len())
                .finish(),
            Err(_) => f.debug_struct("Diagram").finish_non_exhaustive(),
        }
    }
}

impl Diagram {
    /// Creates a diagram and loads its root layer.
    ///
    /// Settings are seeded from the stored flags, then `overrides`. The root layer gets its
    /// simulations, its stored (or configured) fixed positions and its stored, configured or
    /// default transform, in that order of preference.
    ///
    /// # Errors
    ///
    /// Propagates a rejected root fetch.
    pub async fn create(
        id: impl Into<String>,
        overrides: SettingsPatch,
        surface: Box<dyn RenderSurface>,
        source: Rc<dyn DataSource>,
        store: Store,
        viewport_size: Vec2,
    ) -> Result<Self> {
        let id = id.into();
        let settings = Settings::load(&store, &overrides);
        let diagram = Self {
            state: Rc::new(RefCell::new(DiagramState {
                id: id.clone(),
                settings,
                layers: LayerStack::new(),
                closing: Vec::new(),
                store,
                persistence: LayoutStore::new(),
                surface,
                source,
                viewport_size,
                drag: None,
                subscriptions: Vec::new(),
                destroyed: false,
            })),
        };

        {
            let mut guard = diagram.state_mut();
            let state = &mut *guard;
            state.surface.set_toolbar_visible(state.settings.toolbar);
            state.surface.set_float_mode(state.settings.float_mode);
            state
                .surface
                .set_ip_labels_visible(state.settings.show_ip_address);
        }

        diagram.load_root().await?;
        log::info!("diagram {id} created");
        Ok(diagram)
    }

    async fn load_root(&self) -> Result<LayerKey> {
        let data = self.source().fetch(&Query::Root);
        let key = layers::push(self, ROOT_LAYER_ID, LayerKind::Root, data, PushOptions::default())
            .await?;

        let mut guard = self.state_mut();
        let state = &mut *guard;
        let layer = state
            .layers
            .get_mut(key)
            .ok_or_else(|| DiagramError::UnknownLayer(ROOT_LAYER_ID.to_string()))?;

        let has_groups = !layer.groups.is_empty();
        let mut simulations = SimulationPair::new(has_groups);
        if has_groups {
            grouping::setup(&mut simulations, state.settings.grouping);
        }
        layer.simulations = Some(simulations);

        if let Some(record) =
            state
                .persistence
                .load_layout(&state.store, state.settings.layout.as_ref(), &layer.id)
        {
            let restored = record.apply(&mut layer.nodes, &mut layer.groups);
            log::debug!("restored {restored} fixed positions on {}", layer.id);
        }

        let transform = state
            .persistence
            .load_transform(&state.store, &layer.id)
            .or(state.settings.transform)
            .unwrap_or_else(|| Viewport::default_transform(layer.viewport.size));
        layer.viewport.set_transform(transform);

        if has_groups {
            grouping::derive_all(layer, state.settings.group_padding);
            state.surface.update_groups(layer);
        }
        state.surface.set_grouping_visible(state.settings.grouping);
        layer.processing = false;
        Ok(key)
    }

    pub(crate) fn state(&self) -> Ref<'_, DiagramState> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, DiagramState> {
        self.state.borrow_mut()
    }

    /// Runs `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&DiagramState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn source(&self) -> Rc<dyn DataSource> {
        Rc::clone(&self.state().source)
    }

    pub fn settings(&self) -> Settings {
        self.state().settings.clone()
    }

    pub fn layer_count(&self) -> usize {
        self.state().layers.len()
    }

    pub fn current_key(&self) -> Option<LayerKey> {
        self.state().layers.current().map(|layer| layer.key)
    }

    pub fn is_focused(&self) -> bool {
        self.state().is_focused()
    }

    /// Releases subscriptions, simulations and render resources. Pending writes are flushed.
    pub fn destroy(&self) {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        for subscription in state.subscriptions.drain(..) {
            subscription.release();
        }
        state.persistence.flush_all(&state.store);
        state.release_layers();
        state.surface.teardown();
        log::info!("diagram {} destroyed", state.id);
    }

    /// Clears the stored layout and transform and reloads the root layer.
    ///
    /// # Errors
    ///
    /// [`DiagramError::ResetNotConfirmed`] if `confirm` declines, or a rejected root fetch.
    pub async fn reset(&self, confirm: impl FnOnce(&str) -> bool) -> Result<LayerKey> {
        if !confirm(RESET_PROMPT) {
            return Err(DiagramError::ResetNotConfirmed);
        }
        {
            let mut guard = self.state_mut();
            let state = &mut *guard;
            state.persistence.clear(&state.store, ROOT_LAYER_ID);
            state.settings.layout = None;
            state.settings.transform = None;
            state.release_layers();
            log::info!("resetting diagram {}", state.id);
        }
        self.load_root().await
    }

    /// Applies a partial settings update.
    ///
    /// Changed flags run their toggle routine; a changed zoom bound re-applies the scale extent
    /// of every layer.
    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<()> {
        let current = self.settings();
        if patch.toolbar.is_some_and(|v| v != current.toolbar) {
            self.toggle_toolbar();
        }
        if patch.grouping.is_some_and(|v| v != current.grouping) {
            self.toggle_grouping();
        }
        if patch.float_mode.is_some_and(|v| v != current.float_mode) {
            self.toggle_float_mode();
        }
        if patch.show_ip_address.is_some_and(|v| v != current.show_ip_address) {
            self.toggle_ip_address();
        }

        let mut guard = self.state_mut();
        let state = &mut *guard;
        if patch.layout.is_some() {
            state.settings.layout = patch.layout.clone();
        }
        if patch.transform.is_some() {
            state.settings.transform = patch.transform;
        }
        if state.settings.merge_values(patch) {
            let (min_zoom, max_zoom) = state.settings.scale_extent();
            for layer in state.layers.iter_mut() {
                let min = if layer.is_root() {
                    min_zoom
                } else {
                    layer.viewport.scale_extent.0
                };
                layer.viewport.set_scale_extent(min, max_zoom);
            }
        }
        Ok(())
    }

    /// Parses and applies a JSON settings update.
    ///
    /// # Errors
    ///
    /// [`DiagramError::InvalidSetting`] if a flag is not a boolean or a value not a number.
    pub fn update_settings_json(&self, value: &serde_json::Value) -> Result<()> {
        let patch = SettingsPatch::from_json(value)?;
        self.update_settings(&patch)
    }

    /// Flips float mode; returns the new value.
    pub fn toggle_float_mode(&self) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        state.settings.float_mode = !state.settings.float_mode;
        state.surface.set_float_mode(state.settings.float_mode);
        state.settings.float_mode
    }

    /// Flips the device IP labels and persists the choice; returns the new value.
    pub fn toggle_ip_address(&self) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let show = !state.settings.show_ip_address;
        state.settings.show_ip_address = show;
        state.store.set_flag(SHOW_IP_FLAG, &show.to_string());
        state.surface.set_ip_labels_visible(show);
        show
    }

    /// Flips the toolbar; returns the new value.
    pub fn toggle_toolbar(&self) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        state.settings.toolbar = !state.settings.toolbar;
        state.surface.set_toolbar_visible(state.settings.toolbar);
        state.settings.toolbar
    }

    /// Switches grouping mode on the current layer and persists the choice.
    ///
    /// Returns false without changing anything if the current layer has no groups.
    pub fn toggle_grouping(&self) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let grouping = !state.settings.grouping;
        let Some(layer) = state.layers.current_mut() else {
            return false;
        };
        if !grouping::toggle(layer, grouping) {
            return false;
        }
        state.settings.grouping = grouping;
        if grouping {
            grouping::derive_all(layer, state.settings.group_padding);
            state.surface.update_groups(layer);
        }
        state.surface.update_positions(layer);
        state.surface.set_grouping_visible(grouping);
        state.store.set_flag(GROUPING_FLAG, &grouping.to_string());
        log::debug!("grouping {}", if grouping { "on" } else { "off" });
        true
    }

    /// Advances animations and simulations of every layer by one frame.
    ///
    /// A layer's layout is scheduled for saving when one of its simulations cools down.
    /// Returns true while anything is still moving.
    pub fn tick(&self, now: Instant) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        if state.destroyed {
            return false;
        }

        let mut active = false;
        let mut root_transition_ended = false;
        for layer in state.layers.iter_mut() {
            let was_animating = layer.viewport.is_animating();
            active |= layer.viewport.advance(now);
            if was_animating && !layer.viewport.is_animating() && layer.is_root() {
                root_transition_ended = true;
            }
            active |= layer.fade.as_ref().is_some_and(|fade| !fade.is_done(now));

            let running = simulations_running(layer);
            let outcome = layer.tick(&state.settings);
            if outcome.moved() {
                active = true;
                state.surface.update_positions(layer);
                if outcome.groups {
                    state.surface.update_groups(layer);
                }
            }
            let still_running = simulations_running(layer);
            if (running.0 && !still_running.0) || (running.1 && !still_running.1) {
                let record = LayoutRecord::capture(&layer.nodes, &layer.groups);
                state.persistence.save_layout(&layer.id, record, now);
            }
        }
        active |= state
            .closing
            .iter()
            .any(|layer| layer.fade.as_ref().is_some_and(|fade| !fade.is_done(now)));

        if root_transition_ended {
            state.viewport_interaction_ended(now);
        }
        active
    }

    pub(crate) fn stop_simulations(&self, key: LayerKey) {
        if let Some(simulations) = self
            .state_mut()
            .layers
            .get_mut(key)
            .and_then(|layer| layer.simulations.as_mut())
        {
            simulations.stop();
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.state().drag.is_some()
    }

    /// Starts dragging the node named `name` on the current layer.
    pub fn begin_node_drag(&self, name: &str, gesture: GestureContext) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let Some(layer) = state.layers.current_mut() else {
            return false;
        };
        let Some(index) = layer.node_index(name) else {
            return false;
        };
        match grouping::begin_node_drag(layer, index, &state.settings, gesture) {
            Some(drag) => {
                state.drag = Some(DragState::Node(drag));
                true
            }
            None => false,
        }
    }

    /// Starts dragging group `group` of the current layer from the screen point `pointer`.
    pub fn begin_group_drag(&self, group: usize, pointer: Pos2, gesture: GestureContext) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let Some(layer) = state.layers.current_mut() else {
            return false;
        };
        let world = layer.viewport.transform.invert(pointer);
        match grouping::begin_group_drag(layer, group, world, gesture) {
            Some(drag) => {
                state.drag = Some(DragState::Group(drag));
                true
            }
            None => false,
        }
    }

    /// Moves the dragged item to the screen point `pointer`.
    pub fn drag_to(&self, pointer: Pos2, gesture: GestureContext) {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let (Some(drag), Some(layer)) = (&state.drag, state.layers.current_mut()) else {
            return;
        };
        let world = layer.viewport.transform.invert(pointer);
        match drag {
            DragState::Node(drag) => grouping::drag_node(layer, drag, world, gesture),
            DragState::Group(drag) => grouping::drag_group(layer, drag, world, gesture),
        }
        state.surface.update_positions(layer);
    }

    /// Ends the drag in progress and schedules the layout for saving.
    pub fn end_drag(&self, gesture: GestureContext) -> Option<DragRelease> {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        let drag = state.drag.take()?;
        let layer = state.layers.current_mut()?;
        let release = match drag {
            DragState::Node(drag) => grouping::end_node_drag(layer, drag, &state.settings, gesture),
            DragState::Group(drag) => {
                grouping::end_group_drag(layer, drag, &state.settings, gesture)
            }
        };
        state.surface.update_positions(layer);
        state.surface.update_groups(layer);
        state.save_current_layout(Instant::now());
        release
    }

    /// Navigation click on a node: drills down into it.
    pub async fn click_node(&self, name: &str, gesture: GestureContext) -> Result<Option<LayerKey>> {
        crate::drill_down::drill_down(self, name, gesture).await
    }

    /// Navigation click on a group: focuses it and frames it.
    ///
    /// Returns false if the gesture is not a navigation gesture or the group has no geometry.
    pub async fn click_group(&self, group: usize, gesture: GestureContext) -> Result<bool> {
        if !gesture.allows_navigate() {
            return Ok(false);
        }
        let (key, area) = {
            let mut guard = self.state_mut();
            let Some(area) = grouping::focus(&mut guard, group, Instant::now()) else {
                return Ok(false);
            };
            let Some(key) = guard.layers.current().map(|layer| layer.key) else {
                return Ok(false);
            };
            (key, area)
        };
        viewport::focus_on_area(self, key, area, FOCUS_DURATION).await;
        Ok(true)
    }

    /// Releases the focused group and zooms back out.
    pub fn dismiss_focus(&self) -> bool {
        grouping::unfocus(&mut self.state_mut(), Some(UNFOCUS_ZOOM), Instant::now())
    }

    /// Pans the current layer by a screen delta. Rejected while a group is focused.
    pub fn pan(&self, delta: Vec2) -> bool {
        let mut state = self.state_mut();
        if state.is_focused() {
            return false;
        }
        match state.layers.current_mut() {
            Some(layer) => {
                layer.viewport.pan(delta);
                true
            }
            None => false,
        }
    }

    /// Wheel zoom around the screen point `anchor`. Rejected while a group is focused.
    pub fn zoom_wheel(&self, anchor: Pos2, scroll: f32) -> bool {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        if state.is_focused() || scroll == 0.0 {
            return false;
        }
        let factor = if scroll > 0.0 {
            state.settings.zoom_in_mult
        } else {
            state.settings.zoom_out_mult
        };
        let Some(layer) = state.layers.current_mut() else {
            return false;
        };
        layer.viewport.zoom_about(anchor, factor);
        state.viewport_interaction_ended(Instant::now());
        true
    }

    /// Zoom-in step. Rejected while a group is focused.
    pub fn increment(&self) -> bool {
        let factor = self.state().settings.zoom_in_mult;
        self.scale_by(factor)
    }

    /// Zoom-out step. Rejected while a group is focused.
    pub fn decrement(&self) -> bool {
        let factor = self.state().settings.zoom_out_mult;
        self.scale_by(factor)
    }

    fn scale_by(&self, factor: f32) -> bool {
        let mut state = self.state_mut();
        if state.is_focused() {
            return false;
        }
        match state.layers.current_mut() {
            Some(layer) => {
                layer.viewport.scale_by(factor, Instant::now());
                true
            }
            None => false,
        }
    }

    /// Marks the end of a pan or zoom gesture.
    pub fn end_viewport_interaction(&self) {
        self.state_mut().viewport_interaction_ended(Instant::now());
    }

    pub fn resize(&self, size: Vec2) {
        let mut state = self.state_mut();
        state.viewport_size = size;
        for layer in state.layers.iter_mut() {
            layer.viewport.resize(size);
        }
    }

    /// Name of the node on the current layer whose subnet or name equals `value`.
    pub fn find_node(&self, value: &str) -> Option<String> {
        let state = self.state();
        let layer = state.layers.current()?;
        layer
            .find_node(value)
            .map(|index| layer.nodes[index].name.clone())
    }

    /// Search items of the current layer starting with `prefix`.
    pub fn autocomplete(&self, prefix: &str) -> Vec<String> {
        let state = self.state();
        state
            .layers
            .current()
            .map(|layer| {
                layer
                    .autocomplete_matches(prefix)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Centers the camera on the node matching `value`.
    ///
    /// # Errors
    ///
    /// [`DiagramError::UnknownNode`] if nothing on the current layer matches.
    pub async fn find_and_focus(&self, value: &str) -> Result<()> {
        let (key, point, scale) = {
            let mut guard = self.state_mut();
            grouping::unfocus(&mut guard, None, Instant::now());
            let layer = guard
                .layers
                .current()
                .ok_or_else(|| DiagramError::UnknownNode(value.to_string()))?;
            let index = layer
                .find_node(value)
                .ok_or_else(|| DiagramError::UnknownNode(value.to_string()))?;
            let scale = layer.viewport.transform.k.max(DRILL_DOWN_MIN_ZOOM);
            (layer.key, layer.nodes[index].pos, scale)
        };
        viewport::focus_on_node(self, key, point, scale, FOCUS_DURATION).await;
        Ok(())
    }

    /// Closes the current drilled-down layer.
    pub async fn back(&self) -> Result<()> {
        let key = self
            .current_key()
            .ok_or_else(|| DiagramError::UnknownLayer(ROOT_LAYER_ID.to_string()))?;
        layers::pop(self, key).await
    }

    pub async fn pop_layer(&self, key: LayerKey) -> Result<()> {
        layers::pop(self, key).await
    }

    /// Registers a subscription released by [`destroy`](Self::destroy).
    pub fn subscribe(&self, subscription: Subscription) {
        self.state_mut().subscriptions.push(subscription);
    }

    /// Spawns the periodic task writing debounced layout and transform records.
    ///
    /// Must be called from within a `tokio::task::LocalSet`.
    pub fn spawn_persistence_task(&self) {
        let weak = Rc::downgrade(&self.state);
        let handle = tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval(PERSIST_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };
                let Ok(mut guard) = state.try_borrow_mut() else {
                    continue;
                };
                let state = &mut *guard;
                if state.destroyed {
                    break;
                }
                state.persistence.flush_due(&state.store, Instant::now());
            }
        });
        self.subscribe(Subscription::new("persistence", move || handle.abort()));
    }

    /// Writes the records whose debounce delay has elapsed; returns the number of writes.
    pub fn flush_persistence(&self, now: Instant) -> usize {
        let mut guard = self.state_mut();
        let state = &mut *guard;
        state.persistence.flush_due(&state.store, now)
    }
}

/// Whether the node and group simulations of `layer` are running.
fn simulations_running(layer: &Layer) -> (bool, bool) {
    layer.simulations.as_ref().map_or((false, false), |simulations| {
        let groups = simulations.groups.as_ref();
        (
            simulations.nodes.is_running(),
            groups.is_some_and(Simulation::is_running),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticSource;
    use crate::persistence::{FixedEntry, MemoryStore};
    use crate::render::{RecordingSurface, SurfaceEvent};
    use crate::types::{RawGraph, RawLink, RawNode, Transform};
    use eframe::egui::{pos2, vec2};
    use std::time::Duration;

    fn topology() -> RawGraph {
        let grouped = |name: &str, group: usize| RawNode {
            group: Some(group),
            ..RawNode::named(name)
        };
        RawGraph {
            devices: vec![
                grouped("core", 0),
                grouped("dist", 0),
                grouped("fw", 1),
            ],
            groups: Some(vec!["campus".into(), "dmz".into()]),
            links: vec![
                RawLink::new("core", "dist"),
                RawLink::new("core", "fw"),
                RawLink::new("fw", "Cloud-10.0.0.0"),
            ],
            subnets: vec![RawNode {
                subnet: Some("10.0.0.0".into()),
                ..RawNode::named("Cloud-10.0.0.0")
            }],
        }
    }

    async fn create_with(store: Store, overrides: SettingsPatch) -> (Diagram, RecordingSurface) {
        let surface = RecordingSurface::new();
        let diagram = Diagram::create(
            "test",
            overrides,
            Box::new(surface.clone()),
            Rc::new(StaticSource::new(topology())),
            store,
            vec2(800.0, 600.0),
        )
        .await
        .unwrap();
        (diagram, surface)
    }

    async fn create() -> (Diagram, RecordingSurface) {
        create_with(Store::unavailable("test"), SettingsPatch::default()).await
    }

    fn memory_store() -> (Store, MemoryStore) {
        let memory = MemoryStore::default();
        (Store::new("test", Some(Box::new(memory.clone()))), memory)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_loads_root_layer() {
        let (diagram, surface) = create().await;
        let state = diagram.state();
        let layer = state.current_layer().unwrap();

        assert_eq!(layer.id, ROOT_LAYER_ID);
        assert_eq!(layer.nodes.len(), 4);
        assert_eq!(layer.edges.len(), 3);
        assert!(!layer.processing);
        assert!(layer.simulations.as_ref().unwrap().groups.is_some());
        assert!(layer.groups.iter().all(|g| g.geometry.is_some()));
        assert_eq!(layer.viewport.transform, Transform::new(400.0, 300.0, 0.1));
        assert!(surface.contains(&SurfaceEvent::Loading(false)));
        assert!(surface.contains(&SurfaceEvent::Grouping(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_root_fetch_propagates() {
        let result = Diagram::create(
            "test",
            SettingsPatch::default(),
            Box::new(RecordingSurface::new()),
            Rc::new(FailingSource),
            Store::unavailable("test"),
            vec2(800.0, 600.0),
        )
        .await;
        assert!(matches!(result, Err(DiagramError::DataSource { .. })));
    }

    struct FailingSource;

    impl DataSource for FailingSource {
        fn fetch(
            &self,
            query: &Query,
        ) -> futures::future::LocalBoxFuture<'static, Result<RawGraph>> {
            let err = DiagramError::data_source(query, "offline");
            Box::pin(async move { Err(err) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_layout_and_transform_are_restored() {
        let (store, memory) = memory_store();
        let record = LayoutRecord {
            nodes: vec![FixedEntry {
                name: "core".into(),
                fx: Some(12.0),
                fy: Some(-4.0),
            }],
            groups: Vec::new(),
        };
        store.set(
            &store.layer_key(ROOT_LAYER_ID, "layout"),
            &serde_json::to_string(&record).unwrap(),
        );
        store.set(
            &store.layer_key(ROOT_LAYER_ID, "transform"),
            r#"{"x": 10.0, "y": 20.0, "k": 2.0}"#,
        );
        assert_eq!(memory.len(), 2);

        let (diagram, _) = create_with(store, SettingsPatch::default()).await;
        let state = diagram.state();
        let layer = state.current_layer().unwrap();
        assert_eq!(layer.nodes[0].fixed_pos(), Some(pos2(12.0, -4.0)));
        assert_eq!(layer.viewport.transform, Transform::new(10.0, 20.0, 2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_focused_group_locks_pan_and_zoom() {
        let (diagram, surface) = create().await;
        assert!(diagram.click_group(0, GestureContext::navigate()).await.unwrap());
        assert!(diagram.is_focused());
        {
            let state = diagram.state();
            let layer = state.current_layer().unwrap();
            assert!(layer.groups[0].locked);
            assert!(!layer.simulations.as_ref().unwrap().is_running());
        }
        assert!(surface.contains(&SurfaceEvent::GroupOverlay {
            key: diagram.current_key().unwrap(),
            group: 0,
            visible: false,
        }));

        let before = diagram.read(|s| s.current_layer().unwrap().viewport.transform);
        assert!(!diagram.pan(vec2(50.0, 0.0)));
        assert!(!diagram.zoom_wheel(pos2(10.0, 10.0), 1.0));
        assert!(!diagram.increment());
        assert!(!diagram.decrement());
        assert_eq!(
            diagram.read(|s| s.current_layer().unwrap().viewport.transform),
            before
        );

        assert!(diagram.dismiss_focus());
        assert!(!diagram.is_focused());
        diagram.tick(Instant::now() + Duration::from_secs(1));
        let state = diagram.state();
        let layer = state.current_layer().unwrap();
        assert_eq!(layer.viewport.transform.k, UNFOCUS_ZOOM);
        assert!(!layer.groups[0].locked);
        drop(state);
        assert!(diagram.pan(vec2(5.0, 0.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_group_needs_modifier() {
        let (diagram, _) = create().await;
        assert!(!diagram.click_group(0, GestureContext::rearrange()).await.unwrap());
        assert!(!diagram.is_focused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_settings_runs_toggles() {
        let (store, memory) = memory_store();
        let (diagram, surface) = create_with(store, SettingsPatch::default()).await;

        diagram
            .update_settings_json(&serde_json::json!({
                "grouping": false,
                "showIpAddress": false,
                "toolbar": true,
                "maxZoomIn": 4.0
            }))
            .unwrap();

        let settings = diagram.settings();
        assert!(!settings.grouping);
        assert!(!settings.show_ip_address);
        assert!(settings.toolbar);
        assert_eq!(memory.entries().get("test.grouping").map(String::as_str), Some("false"));
        assert_eq!(
            memory.entries().get("test.showIpAddress").map(String::as_str),
            Some("false")
        );
        assert!(surface.contains(&SurfaceEvent::Toolbar(true)));
        assert!(surface.contains(&SurfaceEvent::IpLabels(false)));
        assert_eq!(
            diagram.read(|s| s.current_layer().unwrap().viewport.scale_extent),
            (0.1, 4.0)
        );
        let forces = diagram.read(|s| s.current_layer().unwrap().simulations.clone().unwrap().forces);
        assert_eq!(forces.center_strength, CENTER_STRENGTH_UNGROUPED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_settings_rejects_non_boolean_flag() {
        let (diagram, _) = create().await;
        let err = diagram
            .update_settings_json(&serde_json::json!({"floatMode": "yes"}))
            .unwrap_err();
        assert!(matches!(err, DiagramError::InvalidSetting { .. }));
        assert!(diagram.settings().float_mode);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_grouping_flag_seeds_settings() {
        let (store, _) = memory_store();
        store.set_flag(GROUPING_FLAG, "false");
        let (diagram, _) = create_with(store, SettingsPatch::default()).await;
        assert!(!diagram.settings().grouping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_requires_confirmation() {
        let (store, memory) = memory_store();
        let (diagram, _) = create_with(store, SettingsPatch::default()).await;
        diagram.end_viewport_interaction();
        diagram.flush_persistence(Instant::now() + PERSIST_DEBOUNCE);
        assert!(memory.entries().contains_key("test.main.transform"));

        assert!(matches!(
            diagram.reset(|_| false).await,
            Err(DiagramError::ResetNotConfirmed)
        ));
        assert!(memory.entries().contains_key("test.main.transform"));

        let old = diagram.current_key();
        diagram.reset(|prompt| prompt == RESET_PROMPT).await.unwrap();
        assert!(!memory.entries().contains_key("test.main.transform"));
        assert_ne!(diagram.current_key(), old);
        assert_eq!(diagram.layer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_guards_and_fades_out() {
        let (diagram, surface) = create().await;
        let root = diagram.current_key().unwrap();
        assert!(matches!(
            diagram.pop_layer(root).await,
            Err(DiagramError::RootLayer)
        ));

        let child = diagram
            .click_node("core", GestureContext::navigate())
            .await
            .unwrap()
            .unwrap();
        diagram.state_mut().layers.get_mut(child).unwrap().processing = true;
        assert!(matches!(
            diagram.pop_layer(child).await,
            Err(DiagramError::LayerBusy(_))
        ));
        diagram.state_mut().layers.get_mut(child).unwrap().processing = false;

        diagram.back().await.unwrap();
        assert_eq!(diagram.layer_count(), 1);
        assert!(diagram.state().closing.is_empty());
        assert_eq!(diagram.current_key(), Some(root));
        assert!(surface.contains(&SurfaceEvent::RemoveLayer(child)));
        assert_eq!(
            diagram.read(|s| s.current_layer().unwrap().phase),
            layers::LayerPhase::Active
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drag_saves_layout_through_persistence_task() {
        let (store, memory) = memory_store();
        let overrides = SettingsPatch {
            float_mode: Some(false),
            ..SettingsPatch::default()
        };
        let (diagram, _) = create_with(store, overrides).await;

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                diagram.spawn_persistence_task();
                let gesture = GestureContext::rearrange();
                assert!(diagram.begin_node_drag("core", gesture));
                diagram.drag_to(pos2(420.0, 310.0), gesture);
                assert_eq!(diagram.end_drag(gesture), Some(DragRelease::Pinned));

                tokio::time::sleep(PERSIST_DEBOUNCE + PERSIST_INTERVAL * 2).await;
            })
            .await;

        let stored = memory.entries();
        let layout: LayoutRecord =
            serde_json::from_str(stored.get("test.main.layout").unwrap()).unwrap();
        assert_eq!(layout.nodes.len(), 1);
        assert_eq!(layout.nodes[0].name, "core");
        // screen (420, 310) under the default transform
        assert!((layout.nodes[0].fx.unwrap() - 200.0).abs() < 1e-3);
        assert!((layout.nodes[0].fy.unwrap() - 100.0).abs() < 1e-3);

        diagram.destroy();
        assert!(diagram.state().subscriptions.is_empty());
        assert!(diagram.read(|s| s.is_destroyed()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_tears_everything_down() {
        let (diagram, surface) = create().await;
        let released = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&released);
        diagram.subscribe(Subscription::new("resize", move || *flag.borrow_mut() = true));

        diagram.destroy();
        assert!(*released.borrow());
        assert_eq!(diagram.layer_count(), 0);
        assert!(surface.contains(&SurfaceEvent::Teardown));
        assert!(!diagram.tick(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_run_simulation_until_cool() {
        let (diagram, _) = create().await;
        let mut now = Instant::now();
        let mut frames = 0;
        while diagram.tick(now) {
            now += Duration::from_millis(16);
            frames += 1;
            assert!(frames < 2000);
        }
        let state = diagram.state();
        let layer = state.current_layer().unwrap();
        assert!(!layer.simulations.as_ref().unwrap().is_running());
        assert!(layer.nodes.iter().all(|n| n.pos.x.is_finite() && n.pos.y.is_finite()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_layout_is_saved_once_the_simulation_settles() {
        let (diagram, _) = create().await;
        let pending = || diagram.read(|s| s.persistence.has_pending_layout(ROOT_LAYER_ID));
        let mut now = Instant::now();
        for _ in 0..3 {
            assert!(diagram.tick(now));
            now += Duration::from_millis(16);
        }
        assert!(!pending());

        let mut frames = 0;
        while diagram.tick(now) {
            now += Duration::from_millis(16);
            frames += 1;
            assert!(frames < 2000);
        }
        assert!(pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search() {
        let (diagram, _) = create().await;
        assert_eq!(diagram.find_node("10.0.0.0").as_deref(), Some("Cloud-10.0.0.0"));
        assert_eq!(diagram.autocomplete("C"), vec!["core".to_string()]);
        diagram.find_and_focus("fw").await.unwrap();
        assert!(matches!(
            diagram.find_and_focus("nothing").await,
            Err(DiagramError::UnknownNode(_))
        ));
    }
}
