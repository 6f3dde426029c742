//! Layers and the navigation stack.
//!
//! A layer is one self-contained view: its own nodes, links, groups, simulations and viewport.
//! The root layer shows the whole topology; drilling into a device or a subnet pushes a more
//! detailed layer on top, dimming (not destroying) the one below. Popping fades the head out
//! and releases it.
//!
//! Every layer walks the same lifecycle:
//!
//! ```text
//! Created -> Loading -> Active <-> Dimmed
//!                          \-> FadingOut -> Destroyed
//! ```

use crate::constants::{FADE_DURATION, STATIC_WAN_LINK_WIDTH};
use crate::diagram::Diagram;
use crate::error::{DiagramError, Result};
use crate::grouping;
use crate::settings::Settings;
use crate::simulation::{tick_groups, tick_nodes, NodeTickContext, SimulationPair};
use crate::types::*;
use crate::viewport::Viewport;
use eframe::egui::{pos2, Pos2, Vec2};
use futures::future::LocalBoxFuture;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Identity of one layer instance; ids repeat when the same device is drilled into twice.
pub type LayerKey = Uuid;

/// Id of the root layer.
pub const ROOT_LAYER_ID: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Root,
    Device,
    Subnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhase {
    Created,
    Loading,
    Active,
    /// A child layer is on top
    Dimmed,
    FadingOut,
    Destroyed,
}

/// An opacity animation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fade {
    pub from: f32,
    pub to: f32,
    pub start: Instant,
    pub duration: Duration,
}

impl Fade {
    pub fn new(from: f32, to: f32, start: Instant, duration: Duration) -> Self {
        Self {
            from,
            to,
            start,
            duration,
        }
    }

    pub fn opacity(&self, now: Instant) -> f32 {
        if now <= self.start {
            return self.from;
        }
        if self.duration.is_zero() {
            return self.to;
        }
        let t = (now - self.start).as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * t.min(1.0)
    }

    pub fn is_done(&self, now: Instant) -> bool {
        now >= self.start + self.duration
    }
}

/// What ingestion could not take over from a payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Links whose source or target names no node of the payload
    pub rejected_edges: Vec<RawLink>,
    /// Subnets whose group was dropped because their links span two groups
    pub dropped_memberships: Vec<String>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.rejected_edges.is_empty() && self.dropped_memberships.is_empty()
    }
}

/// What moved during one layer tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub nodes: bool,
    pub groups: bool,
}

impl TickOutcome {
    pub fn moved(&self) -> bool {
        self.nodes || self.groups
    }
}

/// One view in the navigation stack.
#[derive(Debug)]
pub struct Layer {
    pub key: LayerKey,
    /// Root id, device name or subnet name
    pub id: String,
    pub kind: LayerKind,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub groups: Vec<Group>,
    /// Absent on device layers, which are laid out statically
    pub simulations: Option<SimulationPair>,
    pub viewport: Viewport,
    pub focused_group: Option<usize>,
    /// Set while a transition from or to this layer is in flight
    pub processing: bool,
    pub phase: LayerPhase,
    pub fade: Option<Fade>,
    pub report: IngestReport,
    /// Search items collected during ingestion
    pub autocomplete: Vec<String>,
}

impl Layer {
    pub fn new(id: &str, kind: LayerKind, size: Vec2, scale_extent: (f32, f32)) -> Self {
        Self {
            key: Uuid::new_v4(),
            id: id.to_string(),
            kind,
            nodes: Vec::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            simulations: None,
            viewport: Viewport::new(size, scale_extent),
            focused_group: None,
            processing: false,
            phase: LayerPhase::Created,
            fade: None,
            report: IngestReport::default(),
            autocomplete: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == LayerKind::Root
    }

    /// Replaces the layer's content with a payload.
    ///
    /// Devices come first, then subnets. Fresh nodes are seeded on a phyllotaxis spiral.
    /// Links naming an unknown node are rejected. A node without a group inherits the group of
    /// a grouped source linking to it, unless it is an external neighbour; a link across two
    /// groups drops the group of its subnet endpoints.
    pub fn ingest(&mut self, graph: RawGraph) -> &IngestReport {
        let mut report = IngestReport::default();
        self.groups = graph
            .groups
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(id, name)| Group::new(id, name))
            .collect();
        self.nodes.clear();
        self.edges.clear();
        self.autocomplete.clear();
        self.focused_group = None;

        let mut index: HashMap<String, usize> = HashMap::new();
        let subnets = graph.subnets.into_iter().map(|raw| (raw, true));
        for (raw, is_subnet) in graph.devices.into_iter().map(|raw| (raw, false)).chain(subnets) {
            if raw.name.is_empty() || index.contains_key(&raw.name) {
                log::warn!("layer {}: skipping duplicate or unnamed node {:?}", self.id, raw.name);
                continue;
            }
            let node = self.node_from_raw(raw, is_subnet);
            if let Some(item) = autocomplete_item(&node) {
                self.autocomplete.push(item);
            }
            index.insert(node.name.clone(), self.nodes.len());
            self.nodes.push(node);
        }

        for link in graph.links {
            let (Some(&source), Some(&target)) = (index.get(&link.source), index.get(&link.target))
            else {
                log::warn!(
                    "layer {}: rejecting link {} -> {} with an unknown endpoint",
                    self.id,
                    link.source,
                    link.target
                );
                report.rejected_edges.push(link);
                continue;
            };
            let width = if link.is_static_wan {
                STATIC_WAN_LINK_WIDTH
            } else {
                link_width(link.bandwidth)
            };
            self.edges.push(Edge {
                source,
                target,
                bandwidth: link.bandwidth,
                is_static_wan: link.is_static_wan,
                warning: link.warning,
                width,
                description: link.int_description,
                ip_address: link.ip_address,
                qos: link.qos,
                url: link.url,
            });
        }

        for edge in &self.edges {
            let (source, target) = (edge.source, edge.target);
            match (self.nodes[source].group, self.nodes[target].group) {
                (Some(group), None) if !self.nodes[target].external => {
                    self.nodes[target].group = Some(group)
                }
                (Some(a), Some(b)) if a != b => {
                    for end in [source, target] {
                        let node = &mut self.nodes[end];
                        if node.is_subnet() && node.group.take().is_some() {
                            log::warn!(
                                "layer {}: subnet {} links two groups, dropping its group",
                                self.id,
                                node.name
                            );
                            report.dropped_memberships.push(node.name.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        log::debug!(
            "layer {}: ingested {} nodes, {} links, {} groups",
            self.id,
            self.nodes.len(),
            self.edges.len(),
            self.groups.len()
        );
        self.report = report;
        &self.report
    }

    fn node_from_raw(&self, raw: RawNode, is_subnet: bool) -> Node {
        let kind = if raw.is_unmanaged {
            NodeKind::Unmanaged
        } else if is_subnet {
            NodeKind::Subnet {
                subnet: raw.subnet.clone().unwrap_or_else(|| raw.name.clone()),
                mask: raw.mask.clone().unwrap_or_default(),
                is_private: raw.is_private,
            }
        } else {
            NodeKind::Device
        };

        let group = raw.group.filter(|&group| {
            let valid = group < self.groups.len();
            if !valid {
                log::warn!("layer {}: node {} names unknown group {group}", self.id, raw.name);
            }
            valid
        });

        let mut node = Node::new(raw.name, kind).at(phyllotaxis(self.nodes.len()));
        node.group = group;
        node.image = raw.image;
        node.external = raw.external;
        node.info = DeviceInfo {
            ip_address: raw.ip_address,
            url: raw.url,
            manufacturer: raw.manufacturer,
            model: raw.model,
            software_os: raw.software_os,
            location: raw.location,
        };
        node
    }

    /// Index of the node whose subnet or name equals `value`.
    pub fn find_node(&self, value: &str) -> Option<usize> {
        self.nodes.iter().position(|node| match &node.kind {
            NodeKind::Subnet { subnet, .. } => subnet == value || node.name == value,
            _ => node.name == value,
        })
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }

    /// Search items starting with `prefix`, ignoring case.
    pub fn autocomplete_matches(&self, prefix: &str) -> Vec<&str> {
        let prefix = prefix.to_lowercase();
        self.autocomplete
            .iter()
            .filter(|item| item.to_lowercase().starts_with(&prefix))
            .map(String::as_str)
            .collect()
    }

    /// Text drawn under a node.
    pub fn label(&self, index: usize) -> Option<String> {
        let node = self.nodes.get(index)?;
        match &node.kind {
            NodeKind::Unmanaged => None,
            NodeKind::Subnet { subnet, .. } => {
                let incoming = self.edges.iter().filter(|edge| edge.target == index).count();
                if is_public_subnet(subnet) && incoming <= 1 {
                    Some("Internet".to_string())
                } else {
                    Some(subnet.clone())
                }
            }
            NodeKind::Device => Some(node.name.clone()),
        }
    }

    /// Management address drawn under a device when IP labels are on.
    pub fn ip_label(&self, index: usize) -> Option<&str> {
        let node = self.nodes.get(index)?;
        match node.kind {
            NodeKind::Device => node.info.ip_address.as_deref(),
            _ => None,
        }
    }

    pub fn opacity(&self, now: Instant) -> f32 {
        self.fade.as_ref().map_or(1.0, |fade| fade.opacity(now))
    }

    /// Advances both simulations by one tick and refreshes group geometry.
    pub fn tick(&mut self, settings: &Settings) -> TickOutcome {
        let grouping_active = settings.grouping && !self.groups.is_empty();
        let Some(simulations) = &mut self.simulations else {
            return TickOutcome::default();
        };

        let context = NodeTickContext {
            edges: &self.edges,
            groups: &self.groups,
            grouping_active,
            center: Pos2::ZERO,
        };
        let nodes = tick_nodes(
            &mut simulations.nodes,
            &simulations.forces,
            &mut self.nodes,
            &context,
        );
        let groups_ticked = match &mut simulations.groups {
            Some(groups) if grouping_active => {
                tick_groups(groups, &mut self.nodes, &self.groups, self.focused_group)
            }
            _ => false,
        };

        if nodes || groups_ticked {
            grouping::clamp_focused_members(self);
        }
        let groups = (nodes || groups_ticked) && grouping::update(self, settings);
        TickOutcome { nodes, groups }
    }

    /// Runs up to `ticks` ticks synchronously.
    pub fn settle(&mut self, settings: &Settings, ticks: usize) {
        for _ in 0..ticks {
            if !self.tick(settings).moved() {
                break;
            }
        }
    }
}

fn autocomplete_item(node: &Node) -> Option<String> {
    let item = match &node.kind {
        NodeKind::Subnet { subnet, .. } => subnet.clone(),
        _ => node.name.clone(),
    };
    (!item.is_empty() && !node.external).then_some(item)
}

/// Initial position of the `index`-th node on a sunflower spiral.
fn phyllotaxis(index: usize) -> Pos2 {
    const INITIAL_RADIUS: f32 = 10.0;
    let angle = PI * (3.0 - 5.0_f32.sqrt());
    let radius = INITIAL_RADIUS * (0.5 + index as f32).sqrt();
    let turn = index as f32 * angle;
    pos2(radius * turn.cos(), radius * turn.sin())
}

/// The ordered layer list; the head (index 0) is the current layer.
#[derive(Debug, Default)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Layer> {
        self.layers.first()
    }

    pub fn current_mut(&mut self) -> Option<&mut Layer> {
        self.layers.first_mut()
    }

    pub fn get(&self, key: LayerKey) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.key == key)
    }

    pub fn get_mut(&mut self, key: LayerKey) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.key == key)
    }

    /// Puts a layer on top, dimming the previous head.
    pub fn insert_head(&mut self, layer: Layer) {
        if let Some(head) = self.layers.first_mut() {
            if head.phase == LayerPhase::Active {
                head.phase = LayerPhase::Dimmed;
            }
        }
        self.layers.insert(0, layer);
    }

    /// Takes a layer out of the stack, re-activating the new head.
    pub fn remove(&mut self, key: LayerKey) -> Option<Layer> {
        let index = self.layers.iter().position(|layer| layer.key == key)?;
        let layer = self.layers.remove(index);
        if index == 0 {
            if let Some(head) = self.layers.first_mut() {
                if head.phase == LayerPhase::Dimmed {
                    head.phase = LayerPhase::Active;
                }
            }
        }
        Some(layer)
    }

    /// Removes every layer, head first.
    pub fn drain(&mut self) -> Vec<Layer> {
        std::mem::take(&mut self.layers)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.layers.iter_mut()
    }
}

/// Timing of a pushed layer's fade-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    pub delay: Duration,
    pub fade_duration: Duration,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            fade_duration: FADE_DURATION,
        }
    }
}

/// Pushes a new layer and fills it with the payload `data` resolves to.
///
/// The layer is created in the `Loading` phase with `processing` set, shown behind a loading
/// indicator, ingested and built once the data arrives, then faded in unless it is the first
/// layer. `processing` stays set; the caller clears it once its own pipeline is done.
///
/// A rejected fetch removes the half-built layer and propagates the error.
pub async fn push(
    diagram: &Diagram,
    id: &str,
    kind: LayerKind,
    data: LocalBoxFuture<'static, Result<RawGraph>>,
    options: PushOptions,
) -> Result<LayerKey> {
    let (key, initial) = {
        let mut guard = diagram.state_mut();
        let state = &mut *guard;
        let mut layer = Layer::new(id, kind, state.viewport_size, state.settings.scale_extent());
        layer.phase = LayerPhase::Loading;
        layer.processing = true;
        let key = layer.key;
        let initial = state.layers.is_empty();

        state.surface.create_layer(key, id, initial);
        state.surface.set_loading(true);
        state.layers.insert_head(layer);
        log::info!("pushing layer {id}");
        (key, initial)
    };

    let result = data.await;

    let mut guard = diagram.state_mut();
    let state = &mut *guard;
    let graph = match result {
        Ok(graph) => graph,
        Err(err) => {
            log::error!("loading layer {id} failed: {err}");
            state.layers.remove(key);
            state.surface.remove_layer(key);
            state.surface.set_loading(false);
            return Err(err);
        }
    };
    let Some(layer) = state.layers.get_mut(key) else {
        state.surface.set_loading(false);
        return Err(DiagramError::UnknownLayer(id.to_string()));
    };

    layer.ingest(graph);
    state.surface.build_layer(layer, &state.settings);
    state.surface.set_loading(false);
    layer.phase = LayerPhase::Active;
    if !initial {
        let fade = Fade::new(0.0, 1.0, Instant::now() + options.delay, options.fade_duration);
        state.surface.fade_layer(key, &fade);
        layer.fade = Some(fade);
    }
    Ok(key)
}

/// Closes a drilled-down layer.
///
/// The layer leaves the stack at once and fades out; its render resources are released once
/// the fade completes. The root layer cannot be popped, and neither can a layer that is in the
/// middle of a transition.
pub async fn pop(diagram: &Diagram, key: LayerKey) -> Result<()> {
    let fade = {
        let mut guard = diagram.state_mut();
        let state = &mut *guard;
        let now = Instant::now();
        let layer = state
            .layers
            .get_mut(key)
            .ok_or_else(|| DiagramError::UnknownLayer(key.to_string()))?;
        if layer.is_root() {
            return Err(DiagramError::RootLayer);
        }
        if layer.processing {
            return Err(DiagramError::LayerBusy(layer.id.clone()));
        }
        layer.processing = true;
        layer.phase = LayerPhase::FadingOut;
        if let Some(simulations) = &mut layer.simulations {
            simulations.stop();
        }
        let fade = Fade::new(layer.opacity(now), 0.0, now, FADE_DURATION);
        layer.fade = Some(fade.clone());
        log::info!("popping layer {}", layer.id);

        if let Some(layer) = state.layers.remove(key) {
            state.closing.push(layer);
        }
        state.surface.fade_layer(key, &fade);
        fade
    };

    tokio::time::sleep(fade.duration).await;

    let mut guard = diagram.state_mut();
    let state = &mut *guard;
    if let Some(index) = state.closing.iter().position(|layer| layer.key == key) {
        let mut layer = state.closing.remove(index);
        layer.phase = LayerPhase::Destroyed;
        log::debug!("layer {} destroyed", layer.id);
    }
    state.surface.remove_layer(key);
    Ok(())
}
