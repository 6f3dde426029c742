//! Drill-down: pushing a detailed layer scoped to a device or a subnet.
//!
//! Both pipelines run as a fixed sequence of steps over the new layer record: fetch, ingest,
//! arrange, frame the camera, restrict the viewport. The source layer is marked as processing
//! for the whole run so a second click cannot start a concurrent transition.

use crate::constants::*;
use crate::data::{self, Query};
use crate::diagram::Diagram;
use crate::error::{DiagramError, Result};
use crate::gesture::GestureContext;
use crate::grouping;
use crate::layers::{self, Layer, LayerKey, LayerKind, PushOptions};
use crate::simulation::SimulationPair;
use crate::types::{Node, NodeKind};
use crate::viewport;
use eframe::egui::{pos2, vec2, Pos2};
use futures::future::FutureExt;
use std::f32::consts::TAU;
use std::time::Duration;

/// Drills into the node named `node_name` on the current layer.
///
/// Requires the navigation modifier; without it the click is ignored. Unmanaged nodes have
/// nothing to drill into. Returns the key of the pushed layer.
pub async fn drill_down(
    diagram: &Diagram,
    node_name: &str,
    gesture: GestureContext,
) -> Result<Option<LayerKey>> {
    if !gesture.allows_navigate() {
        return Ok(None);
    }

    let (source_key, node) = {
        let mut state = diagram.state_mut();
        let layer = state
            .layers
            .current_mut()
            .ok_or_else(|| DiagramError::UnknownNode(node_name.to_string()))?;
        if layer.processing {
            return Err(DiagramError::LayerBusy(layer.id.clone()));
        }
        let index = layer
            .node_index(node_name)
            .ok_or_else(|| DiagramError::UnknownNode(node_name.to_string()))?;
        let node = layer.nodes[index].clone();
        if node.is_unmanaged() {
            log::debug!("{node_name} is unmanaged, nothing to drill into");
            return Ok(None);
        }
        layer.processing = true;
        (layer.key, node)
    };

    log::info!("drilling down into {}", node.name);
    let result = match &node.kind {
        NodeKind::Subnet { subnet, .. } => self::subnet(diagram, source_key, &node, subnet).await,
        _ => device(diagram, source_key, &node).await,
    };

    let mut state = diagram.state_mut();
    if let Some(layer) = state.layers.get_mut(source_key) {
        layer.processing = false;
    }
    let key = result?;
    if let Some(layer) = state.layers.get_mut(key) {
        layer.processing = false;
    }
    Ok(Some(key))
}

/// Device drill-down: the device in the middle, its neighbours on a circle around it.
async fn device(diagram: &Diagram, source_key: LayerKey, node: &Node) -> Result<LayerKey> {
    let target_zoom = focus_source(diagram, source_key, node).await;

    let fetch = diagram.source().fetch(&Query::Device(node.name.clone()));
    let raw = data::to_raw(node);
    let payload = async move { Ok(data::device_payload(raw, fetch.await?)) }.boxed_local();
    let key = layers::push(diagram, &node.name, LayerKind::Device, payload, PushOptions::default())
        .await?;

    let center = {
        let mut guard = diagram.state_mut();
        let state = &mut *guard;
        let layer = state
            .layers
            .get_mut(key)
            .ok_or_else(|| DiagramError::UnknownLayer(node.name.clone()))?;
        let size = layer.viewport.size;
        let center = pos2(size.x / 2.0, size.y / 2.0);
        arrange_radially(layer, center, size.x.max(size.y) + DRILL_DOWN_RADIUS_MARGIN);
        state.surface.update_positions(layer);
        center
    };

    viewport::focus(diagram, key, center, target_zoom, Duration::ZERO).await;

    let mut guard = diagram.state_mut();
    let state = &mut *guard;
    if let Some(layer) = state.layers.get_mut(key) {
        layer.viewport.restrict_to_visible();
        layer
            .viewport
            .set_scale_extent(target_zoom, state.settings.max_zoom_in);
    }
    Ok(key)
}

/// Centers the clicked node on the source layer, zooming in to at least the drill-down zoom.
/// Returns the zoom used.
async fn focus_source(diagram: &Diagram, source_key: LayerKey, node: &Node) -> f32 {
    let target_zoom = {
        let state = diagram.state();
        let current = state
            .layers
            .get(source_key)
            .map_or(DRILL_DOWN_MIN_ZOOM, |layer| layer.viewport.transform.k);
        current.max(DRILL_DOWN_MIN_ZOOM)
    };
    viewport::focus_on_node(diagram, source_key, node.pos, target_zoom, FOCUS_DURATION).await;
    target_zoom
}

/// Pins the first node at `center` and the rest on a circle around it, one slot per link.
fn arrange_radially(layer: &mut Layer, center: Pos2, radius: f32) {
    let slots = layer.edges.len().max(layer.nodes.len().saturating_sub(1)).max(1);
    let separation = TAU / slots as f32;
    for (index, node) in layer.nodes.iter_mut().enumerate() {
        if index == 0 {
            node.pin_at(center);
            continue;
        }
        let angle = separation * (index - 1) as f32;
        node.pin_at(center + vec2(angle.cos(), angle.sin()) * radius);
    }
}

/// Subnet drill-down: internal devices settle inside a group box, neighbours from outside the
/// subnet are pinned on an arc around it.
async fn subnet(
    diagram: &Diagram,
    source_key: LayerKey,
    node: &Node,
    subnet: &str,
) -> Result<LayerKey> {
    focus_source(diagram, source_key, node).await;

    let fetch = diagram.source().fetch(&Query::Subnet(subnet.to_string()));
    let name = subnet.to_string();
    let payload = async move { Ok(data::subnet_payload(&name, fetch.await?)) }.boxed_local();
    let options = PushOptions {
        delay: Duration::ZERO,
        fade_duration: SUBNET_FADE_DURATION,
    };
    let key = layers::push(diagram, &node.name, LayerKind::Subnet, payload, options).await?;

    let area = {
        let mut guard = diagram.state_mut();
        let state = &mut *guard;
        let settings = &state.settings;
        let layer = state
            .layers
            .get_mut(key)
            .ok_or_else(|| DiagramError::UnknownLayer(node.name.clone()))?;

        let mut simulations = SimulationPair::new(!layer.groups.is_empty());
        grouping::setup(&mut simulations, settings.grouping);
        layer.simulations = Some(simulations);
        if let Some(record) =
            state
                .persistence
                .load_layout(&state.store, settings.layout.as_ref(), &layer.id)
        {
            let restored = record.apply(&mut layer.nodes, &mut layer.groups);
            log::debug!("restored {restored} fixed positions on {}", layer.id);
        }
        grouping::derive_all(layer, settings.group_padding);

        let internal = layer
            .nodes
            .iter()
            .filter(|node| !node.external)
            .map(|node| node.pos);
        let Some(geometry) = grouping::derive_geometry(internal, settings.group_padding) else {
            log::warn!("subnet {subnet} has no internal devices");
            return Ok(key);
        };
        let radius = layer.viewport.size.x.max(layer.viewport.size.y) + DRILL_DOWN_RADIUS_MARGIN;
        pin_externals(layer, geometry.center(), radius);

        layer.settle(settings, SUBNET_SETTLE_TICKS);
        grouping::derive_all(layer, settings.group_padding);
        state.surface.update_positions(layer);
        state.surface.update_groups(layer);

        let internal = layer
            .nodes
            .iter()
            .filter(|node| !node.external)
            .map(|node| node.pos);
        grouping::derive_geometry(internal, settings.group_padding)
            .map_or(geometry.rect, |geometry| geometry.rect)
    };

    viewport::focus_on_area(diagram, key, area, FOCUS_DURATION).await;

    let mut guard = diagram.state_mut();
    let state = &mut *guard;
    if let Some(layer) = state.layers.get_mut(key) {
        layer.viewport.restrict_to_visible();
        let entry_zoom = layer.viewport.transform.k;
        layer
            .viewport
            .set_scale_extent(entry_zoom, state.settings.max_zoom_in);
    }
    Ok(key)
}

/// Pins external nodes on a circle around `center`, at most half a radian apart.
fn pin_externals(layer: &mut Layer, center: Pos2, radius: f32) {
    let count = layer.nodes.iter().filter(|node| node.external).count();
    if count == 0 {
        return;
    }
    let separation = (TAU / count as f32).min(SUBNET_MAX_SEPARATION);
    for (slot, node) in layer.nodes.iter_mut().filter(|node| node.external).enumerate() {
        let angle = separation * slot as f32;
        node.pin_at(center + vec2(angle.cos(), angle.sin()) * radius);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticSource;
    use crate::persistence::{FixedEntry, KeyValueStore, LayoutRecord, MemoryStore, Store};
    use crate::render::RecordingSurface;
    use crate::settings::SettingsPatch;
    use crate::types::{RawGraph, RawLink, RawNode};
    use std::rc::Rc;

    fn topology() -> RawGraph {
        RawGraph {
            devices: vec![
                RawNode::named("core"),
                RawNode::named("sw1"),
                RawNode::named("sw2"),
                RawNode::named("isp"),
                RawNode {
                    is_unmanaged: true,
                    ..RawNode::named("unknown")
                },
            ],
            groups: None,
            links: vec![
                RawLink::new("core", "sw1"),
                RawLink::new("core", "sw2"),
                RawLink::new("core", "isp"),
                RawLink::new("core", "unknown"),
            ],
            subnets: vec![RawNode {
                subnet: Some("10.0.0.0".into()),
                ..RawNode::named("Cloud-10.0.0.0")
            }],
        }
    }

    fn subnet_response() -> RawGraph {
        RawGraph {
            devices: vec![RawNode::named("sw1"), RawNode::named("sw2")],
            groups: None,
            links: vec![
                RawLink::new("sw1", "sw2"),
                RawLink::new("sw1", "core"),
                RawLink::new("sw2", "isp"),
                RawLink::new("sw2", "dmz"),
            ],
            subnets: Vec::new(),
        }
    }

    async fn diagram_with(store: Store) -> Diagram {
        let source = StaticSource::new(topology()).with_subnet("10.0.0.0", subnet_response());
        Diagram::create(
            "test",
            SettingsPatch::default(),
            Box::new(RecordingSurface::new()),
            Rc::new(source),
            store,
            vec2(800.0, 600.0),
        )
        .await
        .unwrap()
    }

    async fn diagram() -> Diagram {
        diagram_with(Store::unavailable("test")).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_drill_down_pins_externals_on_capped_arc() {
        let diagram = diagram().await;
        let key = drill_down(&diagram, "Cloud-10.0.0.0", GestureContext::navigate())
            .await
            .unwrap()
            .unwrap();

        let state = diagram.state();
        let layer = state.layers.current().unwrap();
        assert_eq!(layer.key, key);
        assert_eq!(layer.kind, LayerKind::Subnet);
        assert!(!layer.processing);

        let externals: Vec<&Node> = layer.nodes.iter().filter(|n| n.external).collect();
        assert_eq!(externals.len(), 3);
        assert!(externals.iter().all(|n| n.is_fixed()));
        assert!(layer.nodes.iter().filter(|n| !n.external).all(|n| !n.is_fixed()));

        let radius = 800.0 + DRILL_DOWN_RADIUS_MARGIN;
        let chord = 2.0 * radius * (SUBNET_MAX_SEPARATION / 2.0).sin();
        for pair in externals.windows(2) {
            let gap = pair[0].pos.distance(pair[1].pos);
            assert!((gap - chord).abs() < 0.5, "gap {gap} vs {chord}");
        }

        let rect = layer.groups[0].geometry.as_ref().unwrap().rect;
        assert!(layer
            .nodes
            .iter()
            .filter(|n| !n.external)
            .all(|n| n.group == Some(0) && rect.contains(n.pos)));
        for external in &externals {
            assert_eq!(external.group, None, "{} joined the subnet group", external.name);
            assert!(!rect.contains(external.pos), "{} inside the group box", external.name);
        }

        assert!(layer.viewport.translate_extent.is_some());
        assert_eq!(layer.viewport.scale_extent.0, layer.viewport.transform.k);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_drill_down_zooms_into_cloud_first() {
        let diagram = diagram().await;
        let cloud = {
            let state = diagram.state();
            let root = state.layers.current().unwrap();
            assert!(root.viewport.transform.k < DRILL_DOWN_MIN_ZOOM);
            root.nodes.iter().find(|n| n.name == "Cloud-10.0.0.0").unwrap().pos
        };

        drill_down(&diagram, "Cloud-10.0.0.0", GestureContext::navigate())
            .await
            .unwrap()
            .unwrap();

        let state = diagram.state();
        let root = state.layers.iter().find(|layer| layer.is_root()).unwrap();
        let transform = root.viewport.transform;
        assert!((transform.k - DRILL_DOWN_MIN_ZOOM).abs() < 1e-4);
        let center = transform.apply(cloud);
        assert!(center.distance(pos2(400.0, 300.0)) < 0.5, "{center:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_drill_down_restores_stored_layout() {
        let memory = MemoryStore::default();
        let record = LayoutRecord {
            nodes: vec![FixedEntry {
                name: "sw1".into(),
                fx: Some(50.0),
                fy: Some(60.0),
            }],
            groups: Vec::new(),
        };
        memory.set(
            "test.Cloud-10.0.0.0.layout",
            &serde_json::to_string(&record).unwrap(),
        );
        let diagram = diagram_with(Store::new("test", Some(Box::new(memory)))).await;

        drill_down(&diagram, "Cloud-10.0.0.0", GestureContext::navigate())
            .await
            .unwrap()
            .unwrap();

        let state = diagram.state();
        let layer = state.layers.current().unwrap();
        let sw1 = layer.nodes.iter().find(|n| n.name == "sw1").unwrap();
        assert_eq!(sw1.fixed_pos(), Some(pos2(50.0, 60.0)));
        assert_eq!(sw1.pos, pos2(50.0, 60.0));
        let sw2 = layer.nodes.iter().find(|n| n.name == "sw2").unwrap();
        assert!(!sw2.is_fixed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_drill_down_places_neighbours_on_circle() {
        let diagram = diagram().await;
        drill_down(&diagram, "core", GestureContext::navigate())
            .await
            .unwrap()
            .unwrap();

        let state = diagram.state();
        let layer = state.layers.current().unwrap();
        assert_eq!(layer.kind, LayerKind::Device);
        assert!(layer.simulations.is_none());
        assert_eq!(layer.nodes[0].name, "core");
        assert_eq!(layer.nodes[0].fixed_pos(), Some(pos2(400.0, 300.0)));
        assert_eq!(layer.edges.len(), 4);

        let radius = 800.0 + DRILL_DOWN_RADIUS_MARGIN;
        for node in &layer.nodes[1..] {
            assert!((node.pos.distance(pos2(400.0, 300.0)) - radius).abs() < 0.01);
        }
        assert!(layer.viewport.transform.k >= DRILL_DOWN_MIN_ZOOM);
        assert!(layer.viewport.scale_extent.0 >= DRILL_DOWN_MIN_ZOOM);
        assert_eq!(state.layers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drill_down_needs_modifier_and_managed_node() {
        let diagram = diagram().await;
        assert_eq!(
            drill_down(&diagram, "core", GestureContext::rearrange()).await.unwrap(),
            None
        );
        assert_eq!(
            drill_down(&diagram, "unknown", GestureContext::navigate()).await.unwrap(),
            None
        );
        assert!(matches!(
            drill_down(&diagram, "ghost", GestureContext::navigate()).await,
            Err(DiagramError::UnknownNode(_))
        ));
        assert_eq!(diagram.state().layers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_layer_rejects_drill_down() {
        let diagram = diagram().await;
        diagram.state_mut().layers.current_mut().unwrap().processing = true;
        assert!(matches!(
            drill_down(&diagram, "core", GestureContext::navigate()).await,
            Err(DiagramError::LayerBusy(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_fetch_propagates_and_unlocks_source() {
        let diagram = diagram().await;
        let result = drill_down(&diagram, "sw1", GestureContext::navigate()).await;
        assert!(result.is_ok());

        diagram.state_mut().source = Rc::new(StaticSource::new(RawGraph::default()));
        let result = drill_down(&diagram, "sw1", GestureContext::navigate()).await;
        assert!(matches!(result, Err(DiagramError::DataSource { .. })));
        let state = diagram.state();
        assert_eq!(state.layers.len(), 2);
        assert!(!state.layers.current().unwrap().processing);
    }
}
