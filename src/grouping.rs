//! Group management: geometry, pinning, focus and drag protocols.
//!
//! A group's box is derived from its members every group tick unless the group is locked.
//! Groups and nodes are dragged with pins; on release the pins are either kept, which persists
//! the arrangement, or dropped when float mode is on or the dropped box lands on a box that was
//! already fixed.

use crate::constants::{CLOSE_BUTTON_OFFSET, DRAG_ALPHA_TARGET};
use crate::diagram::DiagramState;
use crate::gesture::GestureContext;
use crate::layers::Layer;
use crate::settings::Settings;
use crate::simulation::forces::{group_members, is_group_fixed};
use crate::simulation::{NodeForces, SimulationPair};
use crate::types::{GroupGeometry, Node};
use eframe::egui::{pos2, Pos2, Rect, Vec2};
use tokio::time::Instant;

/// Derives a group's geometry from its member positions.
///
/// The raw bounds are the min/max of the points, the box is those bounds grown by `padding` on
/// every side and the polygon is the convex hull of the box corners. Returns `None` for an
/// empty member set.
pub fn derive_geometry(points: impl IntoIterator<Item = Pos2>, padding: f32) -> Option<GroupGeometry> {
    let mut points = points.into_iter();
    let first = points.next()?;
    let bounds = points.fold(Rect::from_min_max(first, first), |rect, point| {
        rect.union(Rect::from_min_max(point, point))
    });
    let rect = bounds.expand(padding);
    let corners = vec![
        rect.min,
        pos2(rect.max.x, rect.min.y),
        rect.max,
        pos2(rect.min.x, rect.max.y),
    ];
    Some(GroupGeometry {
        bounds,
        rect,
        polygon: convex_hull(corners),
    })
}

/// Convex hull via monotone chain, counter-clockwise in screen orientation.
pub fn convex_hull(mut points: Vec<Pos2>) -> Vec<Pos2> {
    if points.len() < 3 {
        return points;
    }
    points.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    fn cross(o: Pos2, a: Pos2, b: Pos2) -> f32 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }
    let mut lower: Vec<Pos2> = Vec::new();
    for p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], *p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Pos2> = Vec::new();
    for p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], *p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Recomputes the geometry of every unlocked group from its current members.
///
/// Does nothing while grouping is off. Groups without members keep their last geometry.
/// Returns true if any geometry changed.
pub fn update(layer: &mut Layer, settings: &Settings) -> bool {
    if !settings.grouping || layer.groups.is_empty() {
        return false;
    }
    refresh(layer, settings.group_padding, false)
}

/// Derives geometry for every group, locked or not.
pub fn derive_all(layer: &mut Layer, padding: f32) -> bool {
    refresh(layer, padding, true)
}

fn refresh(layer: &mut Layer, padding: f32, include_locked: bool) -> bool {
    let members = group_members(&layer.nodes, layer.groups.len());
    let mut changed = false;
    for group in &mut layer.groups {
        if group.locked && !include_locked {
            continue;
        }
        let points = members[group.id].iter().map(|&index| layer.nodes[index].pos);
        if let Some(geometry) = derive_geometry(points, padding) {
            if group.geometry.as_ref() != Some(&geometry) {
                group.geometry = Some(geometry);
                changed = true;
            }
        }
    }
    changed
}

/// Whether two boxes touch, treating boxes within `border` of each other as touching.
pub fn have_intersection(a: Rect, b: Rect, border: f32) -> bool {
    !(b.min.x - border > a.max.x
        || b.max.x < a.min.x - border
        || b.min.y - border > a.max.y
        || b.max.y < a.min.y - border)
}

/// Groups that are pinned or contain at least one pinned member, optionally excluding one.
pub fn get_fixed(layer: &Layer, excluding: Option<usize>) -> Vec<usize> {
    let members = group_members(&layer.nodes, layer.groups.len());
    layer
        .groups
        .iter()
        .filter(|group| Some(group.id) != excluding)
        .filter(|group| is_group_fixed(group, &members[group.id], &layer.nodes, layer.focused_group))
        .map(|group| group.id)
        .collect()
}

/// Translates nodes by `delta`.
///
/// Each node is re-pinned at its new position if it was pinned before or `force_lock` is set.
pub fn move_nodes(nodes: &mut [Node], indices: &[usize], delta: Vec2, force_lock: bool) {
    for &index in indices {
        let node = &mut nodes[index];
        node.pos += delta;
        if node.fx.is_some() || force_lock {
            node.fx = Some(node.pos.x);
        }
        if node.fy.is_some() || force_lock {
            node.fy = Some(node.pos.y);
        }
    }
}

/// Keeps the members of the focused group inside the group's raw bounds.
pub fn clamp_focused_members(layer: &mut Layer) {
    let Some(bounds) = layer
        .focused_group
        .and_then(|id| layer.groups.get(id))
        .and_then(|group| group.geometry.as_ref())
        .map(|geometry| geometry.bounds)
    else {
        return;
    };
    let Some(id) = layer.focused_group else {
        return;
    };
    for node in layer.nodes.iter_mut().filter(|node| node.group == Some(id)) {
        node.pos = node.pos.clamp(bounds.min, bounds.max);
    }
}

/// Applies the force strengths of a grouping mode; turning grouping off stops the group
/// simulation.
pub fn setup(simulations: &mut SimulationPair, grouping: bool) {
    simulations.forces = NodeForces::for_grouping(grouping);
    if !grouping {
        if let Some(groups) = &mut simulations.groups {
            groups.stop();
        }
    }
}

/// Switches a layer to the grouping mode `grouping`.
///
/// Every node swaps its position with the one stashed by the previous toggle, and both
/// simulations swap their alpha with the one saved by the previous toggle (or restart hot on
/// the first toggle) before resuming.
pub fn toggle(layer: &mut Layer, grouping: bool) -> bool {
    if layer.groups.is_empty() {
        return false;
    }

    for node in &mut layer.nodes {
        if let Some(stashed) = node.stash.replace(node.pos) {
            node.pos = stashed;
        }
    }

    if let Some(simulations) = &mut layer.simulations {
        let previous = simulations.nodes.previous_alpha.replace(simulations.nodes.alpha);
        let previous_groups = simulations
            .groups
            .as_mut()
            .and_then(|groups| groups.previous_alpha.replace(groups.alpha));

        simulations.nodes.alpha = previous.unwrap_or(1.0);
        if let Some(groups) = &mut simulations.groups {
            groups.alpha = match previous {
                Some(_) => previous_groups.unwrap_or(1.0),
                None => 1.0,
            };
        }

        setup(simulations, grouping);

        if grouping {
            if let Some(groups) = &mut simulations.groups {
                groups.alpha_target = 0.0;
                groups.restart();
            }
        }
        simulations.nodes.alpha_target = 0.0;
        simulations.nodes.restart();
    }
    true
}

/// Position of the dismiss button of a focused group.
pub fn close_button_position(geometry: &GroupGeometry) -> Pos2 {
    pos2(
        geometry.x() + geometry.width() - CLOSE_BUTTON_OFFSET.0,
        geometry.y() - CLOSE_BUTTON_OFFSET.1,
    )
}

/// Focuses a group on the current layer and returns the area the camera should frame.
///
/// Any previously focused group is released first. The focused group is locked, its overlay
/// hidden and its dismiss button shown.
pub fn focus(state: &mut DiagramState, group: usize, now: Instant) -> Option<Rect> {
    unfocus(state, None, now);
    let layer = state.layers.current_mut()?;
    let key = layer.key;
    let target = layer.groups.get_mut(group)?;
    let geometry = target.geometry.clone()?;
    target.locked = true;
    layer.focused_group = Some(group);

    state.surface.set_group_overlay_visible(key, group, false);
    state
        .surface
        .set_close_button(key, Some(close_button_position(&geometry)));
    log::debug!("focused group {}", target.name);
    Some(geometry.rect)
}

/// Releases the focused group of the current layer, optionally zooming to `target_scale`.
///
/// Returns false if no group was focused.
pub fn unfocus(state: &mut DiagramState, target_scale: Option<f32>, now: Instant) -> bool {
    let Some(layer) = state.layers.current_mut() else {
        return false;
    };
    let Some(id) = layer.focused_group.take() else {
        return false;
    };
    if let Some(scale) = target_scale {
        layer.viewport.scale_to(scale, now);
    }
    if let Some(group) = layer.groups.get_mut(id) {
        group.locked = false;
    }
    state.surface.set_close_button(layer.key, None);
    state.surface.set_group_overlay_visible(layer.key, id, true);
    true
}

/// A group drag in progress.
#[derive(Debug, Clone)]
pub struct GroupDrag {
    pub group: usize,
    start: Pos2,
    fixed: Vec<usize>,
}

/// A node drag in progress.
#[derive(Debug, Clone)]
pub struct NodeDrag {
    pub node: usize,
    bounds: Option<Rect>,
    fixed: Vec<usize>,
}

/// How a drag ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragRelease {
    /// Pins were kept
    Pinned,
    /// Pins were released (float mode or landed on a fixed group)
    Floating,
}

fn raise(layer: &mut Layer, gesture: GestureContext, include_groups: bool) {
    if gesture.active {
        return;
    }
    if let Some(simulations) = &mut layer.simulations {
        simulations.reheat(DRAG_ALPHA_TARGET, include_groups);
    }
}

fn cool(layer: &mut Layer, gesture: GestureContext) {
    if gesture.active {
        return;
    }
    if let Some(simulations) = &mut layer.simulations {
        simulations.release(0.0);
    }
}

/// Starts dragging a whole group.
///
/// Rejected with the interaction modifier held or when the group is the focused one. Members
/// are pinned at their current positions and the already-fixed siblings are remembered.
pub fn begin_group_drag(
    layer: &mut Layer,
    group: usize,
    pointer: Pos2,
    gesture: GestureContext,
) -> Option<GroupDrag> {
    if !gesture.allows_rearrange() || layer.focused_group == Some(group) {
        return None;
    }
    let origin = layer.groups.get(group)?.geometry.as_ref()?.rect.min;

    raise(layer, gesture, true);
    layer.groups[group].drag_origin = Some(origin);
    for node in layer.nodes.iter_mut().filter(|node| node.group == Some(group)) {
        node.pin();
        node.drag_origin = Some(node.pos);
    }
    let fixed = get_fixed(layer, Some(group));
    Some(GroupDrag {
        group,
        start: pointer,
        fixed,
    })
}

/// Moves the dragged group's members and pin by the pointer travel since the drag started.
pub fn drag_group(layer: &mut Layer, drag: &GroupDrag, pointer: Pos2, gesture: GestureContext) {
    if !gesture.allows_rearrange() || layer.focused_group == Some(drag.group) {
        return;
    }
    let delta = pointer - drag.start;
    for node in layer.nodes.iter_mut().filter(|node| node.group == Some(drag.group)) {
        if let Some(origin) = node.drag_origin {
            node.pin_at(origin + delta);
        }
    }
    if let Some(group) = layer.groups.get_mut(drag.group) {
        if let Some(origin) = group.drag_origin {
            group.fx = Some(origin.x + delta.x);
            group.fy = Some(origin.y + delta.y);
        }
    }
}

/// Finishes a group drag, keeping or releasing the pins.
pub fn end_group_drag(
    layer: &mut Layer,
    drag: GroupDrag,
    settings: &Settings,
    gesture: GestureContext,
) -> Option<DragRelease> {
    if !gesture.allows_rearrange() {
        return None;
    }
    cool(layer, gesture);
    update(layer, settings);

    let rect = layer
        .groups
        .get(drag.group)
        .and_then(|group| group.geometry.as_ref())
        .map(|geometry| geometry.rect);
    let release = settings.float_mode || lands_on_fixed(layer, &drag.fixed, rect, settings);

    for node in layer.nodes.iter_mut().filter(|node| node.group == Some(drag.group)) {
        node.drag_origin = None;
        if release {
            node.release();
        }
    }
    if let Some(group) = layer.groups.get_mut(drag.group) {
        group.drag_origin = None;
        if release {
            group.release();
        }
    }
    Some(if release {
        DragRelease::Floating
    } else {
        DragRelease::Pinned
    })
}

fn lands_on_fixed(layer: &Layer, fixed: &[usize], rect: Option<Rect>, settings: &Settings) -> bool {
    let Some(rect) = rect else {
        return false;
    };
    fixed.iter().any(|&id| {
        layer
            .groups
            .get(id)
            .and_then(|group| group.geometry.as_ref())
            .is_some_and(|geometry| have_intersection(geometry.rect, rect, settings.group_border_width))
    })
}

/// Starts dragging a single node.
///
/// Rejected with the interaction modifier held. Inside a focused group the group is locked and
/// the node may only follow the pointer within the group's inner box.
pub fn begin_node_drag(
    layer: &mut Layer,
    node: usize,
    settings: &Settings,
    gesture: GestureContext,
) -> Option<NodeDrag> {
    if !gesture.allows_rearrange() || node >= layer.nodes.len() {
        return None;
    }
    raise(layer, gesture, settings.grouping);
    layer.nodes[node].pin();

    let bounds = match layer.focused_group {
        Some(id) => layer.groups.get_mut(id).and_then(|group| {
            group.locked = true;
            let rect = group.geometry.as_ref()?.rect;
            Some(rect.shrink(settings.group_padding))
        }),
        None => None,
    };
    let fixed = get_fixed(layer, layer.nodes[node].group);
    Some(NodeDrag {
        node,
        bounds,
        fixed,
    })
}

/// Moves the dragged node's pin to the pointer, axis by axis, within the drag bounds.
pub fn drag_node(layer: &mut Layer, drag: &NodeDrag, pointer: Pos2, gesture: GestureContext) {
    if !gesture.allows_rearrange() {
        return;
    }
    let Some(node) = layer.nodes.get_mut(drag.node) else {
        return;
    };
    let inside_x = drag
        .bounds
        .is_none_or(|b| pointer.x > b.min.x && pointer.x < b.max.x);
    let inside_y = drag
        .bounds
        .is_none_or(|b| pointer.y > b.min.y && pointer.y < b.max.y);
    if inside_x {
        node.fx = Some(pointer.x);
        node.pos.x = pointer.x;
    }
    if inside_y {
        node.fy = Some(pointer.y);
        node.pos.y = pointer.y;
    }
}

/// Finishes a node drag, keeping or releasing the node's pin.
pub fn end_node_drag(
    layer: &mut Layer,
    drag: NodeDrag,
    settings: &Settings,
    gesture: GestureContext,
) -> Option<DragRelease> {
    if !gesture.allows_rearrange() {
        return None;
    }
    cool(layer, gesture);
    if !layer.groups.is_empty() {
        update(layer, settings);
    }

    let rect = layer
        .nodes
        .get(drag.node)
        .and_then(|node| node.group)
        .and_then(|id| layer.groups.get(id))
        .and_then(|group| group.geometry.as_ref())
        .map(|geometry| geometry.rect);
    let release = settings.float_mode || lands_on_fixed(layer, &drag.fixed, rect, settings);
    if release {
        if let Some(node) = layer.nodes.get_mut(drag.node) {
            node.release();
        }
    }
    Some(if release {
        DragRelease::Floating
    } else {
        DragRelease::Pinned
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Layer, LayerKind};
    use crate::types::{Group, NodeKind};
    use eframe::egui::vec2;

    fn layer() -> Layer {
        let mut layer = Layer::new("main", LayerKind::Root, vec2(800.0, 600.0), (0.1, 8.0));
        layer.nodes = vec![
            Node::new("a", NodeKind::Device).at(pos2(0.0, 0.0)).in_group(0),
            Node::new("b", NodeKind::Device).at(pos2(40.0, 20.0)).in_group(0),
            Node::new("c", NodeKind::Device).at(pos2(400.0, 0.0)).in_group(1),
            Node::new("d", NodeKind::Device).at(pos2(440.0, 30.0)).in_group(1),
        ];
        layer.groups = vec![Group::new(0, "left"), Group::new(1, "right")];
        layer.simulations = Some(SimulationPair::new(true));
        derive_all(&mut layer, 75.0);
        layer
    }

    #[test]
    fn test_padded_box_contains_members() {
        let layer = layer();
        for group in &layer.groups {
            let geometry = group.geometry.as_ref().unwrap();
            for node in layer.nodes.iter().filter(|n| n.group == Some(group.id)) {
                assert!(geometry.bounds.contains(node.pos));
                assert!(geometry.rect.shrink(75.0).contains(node.pos));
            }
        }
        let left = layer.groups[0].geometry.as_ref().unwrap();
        assert_eq!(left.rect, Rect::from_min_max(pos2(-75.0, -75.0), pos2(115.0, 95.0)));
        assert_eq!(left.center(), pos2(20.0, 10.0));
        assert_eq!(left.polygon.len(), 4);
    }

    #[test]
    fn test_empty_member_set_has_no_geometry() {
        assert!(derive_geometry(std::iter::empty(), 10.0).is_none());
    }

    #[test]
    fn test_have_intersection_uses_border_tolerance() {
        let a = Rect::from_min_max(pos2(0.0, 0.0), pos2(10.0, 10.0));
        let b = Rect::from_min_max(pos2(15.0, 0.0), pos2(25.0, 10.0));
        assert!(!have_intersection(a, b, 4.0));
        assert!(have_intersection(a, b, 5.0));
    }

    #[test]
    fn test_get_fixed_reports_groups_with_pinned_members() {
        let mut layer = layer();
        assert!(get_fixed(&layer, None).is_empty());
        layer.nodes[2].pin();
        assert_eq!(get_fixed(&layer, None), vec![1]);
        assert!(get_fixed(&layer, Some(1)).is_empty());
    }

    #[test]
    fn test_move_nodes_repins_pinned_or_forced() {
        let mut layer = layer();
        layer.nodes[0].pin();
        move_nodes(&mut layer.nodes, &[0, 1], vec2(5.0, 5.0), false);
        assert_eq!(layer.nodes[0].fixed_pos(), Some(pos2(5.0, 5.0)));
        assert!(!layer.nodes[1].is_fixed());

        move_nodes(&mut layer.nodes, &[1], vec2(1.0, 0.0), true);
        assert_eq!(layer.nodes[1].fixed_pos(), Some(pos2(46.0, 25.0)));
    }

    #[test]
    fn test_toggle_twice_restores_cooling() {
        let mut layer = layer();
        {
            let simulations = layer.simulations.as_mut().unwrap();
            simulations.nodes.alpha = 0.42;
            simulations.groups.as_mut().unwrap().alpha = 0.17;
        }
        let before = layer.simulations.clone().unwrap();
        let positions: Vec<Pos2> = layer.nodes.iter().map(|n| n.pos).collect();

        assert!(toggle(&mut layer, false));
        let during = layer.simulations.as_ref().unwrap();
        assert_eq!(during.nodes.alpha, 1.0);
        assert_eq!(during.forces, NodeForces::for_grouping(false));
        assert!(!during.groups.as_ref().unwrap().is_running());

        assert!(toggle(&mut layer, true));
        let after = layer.simulations.as_ref().unwrap();
        assert_eq!(after.nodes.alpha, before.nodes.alpha);
        assert_eq!(after.nodes.alpha_target, before.nodes.alpha_target);
        assert_eq!(after.groups.as_ref().unwrap().alpha, 0.17);
        assert_eq!(after.forces, before.forces);
        assert_eq!(layer.nodes.iter().map(|n| n.pos).collect::<Vec<_>>(), positions);
    }

    #[test]
    fn test_toggle_without_groups_is_noop() {
        let mut layer = layer();
        layer.groups.clear();
        assert!(!toggle(&mut layer, false));
    }

    #[test]
    fn test_group_drag_in_float_mode_releases_pins() {
        let mut layer = layer();
        layer.nodes[2].pin();
        let settings = Settings::default();
        let gesture = GestureContext::rearrange();

        let drag = begin_group_drag(&mut layer, 0, pos2(0.0, 0.0), gesture).unwrap();
        assert_eq!(drag.fixed, vec![1]);
        assert_eq!(
            layer.simulations.as_ref().unwrap().nodes.alpha_target,
            DRAG_ALPHA_TARGET
        );
        drag_group(&mut layer, &drag, pos2(350.0, 0.0), gesture);
        assert_eq!(layer.nodes[0].fixed_pos(), Some(pos2(350.0, 0.0)));

        let release = end_group_drag(&mut layer, drag, &settings, gesture);
        assert_eq!(release, Some(DragRelease::Floating));
        assert!(!layer.nodes[0].is_fixed());
        assert!(!layer.groups[0].is_pinned());
        assert_eq!(layer.simulations.as_ref().unwrap().nodes.alpha_target, 0.0);
    }

    #[test]
    fn test_group_drag_onto_fixed_sibling_releases_pins_without_float_mode() {
        let mut layer = layer();
        layer.nodes[2].pin();
        let settings = Settings {
            float_mode: false,
            ..Settings::default()
        };
        let gesture = GestureContext::rearrange();

        let drag = begin_group_drag(&mut layer, 0, pos2(0.0, 0.0), gesture).unwrap();
        drag_group(&mut layer, &drag, pos2(350.0, 0.0), gesture);
        let release = end_group_drag(&mut layer, drag, &settings, gesture);

        assert_eq!(release, Some(DragRelease::Floating));
        assert!(!layer.nodes[0].is_fixed());
    }

    #[test]
    fn test_group_drag_clear_of_siblings_stays_pinned_without_float_mode() {
        let mut layer = layer();
        let settings = Settings {
            float_mode: false,
            ..Settings::default()
        };
        let gesture = GestureContext::rearrange();

        let drag = begin_group_drag(&mut layer, 0, pos2(0.0, 0.0), gesture).unwrap();
        drag_group(&mut layer, &drag, pos2(-500.0, 0.0), gesture);
        let release = end_group_drag(&mut layer, drag, &settings, gesture);

        assert_eq!(release, Some(DragRelease::Pinned));
        assert_eq!(layer.nodes[0].fixed_pos(), Some(pos2(-500.0, 0.0)));
        assert!(layer.groups[0].is_pinned());
    }

    #[test]
    fn test_drag_with_modifier_is_ignored() {
        let mut layer = layer();
        assert!(begin_group_drag(&mut layer, 0, Pos2::ZERO, GestureContext::navigate()).is_none());
        assert!(begin_node_drag(&mut layer, 0, &Settings::default(), GestureContext::navigate()).is_none());
        assert!(!layer.nodes[0].is_fixed());
    }

    #[test]
    fn test_node_drag_in_focused_group_stays_inside_inner_box() {
        let mut layer = layer();
        layer.focused_group = Some(0);
        let settings = Settings {
            float_mode: false,
            ..Settings::default()
        };
        let gesture = GestureContext::rearrange();

        let drag = begin_node_drag(&mut layer, 0, &settings, gesture).unwrap();
        assert!(layer.groups[0].locked);

        drag_node(&mut layer, &drag, pos2(10.0, 10.0), gesture);
        assert_eq!(layer.nodes[0].fixed_pos(), Some(pos2(10.0, 10.0)));

        drag_node(&mut layer, &drag, pos2(900.0, 15.0), gesture);
        assert_eq!(layer.nodes[0].fixed_pos(), Some(pos2(10.0, 15.0)));

        assert_eq!(
            end_node_drag(&mut layer, drag, &settings, gesture),
            Some(DragRelease::Pinned)
        );
    }

    #[test]
    fn test_clamp_focused_members() {
        let mut layer = layer();
        layer.focused_group = Some(0);
        layer.nodes[1].pos = pos2(500.0, -300.0);
        clamp_focused_members(&mut layer);
        assert_eq!(layer.nodes[1].pos, pos2(40.0, 0.0));
        assert_eq!(layer.nodes[2].pos, pos2(400.0, 0.0));
    }

    #[test]
    fn test_close_button_sits_on_top_right_corner() {
        let geometry = derive_geometry([pos2(0.0, 0.0), pos2(100.0, 50.0)], 10.0).unwrap();
        assert_eq!(close_button_position(&geometry), pos2(90.0, -20.0));
    }
}
