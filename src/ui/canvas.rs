//! Canvas interaction: hit testing and routing pointer input to the diagram.
//!
//! The diagram works in canvas-local screen coordinates (origin at the top-left corner of the
//! drawing area); everything coming from egui is shifted by the canvas origin first.

use super::state::TopologyApp;
use crate::constants::{NODE_ICON_SIZE, SUBNET_ICON_SCALE};
use crate::diagram::Diagram;
use crate::gesture::GestureContext;
use crate::layers::Layer;
use crate::types::{Node, Transform};
use eframe::egui;

/// Screen radius of the focused group's dismiss button.
pub const CLOSE_BUTTON_RADIUS: f32 = 10.0;

/// Smallest on-screen hit radius of a node, so far zoomed-out nodes stay clickable.
const MIN_HIT_RADIUS: f32 = 6.0;

/// Converts a window position to canvas-local screen coordinates.
///
/// # Arguments
///
/// * `canvas_rect` - Rectangle of the drawing area in window coordinates
/// * `pos` - Position in window coordinates
pub fn to_canvas(canvas_rect: egui::Rect, pos: egui::Pos2) -> egui::Pos2 {
    (pos - canvas_rect.min).to_pos2()
}

/// Converts a world position on a layer to window coordinates.
pub fn world_to_window(canvas_rect: egui::Rect, transform: &Transform, world: egui::Pos2) -> egui::Pos2 {
    transform.apply(world) + canvas_rect.min.to_vec2()
}

/// On-screen radius of a node's icon at scale `k`.
pub fn node_radius(node: &Node, k: f32) -> f32 {
    let size = if node.is_subnet() {
        NODE_ICON_SIZE * SUBNET_ICON_SCALE
    } else {
        NODE_ICON_SIZE
    };
    size / 2.0 * k
}

/// Finds the topmost node under a canvas-local screen position.
pub fn node_at(layer: &Layer, pos: egui::Pos2) -> Option<usize> {
    let transform = layer.viewport.transform;
    layer
        .nodes
        .iter()
        .enumerate()
        .rev()
        .find(|(_, node)| {
            let radius = node_radius(node, transform.k).max(MIN_HIT_RADIUS);
            transform.apply(node.pos).distance(pos) <= radius
        })
        .map(|(index, _)| index)
}

/// Finds the smallest group box containing a canvas-local screen position.
pub fn group_at(layer: &Layer, pos: egui::Pos2) -> Option<usize> {
    let world = layer.viewport.transform.invert(pos);
    layer
        .groups
        .iter()
        .filter_map(|group| {
            let geometry = group.geometry.as_ref()?;
            geometry.rect.contains(world).then_some((group.id, geometry.area()))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}

impl TopologyApp {
    /// Routes the pointer input of the canvas to the diagram.
    ///
    /// Dragging a node or group rearranges it, dragging the background pans, the wheel zooms
    /// about the cursor. Clicks with the navigation modifier (Shift) drill down into nodes or
    /// focus groups.
    ///
    /// # Arguments
    ///
    /// * `ui` - The egui UI context
    /// * `response` - The response from the canvas widget
    /// * `diagram` - The diagram shown on the canvas
    pub fn handle_canvas_input(&mut self, ui: &egui::Ui, response: &egui::Response, diagram: &Diagram) {
        let canvas_rect = response.rect;
        let modifier = ui.input(|i| i.modifiers.shift);
        let gesture = GestureContext {
            modifier,
            active: ui.input(|i| i.pointer.any_down()),
        };
        let grouping_visible = self.surface.state().grouping;

        let pointer = response
            .interact_pointer_pos()
            .or_else(|| response.hover_pos())
            .map(|pos| to_canvas(canvas_rect, pos));

        self.interaction.hovered_node = response
            .hover_pos()
            .map(|pos| to_canvas(canvas_rect, pos))
            .and_then(|pos| diagram.read(|state| state.current_layer().and_then(|layer| node_at(layer, pos))));

        if response.drag_started() {
            if let Some(pos) = pointer {
                self.start_drag(diagram, pos, gesture, grouping_visible);
            }
        }

        if response.dragged() {
            if self.interaction.dragging {
                if let Some(pos) = pointer {
                    diagram.drag_to(pos, gesture);
                }
            } else if self.interaction.is_panning {
                diagram.pan(response.drag_delta());
            }
        }

        if response.drag_stopped() {
            if self.interaction.dragging {
                if let Some(release) = diagram.end_drag(gesture.with_active(false)) {
                    log::debug!("drag released: {release:?}");
                }
            }
            if self.interaction.is_panning {
                diagram.end_viewport_interaction();
            }
            self.interaction.dragging = false;
            self.interaction.is_panning = false;
        }

        if response.clicked() {
            if let Some(pos) = pointer {
                self.handle_click(diagram, pos, gesture, grouping_visible);
            }
        }

        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                if let Some(anchor) = pointer {
                    diagram.zoom_wheel(anchor, scroll);
                }
            }
        }
    }

    fn start_drag(&mut self, diagram: &Diagram, pos: egui::Pos2, gesture: GestureContext, grouping_visible: bool) {
        let (node, group) = diagram.read(|state| {
            let Some(layer) = state.current_layer() else {
                return (None, None);
            };
            let node = node_at(layer, pos).map(|index| layer.nodes[index].name.clone());
            let group = grouping_visible
                .then(|| group_at(layer, pos))
                .flatten();
            (node, group)
        });

        if let Some(name) = node {
            if diagram.begin_node_drag(&name, gesture) {
                self.interaction.dragging = true;
                return;
            }
        }
        if let Some(group) = group {
            if diagram.begin_group_drag(group, pos, gesture) {
                self.interaction.dragging = true;
                return;
            }
        }
        self.interaction.is_panning = true;
    }

    fn handle_click(&mut self, diagram: &Diagram, pos: egui::Pos2, gesture: GestureContext, grouping_visible: bool) {
        let close_button = diagram.read(|state| {
            let layer = state.current_layer()?;
            let position = self.surface.state().close_buttons.get(&layer.key).copied()?;
            Some(layer.viewport.transform.apply(position))
        });
        if close_button.is_some_and(|button| button.distance(pos) <= CLOSE_BUTTON_RADIUS) {
            diagram.dismiss_focus();
            return;
        }

        if !gesture.allows_navigate() {
            return;
        }

        let (node, group) = diagram.read(|state| {
            let Some(layer) = state.current_layer() else {
                return (None, None);
            };
            let node = node_at(layer, pos).map(|index| layer.nodes[index].name.clone());
            let group = grouping_visible
                .then(|| group_at(layer, pos))
                .flatten();
            (node, group)
        });

        if let Some(name) = node {
            let target = diagram.clone();
            self.spawn_action("drill down", async move {
                target.click_node(&name, gesture).await.map(|_| ())
            });
        } else if let Some(group) = group {
            let target = diagram.clone();
            self.spawn_action("focus group", async move {
                target.click_group(group, gesture).await.map(|_| ())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerKind;
    use crate::types::{Group, GroupGeometry, NodeKind};
    use egui::{pos2, vec2, Rect};

    fn layer() -> Layer {
        let mut layer = Layer::new("main", LayerKind::Root, vec2(800.0, 600.0), (0.1, 8.0));
        layer.nodes.push(Node::new("a", NodeKind::Device).at(pos2(0.0, 0.0)));
        layer.nodes.push(Node::new("b", NodeKind::Device).at(pos2(100.0, 0.0)));
        layer.viewport.set_transform(Transform::new(400.0, 300.0, 1.0));
        layer
    }

    #[test]
    fn test_node_hit_testing_uses_transform() {
        let layer = layer();
        assert_eq!(node_at(&layer, pos2(400.0, 300.0)), Some(0));
        assert_eq!(node_at(&layer, pos2(520.0, 310.0)), Some(1));
        assert_eq!(node_at(&layer, pos2(450.0, 200.0)), None);
    }

    #[test]
    fn test_group_hit_prefers_smallest_box() {
        let mut layer = layer();
        for (id, size) in [(0, 400.0), (1, 100.0)] {
            let rect = Rect::from_center_size(pos2(0.0, 0.0), vec2(size, size));
            let mut group = Group::new(id, format!("g{id}"));
            group.geometry = Some(GroupGeometry {
                bounds: rect,
                rect,
                polygon: vec![rect.left_top(), rect.right_top(), rect.right_bottom(), rect.left_bottom()],
            });
            layer.groups.push(group);
        }
        assert_eq!(group_at(&layer, pos2(410.0, 310.0)), Some(1));
        assert_eq!(group_at(&layer, pos2(550.0, 300.0)), Some(0));
        assert_eq!(group_at(&layer, pos2(700.0, 300.0)), None);
    }

    #[test]
    fn test_canvas_coordinates_are_relative_to_origin() {
        let canvas = Rect::from_min_size(pos2(10.0, 40.0), vec2(800.0, 600.0));
        assert_eq!(to_canvas(canvas, pos2(110.0, 140.0)), pos2(100.0, 100.0));
        let transform = Transform::new(5.0, 5.0, 2.0);
        assert_eq!(world_to_window(canvas, &transform, pos2(1.0, 1.0)), pos2(17.0, 47.0));
    }
}
