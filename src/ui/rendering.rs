//! Drawing layers, groups, links, nodes and decorations onto the canvas.

use super::canvas::{node_radius, world_to_window, CLOSE_BUTTON_RADIUS};
use super::state::SurfaceState;
use crate::diagram::DiagramState;
use crate::layers::{Layer, LayerPhase};
use crate::types::{Edge, Node, NodeKind, Transform};
use eframe::egui;
use eframe::epaint::StrokeKind;
use tokio::time::Instant;

/// Opacity of the backdrop each drilled-down layer draws over the layers below it.
const BACKDROP_OPACITY: f32 = 0.85;

const BACKGROUND: egui::Color32 = egui::Color32::from_rgb(248, 249, 251);
const GROUP_FILL: egui::Color32 = egui::Color32::from_rgba_premultiplied(40, 90, 160, 24);
const GROUP_STROKE: egui::Color32 = egui::Color32::from_rgb(70, 110, 170);
const LINK_COLOR: egui::Color32 = egui::Color32::from_rgb(120, 130, 140);
const WARNING_COLOR: egui::Color32 = egui::Color32::from_rgb(215, 50, 40);
const DEVICE_COLOR: egui::Color32 = egui::Color32::from_rgb(60, 120, 200);
const SUBNET_COLOR: egui::Color32 = egui::Color32::from_rgb(170, 200, 235);
const UNMANAGED_COLOR: egui::Color32 = egui::Color32::from_rgb(170, 170, 170);
const LABEL_COLOR: egui::Color32 = egui::Color32::from_rgb(30, 30, 30);

/// Renders every live layer of the diagram.
///
/// Layers are drawn bottom to top; each drilled-down layer first covers the ones below it with
/// a translucent backdrop. Layers still fading out after a pop are drawn last.
///
/// # Arguments
///
/// * `painter` - The egui painter for drawing operations
/// * `canvas_rect` - The drawing area in window coordinates
/// * `state` - The diagram being drawn
/// * `surface` - Visual flags pushed by the diagram
pub fn render_diagram(
    painter: &egui::Painter,
    canvas_rect: egui::Rect,
    state: &DiagramState,
    surface: &SurfaceState,
) {
    let now = Instant::now();
    painter.rect_filled(canvas_rect, 0.0, BACKGROUND);

    let stack: Vec<&Layer> = state.layers.iter().collect();
    for layer in stack.into_iter().rev().chain(state.closing.iter()) {
        let opacity = layer.opacity(now);
        if opacity <= 0.0 {
            continue;
        }
        if !layer.is_root() {
            painter.rect_filled(
                canvas_rect,
                0.0,
                BACKGROUND.gamma_multiply(BACKDROP_OPACITY * opacity),
            );
        }
        let opacity = if layer.phase == LayerPhase::Dimmed {
            opacity * 0.3
        } else {
            opacity
        };
        draw_layer(painter, canvas_rect, layer, surface, opacity);
    }

    if surface.loading {
        draw_loading(painter, canvas_rect);
    }
}

/// Draws one layer at `opacity`.
fn draw_layer(
    painter: &egui::Painter,
    canvas_rect: egui::Rect,
    layer: &Layer,
    surface: &SurfaceState,
    opacity: f32,
) {
    let transform = layer.viewport.transform;

    if surface.grouping {
        for group in &layer.groups {
            let Some(geometry) = &group.geometry else {
                continue;
            };
            let hidden = surface.hidden_overlays.contains(&(layer.key, group.id));
            let points: Vec<egui::Pos2> = geometry
                .polygon
                .iter()
                .map(|p| world_to_window(canvas_rect, &transform, *p))
                .collect();
            let fill = if hidden {
                egui::Color32::TRANSPARENT
            } else {
                GROUP_FILL.gamma_multiply(opacity)
            };
            painter.add(egui::Shape::convex_polygon(
                points,
                fill,
                egui::Stroke::new(1.5, GROUP_STROKE.gamma_multiply(opacity)),
            ));

            let corner = world_to_window(canvas_rect, &transform, geometry.rect.left_top());
            painter.text(
                corner + egui::vec2(8.0, 6.0),
                egui::Align2::LEFT_TOP,
                &group.name,
                egui::FontId::proportional(font_size(14.0, transform.k)),
                GROUP_STROKE.gamma_multiply(opacity),
            );
        }
    }

    for edge in &layer.edges {
        draw_edge(painter, canvas_rect, layer, edge, &transform, opacity);
    }

    for (index, node) in layer.nodes.iter().enumerate() {
        let center = world_to_window(canvas_rect, &transform, node.pos);
        draw_node(painter, node, center, transform.k, opacity);

        let mut offset = node_radius(node, transform.k) + 4.0;
        let font = egui::FontId::proportional(font_size(12.0, transform.k));
        if let Some(label) = layer.label(index) {
            painter.text(
                center + egui::vec2(0.0, offset),
                egui::Align2::CENTER_TOP,
                label,
                font.clone(),
                LABEL_COLOR.gamma_multiply(opacity),
            );
            offset += font.size + 2.0;
        }
        if surface.ip_labels {
            if let Some(ip) = layer.ip_label(index) {
                painter.text(
                    center + egui::vec2(0.0, offset),
                    egui::Align2::CENTER_TOP,
                    ip,
                    egui::FontId::monospace(font.size * 0.9),
                    LABEL_COLOR.gamma_multiply(opacity * 0.7),
                );
            }
        }
    }

    if let Some(position) = surface.close_buttons.get(&layer.key) {
        draw_close_button(
            painter,
            world_to_window(canvas_rect, &transform, *position),
            opacity,
        );
    }
}

/// Draws a link; static WAN links are dashed and links with a warning are red.
fn draw_edge(
    painter: &egui::Painter,
    canvas_rect: egui::Rect,
    layer: &Layer,
    edge: &Edge,
    transform: &Transform,
    opacity: f32,
) {
    let (Some(source), Some(target)) = (layer.nodes.get(edge.source), layer.nodes.get(edge.target))
    else {
        return;
    };
    let from = world_to_window(canvas_rect, transform, source.pos);
    let to = world_to_window(canvas_rect, transform, target.pos);
    let color = if edge.warning {
        WARNING_COLOR
    } else {
        LINK_COLOR
    };
    let stroke = egui::Stroke::new(
        (edge.width as f32 * transform.k).max(1.0),
        color.gamma_multiply(opacity),
    );

    if edge.is_static_wan {
        let dash = (12.0 * transform.k).max(3.0);
        painter.extend(egui::Shape::dashed_line(&[from, to], stroke, dash, dash));
    } else {
        painter.line_segment([from, to], stroke);
    }
}

/// Draws a node icon: devices as rounded squares, subnets as clouds, unmanaged devices as
/// grey circles. Pinned nodes get a darker outline.
fn draw_node(painter: &egui::Painter, node: &Node, center: egui::Pos2, k: f32, opacity: f32) {
    let radius = node_radius(node, k);
    let outline = if node.is_fixed() { 2.5 } else { 1.0 };
    let stroke = egui::Stroke::new(outline, egui::Color32::from_gray(60).gamma_multiply(opacity));

    match &node.kind {
        NodeKind::Device => {
            let color = if node.external {
                DEVICE_COLOR.gamma_multiply(0.5)
            } else {
                DEVICE_COLOR
            };
            let rect = egui::Rect::from_center_size(center, egui::Vec2::splat(radius * 2.0));
            painter.rect_filled(rect, radius * 0.25, color.gamma_multiply(opacity));
            painter.rect_stroke(rect, radius * 0.25, stroke, StrokeKind::Inside);
        }
        NodeKind::Subnet { is_private, .. } => {
            let color = if *is_private {
                SUBNET_COLOR
            } else {
                SUBNET_COLOR.gamma_multiply(0.7)
            };
            // three overlapping puffs
            for (dx, dy, r) in [(-0.45, 0.1, 0.55), (0.45, 0.1, 0.55), (0.0, -0.2, 0.65)] {
                painter.circle(
                    center + egui::vec2(dx * radius, dy * radius),
                    r * radius,
                    color.gamma_multiply(opacity),
                    stroke,
                );
            }
        }
        NodeKind::Unmanaged => {
            painter.circle(
                center,
                radius * 0.6,
                UNMANAGED_COLOR.gamma_multiply(opacity),
                stroke,
            );
        }
    }
}

fn draw_close_button(painter: &egui::Painter, center: egui::Pos2, opacity: f32) {
    painter.circle(
        center,
        CLOSE_BUTTON_RADIUS,
        egui::Color32::WHITE.gamma_multiply(opacity),
        egui::Stroke::new(1.0, GROUP_STROKE.gamma_multiply(opacity)),
    );
    painter.text(
        center,
        egui::Align2::CENTER_CENTER,
        "×",
        egui::FontId::proportional(14.0),
        GROUP_STROKE.gamma_multiply(opacity),
    );
}

fn draw_loading(painter: &egui::Painter, canvas_rect: egui::Rect) {
    let center = canvas_rect.center();
    painter.rect_filled(
        egui::Rect::from_center_size(center, egui::vec2(140.0, 40.0)),
        6.0,
        egui::Color32::from_rgba_unmultiplied(255, 255, 255, 230),
    );
    let dots = (painter.ctx().input(|i| i.time) / 0.3) as usize % 4;
    painter.text(
        center,
        egui::Align2::CENTER_CENTER,
        format!("Loading{}", ".".repeat(dots)),
        egui::FontId::proportional(16.0),
        LABEL_COLOR,
    );
}

/// Font size following the zoom, clamped to stay readable.
fn font_size(base: f32, k: f32) -> f32 {
    (base * k).clamp(8.0, 32.0)
}
