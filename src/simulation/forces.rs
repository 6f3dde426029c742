//! Force functions applied by the node and group simulations.
//!
//! Node forces accumulate into velocities, which the simulation integrates after all forces
//! ran. The rectangle collision force works directly on positions.

use super::quadtree::QuadNode;
use crate::types::{Edge, Group, Node};
use eframe::egui::{vec2, Pos2, Vec2};

/// Squared distance below which the charge force stops growing.
const CHARGE_DISTANCE_MIN_SQ: f32 = 1.0;

/// Tiny deterministic offset used to separate coincident points.
fn jiggle(seed: usize) -> f32 {
    ((seed as f32 * 0.618_034).fract() - 0.5) * 1e-6
}

fn nudge(delta: Vec2, seed: usize) -> Vec2 {
    if delta == Vec2::ZERO {
        vec2(jiggle(seed), jiggle(seed + 1))
    } else {
        delta
    }
}

/// Pulls every node toward `target` on both axes.
pub fn center(nodes: &mut [Node], target: Pos2, strength: f32, alpha: f32) {
    for node in nodes {
        node.velocity += (target - node.pos) * strength * alpha;
    }
}

/// Per-edge spring strength.
///
/// Without active grouping every link is a full-strength spring. With grouping, links inside a
/// group are loosened and links across groups loosened much further so clusters can separate.
pub fn link_strengths(nodes: &[Node], edges: &[Edge], grouping_active: bool) -> Vec<f32> {
    use crate::constants::{
        LINK_STRENGTH_CROSS_GROUP, LINK_STRENGTH_SAME_GROUP, LINK_STRENGTH_UNGROUPED,
    };

    edges
        .iter()
        .map(|edge| {
            if !grouping_active {
                LINK_STRENGTH_UNGROUPED
            } else if nodes[edge.source].group == nodes[edge.target].group {
                LINK_STRENGTH_SAME_GROUP
            } else {
                LINK_STRENGTH_CROSS_GROUP
            }
        })
        .collect()
}

/// Spring force pulling linked nodes toward `distance` apart.
///
/// The correction is split between both endpoints by degree so that hubs move less than
/// leaves.
pub fn links(nodes: &mut [Node], edges: &[Edge], strengths: &[f32], distance: f32, alpha: f32) {
    let mut degree = vec![0usize; nodes.len()];
    for edge in edges {
        degree[edge.source] += 1;
        degree[edge.target] += 1;
    }

    for (i, (edge, strength)) in edges.iter().zip(strengths).enumerate() {
        let (s, t) = (edge.source, edge.target);
        if s == t {
            continue;
        }
        let delta = (nodes[t].pos + nodes[t].velocity) - (nodes[s].pos + nodes[s].velocity);
        let delta = nudge(delta, i);
        let length = delta.length();
        let correction = delta * ((length - distance) / length * alpha * strength);
        let bias = degree[s] as f32 / (degree[s] + degree[t]) as f32;

        nodes[t].velocity -= correction * bias;
        nodes[s].velocity += correction * (1.0 - bias);
    }
}

/// Many-body force between all nodes, approximated with a Barnes-Hut quadtree.
///
/// Negative `strength` repels.
pub fn charge(nodes: &mut [Node], strength: f32, theta: f32, alpha: f32) {
    let positions: Vec<Vec2> = nodes.iter().map(|node| node.pos.to_vec2()).collect();
    let Some(tree) = QuadNode::build(&positions) else {
        return;
    };

    let theta_sq = theta * theta;
    for (index, node) in nodes.iter_mut().enumerate() {
        let mut force = Vec2::ZERO;
        accumulate_charge(&tree, index, &positions, strength * alpha, theta_sq, &mut force);
        node.velocity += force;
    }
}

fn accumulate_charge(
    quad: &QuadNode,
    index: usize,
    positions: &[Vec2],
    strength: f32,
    theta_sq: f32,
    force: &mut Vec2,
) {
    if quad.count <= 0.0 {
        return;
    }

    let point = positions[index];

    if quad.is_leaf() {
        for &other in &quad.indices {
            if other == index {
                continue;
            }
            let delta = nudge(positions[other] - point, index + other);
            *force += delta * (strength / softened(delta.length_sq()));
        }
        return;
    }

    let delta = quad.center_of_mass - point;
    let distance_sq = delta.length_sq();
    let side = quad.bounds.side_length();
    let inside = point.x >= quad.bounds.min().x
        && point.y >= quad.bounds.min().y
        && point.x <= quad.bounds.max().x
        && point.y <= quad.bounds.max().y;

    if !inside && side * side / theta_sq < distance_sq {
        *force += delta * (strength * quad.count / softened(distance_sq));
        return;
    }

    for child in quad.children() {
        accumulate_charge(child, index, positions, strength, theta_sq, force);
    }
}

fn softened(distance_sq: f32) -> f32 {
    if distance_sq < CHARGE_DISTANCE_MIN_SQ {
        (CHARGE_DISTANCE_MIN_SQ * distance_sq).sqrt().max(f32::EPSILON)
    } else {
        distance_sq
    }
}

/// Pulls each grouped node toward the center of its group's box.
pub fn cluster(nodes: &mut [Node], groups: &[Group], strength: f32, alpha: f32) {
    let k = alpha * strength;
    for node in nodes {
        let center = node
            .group
            .and_then(|id| groups.get(id))
            .and_then(|group| group.geometry.as_ref())
            .map(|geometry| geometry.center());
        if let Some(center) = center {
            node.velocity -= (node.pos - center) * k;
        }
    }
}

/// Indices of the member nodes of every group.
pub fn group_members(nodes: &[Node], group_count: usize) -> Vec<Vec<usize>> {
    let mut members = vec![Vec::new(); group_count];
    for (index, node) in nodes.iter().enumerate() {
        if let Some(list) = node.group.and_then(|id| members.get_mut(id)) {
            list.push(index);
        }
    }
    members
}

/// Whether a group must stay put: pinned, locked, focused, or holding a pinned member.
pub fn is_group_fixed(
    group: &Group,
    members: &[usize],
    nodes: &[Node],
    focused: Option<usize>,
) -> bool {
    group.is_pinned()
        || group.locked
        || focused == Some(group.id)
        || members.iter().any(|&index| nodes[index].is_fixed())
}

struct CollideItem {
    group: usize,
    center: Vec2,
    size: Vec2,
    mass: f32,
    fixed: bool,
}

/// Pushes overlapping group boxes apart by moving their member nodes.
///
/// Two boxes collide when their extents plus `padding` overlap on both axes. The pair is
/// separated along the axis of least overlap, the lighter box (by area) taking the larger share.
/// Fixed groups never move. Returns true if any node was moved.
pub fn rect_collide(
    nodes: &mut [Node],
    groups: &[Group],
    focused: Option<usize>,
    padding: f32,
    iterations: usize,
) -> bool {
    let members = group_members(nodes, groups.len());
    let items: Vec<CollideItem> = groups
        .iter()
        .filter_map(|group| {
            let geometry = group.geometry.as_ref()?;
            Some(CollideItem {
                group: group.id,
                center: geometry.center().to_vec2(),
                size: geometry.rect.size(),
                mass: geometry.area(),
                fixed: is_group_fixed(group, &members[group.id], nodes, focused),
            })
        })
        .collect();
    if items.len() < 2 {
        return false;
    }

    let centers: Vec<Vec2> = items.iter().map(|item| item.center).collect();
    let sizes: Vec<Vec2> = items.iter().map(|item| item.size).collect();
    let mut moved = false;

    for _ in 0..iterations {
        let Some(tree) = QuadNode::build_sized(&centers, &sizes) else {
            return moved;
        };
        let mut shifts = vec![Vec2::ZERO; items.len()];
        for index in 0..items.len() {
            visit_collisions(&tree, index, &items, padding, &mut shifts);
        }

        for (item, shift) in items.iter().zip(&shifts) {
            if item.fixed || *shift == Vec2::ZERO {
                continue;
            }
            for &member in &members[item.group] {
                nodes[member].pos += *shift;
            }
            moved = true;
        }
    }
    moved
}

fn visit_collisions(
    quad: &QuadNode,
    index: usize,
    items: &[CollideItem],
    padding: f32,
    shifts: &mut [Vec2],
) {
    let item = &items[index];
    let reach = (item.size + quad.max_extent) * 0.5 + vec2(padding, padding);
    let (min, max) = (quad.bounds.min(), quad.bounds.max());
    if min.x > item.center.x + reach.x
        || min.y > item.center.y + reach.y
        || max.x < item.center.x - reach.x
        || max.y < item.center.y - reach.y
    {
        return;
    }

    if quad.is_leaf() {
        for &other in &quad.indices {
            if other > index {
                separate(index, other, items, padding, shifts);
            }
        }
        return;
    }

    for child in quad.children() {
        visit_collisions(child, index, items, padding, shifts);
    }
}

fn separate(i: usize, j: usize, items: &[CollideItem], padding: f32, shifts: &mut [Vec2]) {
    let (a, b) = (&items[i], &items[j]);
    let reach = (a.size + b.size) * 0.5 + vec2(padding, padding);
    let delta = a.center - b.center;
    let delta = if delta == Vec2::ZERO {
        vec2(-1e-3, 0.0)
    } else {
        delta
    };
    let overlap = vec2(delta.x.abs() - reach.x, delta.y.abs() - reach.y);
    if overlap.x >= 0.0 || overlap.y >= 0.0 {
        return;
    }

    let length = delta.length();
    let total = a.mass + b.mass;
    let m = if total > 0.0 { b.mass / total } else { 0.5 };

    if overlap.x.abs() < overlap.y.abs() {
        let x = delta.x * overlap.x / length;
        if !a.fixed {
            shifts[i].x -= x * m;
        }
        if !b.fixed {
            shifts[j].x += x * (1.0 - m);
        }
    } else {
        let y = delta.y * overlap.y / length;
        if !a.fixed {
            shifts[i].y -= y * m;
        }
        if !b.fixed {
            shifts[j].y += y * (1.0 - m);
        }
    }
}
