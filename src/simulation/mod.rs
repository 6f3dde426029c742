//! Force-directed layout engine.
//!
//! Every layer with a live layout owns a [`SimulationPair`]: a node simulation running the
//! centering, link, charge and cluster forces, and a group simulation running only the
//! rectangle collision force. Both cool down independently on the same frame clock.

pub mod forces;
mod quadtree;

use crate::constants::*;
use crate::types::{Edge, Group, Node};
use eframe::egui::Pos2;

/// Cooling state of one iterative simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    /// Current energy; forces are scaled by it
    pub alpha: f32,
    /// Energy the simulation converges to
    pub alpha_target: f32,
    /// Energy below which ticking stops on its own
    pub alpha_min: f32,
    /// Fraction of the distance to `alpha_target` covered per tick
    pub alpha_decay: f32,
    /// Fraction of velocity lost per tick
    pub velocity_decay: f32,
    /// Energy saved by the last grouping toggle
    pub previous_alpha: Option<f32>,
    running: bool,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// A hot, running simulation.
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            alpha_target: 0.0,
            alpha_min: ALPHA_MIN,
            alpha_decay: ALPHA_DECAY,
            velocity_decay: VELOCITY_DECAY,
            previous_alpha: None,
            running: true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Resumes ticking without changing alpha.
    pub fn restart(&mut self) {
        self.running = true;
    }

    /// Halts ticking; positions are kept.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Moves alpha one step toward its target. Returns false if the simulation is stopped.
    fn cool(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.alpha += (self.alpha_target - self.alpha) * self.alpha_decay;
        true
    }

    /// Stops the simulation once it has cooled below `alpha_min`.
    fn settle(&mut self) {
        if self.alpha < self.alpha_min {
            self.running = false;
        }
    }
}

/// Strengths of the node forces that depend on the grouping mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeForces {
    pub center_strength: f32,
    pub charge_strength: f32,
}

impl NodeForces {
    pub fn for_grouping(grouping: bool) -> Self {
        if grouping {
            Self {
                center_strength: CENTER_STRENGTH_GROUPED,
                charge_strength: CHARGE_STRENGTH_GROUPED,
            }
        } else {
            Self {
                center_strength: CENTER_STRENGTH_UNGROUPED,
                charge_strength: CHARGE_STRENGTH_UNGROUPED,
            }
        }
    }
}

impl Default for NodeForces {
    fn default() -> Self {
        Self::for_grouping(true)
    }
}

/// The two simulations of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationPair {
    pub nodes: Simulation,
    /// Present only when the layer has groups
    pub groups: Option<Simulation>,
    pub forces: NodeForces,
}

impl SimulationPair {
    pub fn new(has_groups: bool) -> Self {
        Self {
            nodes: Simulation::new(),
            groups: has_groups.then(Simulation::new),
            forces: NodeForces::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.nodes.is_running() || self.groups.as_ref().is_some_and(Simulation::is_running)
    }

    pub fn stop(&mut self) {
        self.nodes.stop();
        if let Some(groups) = &mut self.groups {
            groups.stop();
        }
    }

    /// Sets the alpha target of the node simulation, and of the group simulation when
    /// `include_groups`, restarting whichever was changed.
    pub fn reheat(&mut self, target: f32, include_groups: bool) {
        self.nodes.alpha_target = target;
        self.nodes.restart();
        if include_groups {
            if let Some(groups) = &mut self.groups {
                groups.alpha_target = target;
                groups.restart();
            }
        }
    }

    /// Sets alpha targets without restarting anything.
    pub fn release(&mut self, target: f32) {
        self.nodes.alpha_target = target;
        if let Some(groups) = &mut self.groups {
            groups.alpha_target = target;
        }
    }
}

/// Inputs of a node simulation tick that live outside the node list.
pub struct NodeTickContext<'a> {
    pub edges: &'a [Edge],
    pub groups: &'a [Group],
    /// Grouping enabled and the layer has groups
    pub grouping_active: bool,
    pub center: Pos2,
}

/// Runs one node simulation tick: cool, apply forces, integrate.
///
/// Returns false without touching the nodes if the simulation is stopped. Pinned coordinates
/// are written back every tick and their velocity zeroed.
pub fn tick_nodes(
    simulation: &mut Simulation,
    forces: &NodeForces,
    nodes: &mut [Node],
    context: &NodeTickContext<'_>,
) -> bool {
    if !simulation.cool() {
        return false;
    }
    let alpha = simulation.alpha;

    forces::center(nodes, context.center, forces.center_strength, alpha);
    let strengths = forces::link_strengths(nodes, context.edges, context.grouping_active);
    forces::links(nodes, context.edges, &strengths, LINK_DISTANCE, alpha);
    if context.grouping_active {
        forces::cluster(nodes, context.groups, CLUSTER_STRENGTH, alpha);
    }
    forces::charge(nodes, forces.charge_strength, CHARGE_THETA, alpha);

    let keep = 1.0 - simulation.velocity_decay;
    for node in nodes.iter_mut() {
        match node.fx {
            Some(fx) => {
                node.pos.x = fx;
                node.velocity.x = 0.0;
            }
            None => {
                node.velocity.x *= keep;
                node.pos.x += node.velocity.x;
            }
        }
        match node.fy {
            Some(fy) => {
                node.pos.y = fy;
                node.velocity.y = 0.0;
            }
            None => {
                node.velocity.y *= keep;
                node.pos.y += node.velocity.y;
            }
        }
    }

    simulation.settle();
    true
}

/// Runs one group simulation tick: cool, then separate overlapping group boxes.
///
/// Group geometry is not refreshed here; callers re-derive it after the tick.
pub fn tick_groups(
    simulation: &mut Simulation,
    nodes: &mut [Node],
    groups: &[Group],
    focused: Option<usize>,
) -> bool {
    if !simulation.cool() {
        return false;
    }
    forces::rect_collide(
        nodes,
        groups,
        focused,
        RECT_COLLIDE_PADDING,
        RECT_COLLIDE_ITERATIONS,
    );
    simulation.settle();
    true
}
