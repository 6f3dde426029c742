//! Core data types and structures for the topology diagram.
//!
//! This module defines the live records the layout engine works on (nodes, edges and groups),
//! the viewport transform, and the raw payload records returned by a data source before they
//! are ingested into a layer.

use eframe::egui::{pos2, Pos2, Rect, Vec2};
use serde::{Deserialize, Deserializer, Serialize};

/// What a node on the diagram represents.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A managed network device (router, switch, firewall, server).
    Device,
    /// A subnet, drawn as a cloud.
    Subnet {
        /// Network address, e.g. `10.0.0.0`
        subnet: String,
        /// Dotted netmask
        mask: String,
        /// Whether the address range is private
        is_private: bool,
    },
    /// A device the inventory knows nothing about.
    Unmanaged,
}

/// Descriptive attributes of a device, carried for rendering and tooltips only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    /// Management address
    pub ip_address: Option<String>,
    /// Detail page link
    pub url: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub software_os: Option<String>,
    pub location: Option<String>,
}

/// A single node on a layer.
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable identity of the node
    pub name: String,
    /// What the node represents
    pub kind: NodeKind,
    /// Current simulated position
    pub pos: Pos2,
    /// Current simulated velocity
    pub velocity: Vec2,
    /// Pinned x coordinate; when set the simulation does not move the node horizontally
    pub fx: Option<f32>,
    /// Pinned y coordinate; when set the simulation does not move the node vertically
    pub fy: Option<f32>,
    /// Index into the owning layer's group list
    pub group: Option<usize>,
    /// Icon reference handed to the render surface
    pub image: Option<String>,
    /// Device attributes
    pub info: DeviceInfo,
    /// Set for neighbours pulled into a subnet drill-down from outside the subnet
    pub external: bool,
    /// Position stashed by the last grouping toggle
    pub stash: Option<Pos2>,
    /// Position captured at the start of a group drag
    pub drag_origin: Option<Pos2>,
}

impl Node {
    /// Creates an unpinned, ungrouped node at the origin.
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            pos: Pos2::ZERO,
            velocity: Vec2::ZERO,
            fx: None,
            fy: None,
            group: None,
            image: None,
            info: DeviceInfo::default(),
            external: false,
            stash: None,
            drag_origin: None,
        }
    }

    /// Returns the node moved to `pos`.
    pub fn at(mut self, pos: Pos2) -> Self {
        self.pos = pos;
        self
    }

    /// Returns the node assigned to `group`.
    pub fn in_group(mut self, group: usize) -> Self {
        self.group = Some(group);
        self
    }

    pub fn is_subnet(&self) -> bool {
        matches!(self.kind, NodeKind::Subnet { .. })
    }

    pub fn is_unmanaged(&self) -> bool {
        matches!(self.kind, NodeKind::Unmanaged)
    }

    /// Returns true if either coordinate is pinned.
    pub fn is_fixed(&self) -> bool {
        self.fx.is_some() || self.fy.is_some()
    }

    /// Pins the node at its current position.
    pub fn pin(&mut self) {
        self.fx = Some(self.pos.x);
        self.fy = Some(self.pos.y);
    }

    /// Pins the node at `pos`, moving it there.
    pub fn pin_at(&mut self, pos: Pos2) {
        self.pos = pos;
        self.fx = Some(pos.x);
        self.fy = Some(pos.y);
    }

    /// Releases both pinned coordinates.
    pub fn release(&mut self) {
        self.fx = None;
        self.fy = None;
    }

    /// The pinned position if both coordinates are pinned.
    pub fn fixed_pos(&self) -> Option<Pos2> {
        Some(pos2(self.fx?, self.fy?))
    }
}

/// A resolved link between two nodes of the same layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Index of the source node in the layer's node list
    pub source: usize,
    /// Index of the target node in the layer's node list
    pub target: usize,
    /// Link bandwidth in bits per second
    pub bandwidth: f64,
    pub is_static_wan: bool,
    pub warning: bool,
    /// Derived stroke width tier
    pub width: u8,
    /// Interface description shown on hover
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub qos: Option<String>,
    pub url: Option<String>,
}

/// Geometry derived from a group's member nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupGeometry {
    /// Min/max of member coordinates before padding
    pub bounds: Rect,
    /// Bounds expanded by the group padding
    pub rect: Rect,
    /// Convex hull of the padded box
    pub polygon: Vec<Pos2>,
}

impl GroupGeometry {
    pub fn x(&self) -> f32 {
        self.rect.min.x
    }

    pub fn y(&self) -> f32 {
        self.rect.min.y
    }

    pub fn width(&self) -> f32 {
        self.rect.width()
    }

    pub fn height(&self) -> f32 {
        self.rect.height()
    }

    /// Center of the padded box.
    pub fn center(&self) -> Pos2 {
        self.rect.center()
    }

    /// Area of the padded box, used as the group's mass when separating rectangles.
    pub fn area(&self) -> f32 {
        self.rect.area()
    }
}

/// A logical cluster of nodes on a layer.
#[derive(Debug, Clone)]
pub struct Group {
    /// Dense index into the layer's group list
    pub id: usize,
    pub name: String,
    /// Derived geometry, `None` while the group has no members
    pub geometry: Option<GroupGeometry>,
    /// Set while the group is focused; locked groups are not recomputed or pushed apart
    pub locked: bool,
    /// Pinned x of the whole group after a drag
    pub fx: Option<f32>,
    /// Pinned y of the whole group after a drag
    pub fy: Option<f32>,
    /// Top-left corner captured at the start of a drag
    pub drag_origin: Option<Pos2>,
}

impl Group {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            geometry: None,
            locked: false,
            fx: None,
            fy: None,
            drag_origin: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.fx.is_some() || self.fy.is_some()
    }

    pub fn release(&mut self) {
        self.fx = None;
        self.fy = None;
    }
}

/// Viewport pan translation and uniform zoom scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub k: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self { x: 0.0, y: 0.0, k: 1.0 };

    pub fn new(x: f32, y: f32, k: f32) -> Self {
        Self { x, y, k }
    }

    /// Converts a world position to screen space.
    pub fn apply(&self, world: Pos2) -> Pos2 {
        pos2(world.x * self.k + self.x, world.y * self.k + self.y)
    }

    /// Converts a screen position to world space.
    pub fn invert(&self, screen: Pos2) -> Pos2 {
        pos2((screen.x - self.x) / self.k, (screen.y - self.y) / self.k)
    }

    /// Linear interpolation between two transforms, `t` in `[0, 1]`.
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            k: self.k + (other.k - self.k) * t,
        }
    }
}

/// Maps a link bandwidth to its stroke width tier.
pub fn link_width(bandwidth: f64) -> u8 {
    const TIERS: [(f64, u8); 7] = [
        (1e7, 3),
        (1e8, 4),
        (1e9, 5),
        (1e10, 6),
        (2.5e10, 7),
        (5e10, 8),
        (1e11, 9),
    ];
    TIERS
        .iter()
        .find(|(limit, _)| bandwidth < *limit)
        .map(|(_, width)| *width)
        .unwrap_or(10)
}

/// Formats a bandwidth the way interface labels show it.
pub fn downscale_bandwidth(bandwidth: f64) -> String {
    const STEPS: [(f64, &str); 9] = [
        (1e11, "100gig"),
        (5e10, "50gig"),
        (4e10, "40gig"),
        (2.5e10, "25gig"),
        (2e10, "20gig"),
        (1e10, "10gig"),
        (1e9, "1gig"),
        (1e8, "100meg"),
        (1e7, "10meg"),
    ];
    STEPS
        .iter()
        .find(|(limit, _)| bandwidth >= *limit)
        .map(|(_, label)| (*label).to_string())
        .unwrap_or_else(|| format!("{bandwidth}bits"))
}

/// Returns false for RFC 1918 and link-local ranges.
pub fn is_public_subnet(subnet: &str) -> bool {
    let mut octets = subnet.split('.');
    let first = octets.next().unwrap_or_default();
    let second = octets.next().unwrap_or_default();
    match first {
        "10" => false,
        "169" => second != "254",
        "172" => !matches!(second.parse::<u8>(), Ok(16..=31)),
        "192" => second != "168",
        _ => true,
    }
}

/// A device or subnet record as returned by a data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "softwareOS", skip_serializing_if = "Option::is_none")]
    pub software_os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(deserialize_with = "flag")]
    pub is_private: bool,
    #[serde(deserialize_with = "flag")]
    pub is_unmanaged: bool,
    #[serde(deserialize_with = "flag")]
    pub external: bool,
}

impl RawNode {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A link record as returned by a data source; endpoints are node names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawLink {
    pub source: String,
    pub target: String,
    pub bandwidth: f64,
    #[serde(deserialize_with = "flag")]
    pub is_static_wan: bool,
    #[serde(deserialize_with = "flag")]
    pub warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub int_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(rename = "QoS", skip_serializing_if = "Option::is_none")]
    pub qos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl RawLink {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }
}

/// The payload a data source resolves to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawGraph {
    pub devices: Vec<RawNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    pub links: Vec<RawLink>,
    pub subnets: Vec<RawNode>,
}

impl RawGraph {
    /// Serialize the payload to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a payload from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Accepts `true`/`false`, numbers (non-zero is true) and null for boolean fields.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => s == "true" || s == "1",
        _ => false,
    })
}
