//! Shared application-wide constants.
//! Centralizes tweakable values used by the layout engine, the viewport and persistence.

use std::time::Duration;

// Simulation cooling
/// Alpha below which a simulation stops ticking on its own.
pub const ALPHA_MIN: f32 = 0.001;
/// Per-tick alpha decay, tuned so a simulation cools from 1.0 to `ALPHA_MIN` in ~300 ticks.
pub const ALPHA_DECAY: f32 = 0.022_763_82;
/// Fraction of velocity lost per tick.
pub const VELOCITY_DECAY: f32 = 0.4;
/// Alpha target raised while a drag gesture is live.
pub const DRAG_ALPHA_TARGET: f32 = 0.7;

// Node forces
/// Centering spring strength while grouping is enabled.
pub const CENTER_STRENGTH_GROUPED: f32 = 0.1;
/// Centering spring strength while grouping is disabled.
pub const CENTER_STRENGTH_UNGROUPED: f32 = 0.4;
/// Many-body strength while grouping is enabled (negative repels).
pub const CHARGE_STRENGTH_GROUPED: f32 = -3000.0;
/// Many-body strength while grouping is disabled.
pub const CHARGE_STRENGTH_UNGROUPED: f32 = -5000.0;
/// Barnes-Hut opening criterion for the many-body force.
pub const CHARGE_THETA: f32 = 0.9;
/// Link strength when there is no grouping.
pub const LINK_STRENGTH_UNGROUPED: f32 = 1.0;
/// Link strength between two members of the same group.
pub const LINK_STRENGTH_SAME_GROUP: f32 = 0.3;
/// Link strength between members of different groups.
pub const LINK_STRENGTH_CROSS_GROUP: f32 = 0.09;
/// Rest length of link springs.
pub const LINK_DISTANCE: f32 = 30.0;
/// Cluster force strength coefficient.
pub const CLUSTER_STRENGTH: f32 = 0.2;

// Group forces
/// Margin kept between group rectangles by the anti-collision force.
pub const RECT_COLLIDE_PADDING: f32 = 100.0;
/// Sweeps of the anti-collision force per tick.
pub const RECT_COLLIDE_ITERATIONS: usize = 1;

// Drill-down
/// Minimum zoom used when entering a drill-down layer.
pub const DRILL_DOWN_MIN_ZOOM: f32 = 1.5;
/// Extra distance added to the viewport's larger side for the radial placement radius.
pub const DRILL_DOWN_RADIUS_MARGIN: f32 = 100.0;
/// Upper bound on the angle between external neighbours of a subnet drill-down.
pub const SUBNET_MAX_SEPARATION: f32 = 0.5;
/// Ticks run to let a subnet's members settle before the camera frames them.
pub const SUBNET_SETTLE_TICKS: usize = 30;

// Viewport
/// Default camera animation length.
pub const FOCUS_DURATION: Duration = Duration::from_millis(250);
/// Settle delay added after a camera animation before `focus` resolves.
pub const FOCUS_SETTLE: Duration = Duration::from_millis(100);
/// Duration of the zoom step animation.
pub const SCALE_STEP_DURATION: Duration = Duration::from_millis(200);
/// Zoom used by the computed default transform.
pub const DEFAULT_ZOOM: f32 = 0.1;
/// Fraction of the viewport a framed area may cover.
pub const AREA_FILL: f32 = 0.9;
/// Scale used when the dismiss button of a focused group is pressed.
pub const UNFOCUS_ZOOM: f32 = 0.25;

// Layers
/// Default fade duration for drill-down layers.
pub const FADE_DURATION: Duration = Duration::from_millis(1000);
/// Fade duration used by subnet drill-downs.
pub const SUBNET_FADE_DURATION: Duration = Duration::from_millis(500);

// Persistence
/// Debounce delay for layout and transform writes.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(1000);
/// Minimum interval of the periodic persistence task.
pub const PERSIST_INTERVAL: Duration = Duration::from_millis(250);

// Rendering
/// Width used for static WAN links.
pub const STATIC_WAN_LINK_WIDTH: u8 = 5;
/// Offset of the focused group's dismiss button from the group's top-right corner.
pub const CLOSE_BUTTON_OFFSET: (f32, f32) = (20.0, 10.0);
/// Node icon size in world units.
pub const NODE_ICON_SIZE: f32 = 60.0;
/// Scale applied to subnet icons.
pub const SUBNET_ICON_SCALE: f32 = 1.5;
