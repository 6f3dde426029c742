//! # Topology Diagram
//!
//! An interactive, physically simulated network topology diagram. Devices and subnets are laid
//! out by a force simulation, clustered into groups whose boxes push each other apart, and can
//! be drilled into: a device opens a radial view of its neighbours, a subnet opens a view of its
//! members with outside neighbours pinned around it.
//!
//! ## Features
//! - Force layout with link, charge, centering and cluster forces
//! - Group boxes kept apart by a quadtree-accelerated rectangle collision force
//! - Drag to rearrange nodes and groups; Shift+click to drill down or focus a group
//! - Layer stack with fade transitions and a back action
//! - Pan, zoom, search and persisted layouts
//!
//! The engine is independent of the window: [`Diagram`] drives any [`RenderSurface`] and reads
//! payloads from any [`DataSource`].

#![deny(unsafe_code)]

pub mod constants;
pub mod data;
pub mod diagram;
pub mod drill_down;
pub mod error;
pub mod gesture;
pub mod grouping;
pub mod layers;
pub mod persistence;
pub mod render;
pub mod settings;
pub mod simulation;
pub mod types;
pub mod viewport;

mod demo;
mod ui;

// Re-export the public surface
pub use data::{DataSource, JsonDirectorySource, Query, StaticSource};
pub use diagram::{Diagram, DiagramState, Subscription};
pub use error::{DiagramError, Result};
pub use gesture::GestureContext;
pub use layers::{Layer, LayerKey, LayerKind, LayerStack};
pub use persistence::{KeyValueStore, LayoutStore, MemoryStore, Store};
pub use render::{RecordingSurface, RenderSurface};
pub use settings::{Settings, SettingsPatch};
pub use types::*;
pub use ui::AppConfig;
use ui::TopologyApp;

/// Runs the topology viewer, taking an optional payload directory from the command line.
///
/// # Returns
///
/// Returns `Ok(())` if the application runs successfully, or an `eframe::Error` if
/// initialization fails.
///
/// # Example
///
/// ```no_run
/// use topology_diagram::run_app;
///
/// fn main() -> Result<(), eframe::Error> {
///     run_app()
/// }
/// ```
pub fn run_app() -> std::result::Result<(), eframe::Error> {
    run_app_with(AppConfig::from_args())
}

/// Runs the topology viewer with explicit startup options.
pub fn run_app_with(config: AppConfig) -> std::result::Result<(), eframe::Error> {
    let options = eframe::NativeOptions::default();
    eframe::run_native(
        "Topology Diagram",
        options,
        Box::new(move |cc| Ok(Box::new(TopologyApp::new(cc, config)?))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert!(settings.grouping);
        assert!(!settings.toolbar);
        assert_eq!(settings.scale_extent(), (0.1, 8.0));
    }

    #[test]
    fn test_transform_round_trip() {
        let transform = Transform::new(10.0, 20.0, 2.0);
        let world = eframe::egui::pos2(3.0, 4.0);
        assert_eq!(transform.invert(transform.apply(world)), world);
    }
}
