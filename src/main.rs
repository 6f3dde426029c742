fn main() -> Result<(), eframe::Error> {
    // Set up logging for development
    env_logger::init();

    // Run the topology viewer
    topology_diagram::run_app()
}
