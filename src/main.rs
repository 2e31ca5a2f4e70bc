use env_logger::Env;
use failure::Error;
use log::{error, info, warn};
use plate_checker::config::Config;
use plate_checker::label::LabelFont;
use plate_checker::pipeline::ImagePipeline;
use plate_checker::registry::Registry;
use plate_checker::server::{self, AppState};
use plate_checker::{detector, recognizer};
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-checker");

    if let Err(e) = run() {
        error!("Failed to start: {}", e);
        process::exit(1);
    }
    info!("Exiting main");
}

// The model, the registry and the blocking HTTP client are all set up before
// the async runtime exists.
fn run() -> Result<(), Error> {
    let config = Config::from_env()?;
    let registry = Arc::new(Registry::load(&config.registry_path));
    let detector = detector::load(&config)?;
    let recognizer = recognizer::load(&config)?;
    info!("Using the {:?} recognizer", config.recognizer);

    let mut pipeline = ImagePipeline::new(detector, recognizer, registry, config.jpeg_quality);
    match LabelFont::load(&config.font_path) {
        Ok(font) => pipeline = pipeline.with_font(font),
        Err(e) => warn!("Streaming without plate labels: {}", e),
    }
    let pipeline = Arc::new(pipeline);
    let state = Arc::new(AppState::new(
        pipeline,
        config.camera_device.clone(),
        config.camera_size,
    ));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::run(state, config.bind));
    Ok(())
}
