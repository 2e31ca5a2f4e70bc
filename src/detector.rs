use crate::config::Config;
use crate::types::Detection;
use failure::Error;
use image::RgbImage;

#[cfg(feature = "onnx")]
mod yolo;
#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;

/// Confidence threshold used for every detection pass.
pub const CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Overlap above which the weaker of two boxes is suppressed.
pub const IOU_THRESHOLD: f32 = 0.45;

/// A pretrained plate detector. Results come back best-first.
pub trait Detector {
    fn detect(&mut self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>, Error>;
}

#[cfg(feature = "onnx")]
pub fn load(config: &Config) -> Result<Box<dyn Detector + Send>, Error> {
    let detector = YoloDetector::new(&config.model_path, IOU_THRESHOLD)?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
pub fn load(config: &Config) -> Result<Box<dyn Detector + Send>, Error> {
    Err(format_err!(
        "Cannot load {:?}: no detector backend in this build, rebuild with `--features onnx`",
        config.model_path
    ))
}

#[cfg(all(test, not(feature = "onnx")))]
mod tests {
    use super::*;

    #[test]
    fn missing_backend_names_the_feature() {
        let config = Config::from_lookup(|_| None).unwrap();
        let message = match load(&config) {
            Err(e) => e.to_string(),
            Ok(_) => panic!("a detector loaded without a backend"),
        };
        assert!(message.contains("--features onnx"), "{}", message);
    }
}
