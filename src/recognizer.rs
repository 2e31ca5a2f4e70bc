//! Plate text recognition backends.
//!
//! Every backend hands back text in the same canonical shape (uppercase,
//! separators removed) so registry keys match whichever backend is wired in.

use crate::config::{Config, RecognizerKind};
use failure::Error;
use image::{DynamicImage, RgbImage};
use imageproc::contrast::adaptive_threshold;
use log::debug;
use std::sync::Arc;

mod gemini;
#[cfg(feature = "tesseract")]
mod tesseract;

pub use gemini::GeminiRecognizer;
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractEngine;

/// Block radius for adaptive thresholding (an 11x11 neighbourhood).
const THRESHOLD_BLOCK_RADIUS: u32 = 5;

/// Turns a cropped plate region into text. `Ok(None)` means nothing legible.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, region: &RgbImage) -> Result<Option<String>, Error>;
}

/// A raw OCR engine: reads whatever text is in an image.
pub trait OcrEngine: Send + Sync {
    fn read_text(&self, image: &DynamicImage) -> Result<Option<String>, Error>;
}

/// Runs an OCR engine on a thresholded grayscale copy of the region first and
/// on the untouched region if that reads nothing.
pub struct ThresholdedOcr<E> {
    engine: E,
}

impl<E: OcrEngine> ThresholdedOcr<E> {
    pub fn new(engine: E) -> Self {
        ThresholdedOcr { engine }
    }
}

impl<E: OcrEngine> Recognizer for ThresholdedOcr<E> {
    fn recognize(&self, region: &RgbImage) -> Result<Option<String>, Error> {
        let gray = image::imageops::grayscale(region);
        let thresholded = DynamicImage::ImageLuma8(adaptive_threshold(&gray, THRESHOLD_BLOCK_RADIUS));
        if let Some(text) = non_empty(self.engine.read_text(&thresholded)?) {
            return Ok(Some(text));
        }
        debug!("Thresholded region read nothing, retrying on the raw crop");
        Ok(non_empty(
            self.engine
                .read_text(&DynamicImage::ImageRgb8(region.clone()))?,
        ))
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Builds the backend selected by the configuration.
pub fn load(config: &Config) -> Result<Arc<dyn Recognizer>, Error> {
    match config.recognizer {
        RecognizerKind::Gemini => {
            let api_key = config
                .gemini_api_key
                .clone()
                .ok_or_else(|| format_err!("GEMINI_API_KEY must be set for the gemini recognizer"))?;
            Ok(Arc::new(GeminiRecognizer::new(
                &config.gemini_endpoint,
                &config.gemini_model,
                api_key,
            )?))
        }
        RecognizerKind::Tesseract => load_tesseract(config),
    }
}

#[cfg(feature = "tesseract")]
fn load_tesseract(config: &Config) -> Result<Arc<dyn Recognizer>, Error> {
    let engine = TesseractEngine::new(config.tessdata.as_deref())?;
    Ok(Arc::new(ThresholdedOcr::new(engine)))
}

#[cfg(not(feature = "tesseract"))]
fn load_tesseract(_config: &Config) -> Result<Arc<dyn Recognizer>, Error> {
    Err(format_err!(
        "The tesseract recognizer needs a build with the `tesseract` feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};
    use std::sync::Mutex;

    /// Replays canned answers and remembers which kind of image it was shown.
    struct ScriptedEngine {
        answers: Mutex<Vec<Option<String>>>,
        seen_gray: Mutex<Vec<bool>>,
    }

    impl ScriptedEngine {
        fn new(answers: Vec<Option<&str>>) -> Self {
            ScriptedEngine {
                answers: Mutex::new(answers.into_iter().rev().map(|a| a.map(String::from)).collect()),
                seen_gray: Mutex::new(Vec::new()),
            }
        }
    }

    impl OcrEngine for ScriptedEngine {
        fn read_text(&self, image: &DynamicImage) -> Result<Option<String>, Error> {
            self.seen_gray
                .lock()
                .unwrap()
                .push(matches!(image, DynamicImage::ImageLuma8(_)));
            Ok(self.answers.lock().unwrap().pop().flatten())
        }
    }

    fn region() -> RgbImage {
        RgbImage::from_pixel(30, 10, Rgb([200, 200, 200]))
    }

    #[test]
    fn prefers_the_thresholded_read() {
        let ocr = ThresholdedOcr::new(ScriptedEngine::new(vec![Some(" KL01 "), Some("WRONG")]));
        assert_eq!(ocr.recognize(&region()).unwrap(), Some("KL01".to_string()));
        assert_eq!(*ocr.engine.seen_gray.lock().unwrap(), vec![true]);
    }

    #[test]
    fn falls_back_to_the_raw_region() {
        let ocr = ThresholdedOcr::new(ScriptedEngine::new(vec![Some("  "), Some("AB1234")]));
        assert_eq!(ocr.recognize(&region()).unwrap(), Some("AB1234".to_string()));
        assert_eq!(*ocr.engine.seen_gray.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn nothing_read_twice_is_none() {
        let ocr = ThresholdedOcr::new(ScriptedEngine::new(vec![None, None]));
        assert_eq!(ocr.recognize(&region()).unwrap(), None);
    }

    #[test]
    fn threshold_keeps_region_size() {
        let gray = image::imageops::grayscale(&region());
        let thresholded = adaptive_threshold(&gray, THRESHOLD_BLOCK_RADIUS);
        assert_eq!(DynamicImage::ImageLuma8(thresholded).dimensions(), (30, 10));
    }
}
