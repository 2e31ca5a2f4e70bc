use super::OcrEngine;
use failure::Error;
use image::{DynamicImage, ImageOutputFormat};
use leptess::LepTess;
use std::io::Cursor;
use std::sync::Mutex;

struct TessHandle(LepTess);

// The handle is only ever touched under the engine's mutex.
unsafe impl Send for TessHandle {}

/// Local Tesseract OCR through leptess.
pub struct TesseractEngine {
    handle: Mutex<TessHandle>,
}

impl TesseractEngine {
    pub fn new(data_path: Option<&str>) -> Result<Self, Error> {
        let tess = LepTess::new(data_path, "eng")
            .map_err(|e| format_err!("Failed to initialize Tesseract: {:?}", e))?;
        Ok(TesseractEngine {
            handle: Mutex::new(TessHandle(tess)),
        })
    }
}

impl OcrEngine for TesseractEngine {
    fn read_text(&self, image: &DynamicImage) -> Result<Option<String>, Error> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;

        let mut guard = self
            .handle
            .lock()
            .map_err(|_| format_err!("Tesseract handle poisoned"))?;
        let tess = &mut guard.0;
        tess.set_image_from_mem(&png)
            .map_err(|e| format_err!("Tesseract could not load region: {:?}", e))?;
        let text = tess
            .get_utf8_text()
            .map_err(|e| format_err!("Tesseract returned invalid text: {:?}", e))?;
        let text = text.trim();
        Ok(if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        })
    }
}
