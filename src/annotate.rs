use crate::error::PipelineError;
use crate::label::LabelFont;
use crate::recognizer::Recognizer;
use crate::registry::VehicleLookup;
use crate::status::classify;
use crate::types::{normalize_plate, Detection, PixelBox, StatusResult};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use log::{debug, warn};

const LINE_GAP: i32 = 3;

/// What happened to one detection while annotating a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Annotated { text: String, status: StatusResult },
    /// The box had no pixels left after clipping.
    EmptyRegion,
    NoText,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Annotation {
    /// Text of the last detection that was read successfully.
    pub primary_text: Option<String>,
    pub outcomes: Vec<DetectionOutcome>,
}

/// Reads, classifies and draws every detection onto `frame`, in detector
/// order. A failure on one detection is logged and does not stop the others.
/// Without a font only the boxes are drawn.
pub fn annotate(
    frame: &mut RgbImage,
    detections: &[Detection],
    recognizer: &dyn Recognizer,
    registry: &dyn VehicleLookup,
    font: Option<&LabelFont>,
) -> Result<Annotation, PipelineError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::Input("Empty frame".to_string()));
    }

    let mut annotation = Annotation::default();
    for detection in detections {
        let outcome = annotate_one(frame, detection, recognizer, registry, font);
        if let DetectionOutcome::Annotated { text, .. } = &outcome {
            annotation.primary_text = Some(text.clone());
        }
        annotation.outcomes.push(outcome);
    }
    Ok(annotation)
}

fn annotate_one(
    frame: &mut RgbImage,
    detection: &Detection,
    recognizer: &dyn Recognizer,
    registry: &dyn VehicleLookup,
    font: Option<&LabelFont>,
) -> DetectionOutcome {
    let pixels = match detection.pixel_box(frame.width(), frame.height()) {
        Some(b) => b,
        None => return DetectionOutcome::EmptyRegion,
    };
    let region = image::imageops::crop_imm(
        frame,
        pixels.x1,
        pixels.y1,
        pixels.width(),
        pixels.height(),
    )
    .to_image();

    let text = match recognizer.recognize(&region) {
        Ok(Some(raw)) => normalize_plate(&raw),
        Ok(None) => return DetectionOutcome::NoText,
        Err(e) => {
            warn!("Error in OCR: {}", e);
            return DetectionOutcome::Failed(e.to_string());
        }
    };
    if text.is_empty() {
        return DetectionOutcome::NoText;
    }

    let record = registry.lookup(&text);
    let status = classify(record.as_ref());
    debug!("Plate {} ({:.2}): {}", text, detection.confidence, status.label);
    draw_detection(frame, &pixels, &text, detection.confidence, &status, font);
    DetectionOutcome::Annotated { text, status }
}

/// Box in the status color, with the plate line and the status line stacked
/// above it.
pub fn draw_detection(
    frame: &mut RgbImage,
    pixels: &PixelBox,
    text: &str,
    confidence: f32,
    status: &StatusResult,
    font: Option<&LabelFont>,
) {
    draw_box(frame, pixels, status.color);
    let font = match font {
        Some(font) => font,
        None => return,
    };
    let x = pixels.x1 as i32;
    let status_y = pixels.y1 as i32 - LINE_GAP - font.line_height();
    let plate_y = status_y - LINE_GAP - font.line_height();
    let plate_line = format!("Plate: {} ({:.2})", text, confidence);
    font.draw(frame, x, plate_y, &plate_line, status.color);
    font.draw(frame, x, status_y, &status.label, status.color);
}

fn draw_box(frame: &mut RgbImage, pixels: &PixelBox, color: Rgb<u8>) {
    let (w, h) = (pixels.width(), pixels.height());
    draw_hollow_rect_mut(
        frame,
        Rect::at(pixels.x1 as i32, pixels.y1 as i32).of_size(w, h),
        color,
    );
    if w > 2 && h > 2 {
        draw_hollow_rect_mut(
            frame,
            Rect::at(pixels.x1 as i32 + 1, pixels.y1 as i32 + 1).of_size(w - 2, h - 2),
            color,
        );
    }
}
