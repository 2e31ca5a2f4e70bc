use image::Rgb;
use serde::{Deserialize, Serialize};

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);

/// Registration state of a vehicle as stored in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub valid: bool,
    pub expired: bool,
    pub cases: bool,
}

/// A candidate plate region reported by the detector, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// Integer box clipped to the frame, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Detection {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    /// Truncates the box to whole pixels and clips it to a `width` x `height`
    /// frame. Returns `None` when nothing of the box is left.
    pub fn pixel_box(&self, width: u32, height: u32) -> Option<PixelBox> {
        let clip = |v: f32, max: u32| -> u32 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as u32).min(max)
            }
        };
        let b = PixelBox {
            x1: clip(self.x1, width),
            y1: clip(self.y1, height),
            x2: clip(self.x2, width),
            y2: clip(self.y2, height),
        };
        if b.x2 <= b.x1 || b.y2 <= b.y1 {
            None
        } else {
            Some(b)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusResult {
    pub label: String,
    pub color: Rgb<u8>,
}

/// Answer of the single-image endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateReport {
    pub plate_number: String,
    pub confidence: f32,
    pub vehicle_info: Option<VehicleRecord>,
    pub status: String,
}

/// Canonical registry key for recognized text: spaces removed, uppercased.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != ' ')
        .collect::<String>()
        .to_uppercase()
}
