//! TrueType text for frame overlays, rendered through imageproc.

use failure::Error;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use rusttype::{Font, Scale};
use std::fs;
use std::path::Path;

const TEXT_HEIGHT: f32 = 20.0;

pub struct LabelFont {
    font: Font<'static>,
    scale: Scale,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<LabelFont, Error> {
        let data = fs::read(path).map_err(|e| format_err!("Cannot read font {:?}: {}", path, e))?;
        LabelFont::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<LabelFont, Error> {
        let font = Font::try_from_vec(data).ok_or_else(|| format_err!("Not a TrueType font"))?;
        Ok(LabelFont {
            font,
            scale: Scale::uniform(TEXT_HEIGHT),
        })
    }

    pub fn line_height(&self) -> i32 {
        self.scale.y.ceil() as i32
    }

    pub fn text_width(&self, text: &str) -> i32 {
        text_size(self.scale, &self.font, text).0
    }

    /// Draws `text` with its top-left corner at (`x`, `y`), shifted left
    /// when it would run past the right edge of `frame`.
    pub fn draw(&self, frame: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let x = x.min(frame.width() as i32 - self.text_width(text)).max(0);
        draw_text_mut(frame, color, x, y, self.scale, &self.font, text);
    }
}
