//! Turns a mail attachment into a frame for the e-ink panel.

use std::io::Cursor;

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::models::RenderedFrame;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const GLYPH_SIZE: u32 = 8;
const GLYPH_SCALE: u32 = 2;
const MARGIN: u32 = 8;
const LINE_GAP: u32 = 4;
const MAX_CAPTION_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    /// Fill the panel, cropping overflow around the center.
    #[default]
    Crop,
    /// Fit inside the panel, letterboxing on white.
    Contain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renderer {
    width: u32,
    height: u32,
}

impl Renderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Deterministic: identical inputs give byte-identical PNGs.
    pub fn render(
        &self,
        source: &DynamicImage,
        caption: &str,
        fit: FitPolicy,
    ) -> Result<RenderedFrame, RenderError> {
        let mut canvas = self.fit(source, fit);
        self.draw_caption(&mut canvas, caption);

        let mut png_bytes = Vec::new();
        DynamicImage::ImageRgb8(canvas).write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;

        Ok(RenderedFrame {
            png_bytes,
            width: self.width,
            height: self.height,
        })
    }

    fn fit(&self, source: &DynamicImage, fit: FitPolicy) -> RgbImage {
        match fit {
            FitPolicy::Crop => source
                .resize_to_fill(self.width, self.height, FilterType::Lanczos3)
                .to_rgb8(),
            FitPolicy::Contain => {
                let resized = source
                    .resize(self.width, self.height, FilterType::Lanczos3)
                    .to_rgb8();
                let mut canvas = RgbImage::from_pixel(self.width, self.height, WHITE);
                let x = (self.width - resized.width()) / 2;
                let y = (self.height - resized.height()) / 2;
                imageops::overlay(&mut canvas, &resized, i64::from(x), i64::from(y));
                canvas
            }
        }
    }

    fn draw_caption(&self, canvas: &mut RgbImage, caption: &str) {
        let cell = GLYPH_SIZE * GLYPH_SCALE;
        let columns = (self.width.saturating_sub(2 * MARGIN) / cell) as usize;
        if columns == 0 {
            return;
        }

        let lines = wrap_caption(caption, columns, MAX_CAPTION_LINES);
        if lines.is_empty() {
            return;
        }

        let count = lines.len() as u32;
        let banner = (count * cell + (count - 1) * LINE_GAP + 2 * MARGIN).min(self.height);
        let top = self.height - banner;
        for y in top..self.height {
            for x in 0..self.width {
                canvas.put_pixel(x, y, WHITE);
            }
        }

        for (row, line) in lines.iter().enumerate() {
            let y = top + MARGIN + row as u32 * (cell + LINE_GAP);
            for (col, c) in line.chars().enumerate() {
                draw_glyph(canvas, c, MARGIN + col as u32 * cell, y);
            }
        }
    }
}

fn draw_glyph(canvas: &mut RgbImage, c: char, x0: u32, y0: u32) {
    let glyph = BASIC_FONTS.get(c).unwrap_or([0; 8]);
    for (gy, bits) in glyph.iter().enumerate() {
        for gx in 0..GLYPH_SIZE {
            if bits & (1 << gx) == 0 {
                continue;
            }
            for dy in 0..GLYPH_SCALE {
                for dx in 0..GLYPH_SCALE {
                    let x = x0 + gx * GLYPH_SCALE + dx;
                    let y = y0 + gy as u32 * GLYPH_SCALE + dy;
                    if x < canvas.width() && y < canvas.height() {
                        canvas.put_pixel(x, y, BLACK);
                    }
                }
            }
        }
    }
}

/// Folds to printable ASCII and wraps on word boundaries. Words longer
/// than a line are split; overflow past `max_lines` ends in `...`.
fn wrap_caption(text: &str, columns: usize, max_lines: usize) -> Vec<String> {
    let folded: String = text
        .chars()
        .map(|c| match c {
            c if c.is_ascii_graphic() => c,
            c if c.is_whitespace() => ' ',
            _ => '?',
        })
        .collect();

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for mut word in folded.split_whitespace() {
        loop {
            let needed = if current.is_empty() {
                word.len()
            } else {
                current.len() + 1 + word.len()
            };
            if needed <= columns {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                break;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                continue;
            }
            let (head, tail) = word.split_at(columns);
            lines.push(head.to_string());
            word = tail;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            last.truncate(columns.saturating_sub(3).min(last.len()));
            last.push_str("...");
        }
    }
    lines
}
