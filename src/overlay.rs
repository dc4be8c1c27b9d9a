//! Annotation primitives drawn straight into an `RgbImage`.
//!
//! All coordinates are signed; anything outside the image is clipped pixel by
//! pixel, so callers never need to pre-clamp boxes or text positions.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};

use crate::detect::BoundingBox;

/// Highlight for egg detections and the OK banner.
pub const POSITIVE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Highlight for empty slots and the Not OK banner.
pub const NEGATIVE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const BANNER_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_SIZE: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayStyle {
    /// Weight of the highlight colour in the box fill, `0.0..=1.0`.
    pub opacity: f32,
    /// Length of each corner bracket arm in pixels.
    pub corner_len: u32,
    pub thickness: u32,
    /// Integer upscale of the 8x8 glyphs used for labels.
    pub label_scale: u32,
    /// Vertical gap between the label and the top edge of the box.
    pub label_gap: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            opacity: 0.3,
            corner_len: 20,
            thickness: 2,
            label_scale: 2,
            label_gap: 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BannerStyle {
    /// Top-left corner of the banner.
    pub origin: (u32, u32),
    /// Horizontal and vertical padding around the text.
    pub padding: (u32, u32),
    pub text_scale: u32,
}

impl Default for BannerStyle {
    fn default() -> Self {
        Self {
            origin: (30, 10),
            padding: (20, 10),
            text_scale: 3,
        }
    }
}

/// Pixel rectangle with exclusive right/bottom edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl Rect {
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

/// Label text shown above a detection box.
pub fn detection_label(class_name: &str, confidence: f32) -> String {
    format!("{} {:.2}", class_name, confidence)
}

/// Draw one detection: translucent fill, corner brackets, and a label above the box.
pub fn render_overlay(
    image: &mut RgbImage,
    bbox: &BoundingBox,
    color: Rgb<u8>,
    label: &str,
    style: &OverlayStyle,
) {
    let (x1, y1) = (bbox.x1() as i64, bbox.y1() as i64);
    let (x2, y2) = (bbox.x2() as i64, bbox.y2() as i64);

    blend_rect(
        image,
        Rect { x0: x1, y0: y1, x1: x2 + 1, y1: y2 + 1 },
        color,
        style.opacity,
    );
    draw_corner_brackets(image, bbox, color, style.corner_len, style.thickness);

    let (_, text_h) = text_size(label, style.label_scale);
    let text_y = y1 - style.label_gap as i64 - text_h as i64;
    draw_text(image, x1, text_y, label, color, style.label_scale);
}

/// Draw the tray status banner and return the rectangle it covers.
pub fn draw_status_banner(
    image: &mut RgbImage,
    text: &str,
    background: Rgb<u8>,
    foreground: Rgb<u8>,
    style: &BannerStyle,
) -> Rect {
    let (text_w, text_h) = text_size(text, style.text_scale);
    let x0 = style.origin.0 as i64;
    let y0 = style.origin.1 as i64;
    let rect = Rect {
        x0,
        y0,
        x1: x0 + text_w as i64 + 2 * style.padding.0 as i64,
        y1: y0 + text_h as i64 + 2 * style.padding.1 as i64,
    };
    fill_rect(image, rect, background);
    draw_text(
        image,
        x0 + style.padding.0 as i64,
        y0 + style.padding.1 as i64,
        text,
        foreground,
        style.text_scale,
    );
    rect
}

/// Corner segments only, drawn inward from each corner.
pub fn draw_corner_brackets(
    image: &mut RgbImage,
    bbox: &BoundingBox,
    color: Rgb<u8>,
    corner_len: u32,
    thickness: u32,
) {
    let (x1, y1) = (bbox.x1() as i64, bbox.y1() as i64);
    let (x2, y2) = (bbox.x2() as i64, bbox.y2() as i64);
    let len = corner_len as i64;
    let t = thickness.max(1) as i64;

    let segments = [
        // top-left
        Rect { x0: x1, y0: y1, x1: x1 + len + 1, y1: y1 + t },
        Rect { x0: x1, y0: y1, x1: x1 + t, y1: y1 + len + 1 },
        // top-right
        Rect { x0: x2 - len, y0: y1, x1: x2 + 1, y1: y1 + t },
        Rect { x0: x2 - t + 1, y0: y1, x1: x2 + 1, y1: y1 + len + 1 },
        // bottom-left
        Rect { x0: x1, y0: y2 - t + 1, x1: x1 + len + 1, y1: y2 + 1 },
        Rect { x0: x1, y0: y2 - len, x1: x1 + t, y1: y2 + 1 },
        // bottom-right
        Rect { x0: x2 - len, y0: y2 - t + 1, x1: x2 + 1, y1: y2 + 1 },
        Rect { x0: x2 - t + 1, y0: y2 - len, x1: x2 + 1, y1: y2 + 1 },
    ];
    for segment in segments {
        fill_rect(image, segment, color);
    }
}

/// Render text with the 8x8 bitmap font. `(x, y)` is the top-left of the first glyph.
///
/// Characters outside the basic Latin block are drawn as `?`.
pub fn draw_text(image: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>, scale: u32) {
    let scale = scale.max(1) as i64;
    let advance = GLYPH_SIZE as i64 * scale;
    for (i, ch) in text.chars().enumerate() {
        let glyph = match BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) {
            Some(glyph) => glyph,
            None => continue,
        };
        let gx = x + i as i64 * advance;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE as i64 {
                if *bits & (1u8 << col) == 0 {
                    continue;
                }
                let px = gx + col * scale;
                let py = y + row as i64 * scale;
                fill_rect(
                    image,
                    Rect { x0: px, y0: py, x1: px + scale, y1: py + scale },
                    color,
                );
            }
        }
    }
}

/// Width and height in pixels of `text` at the given glyph scale.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let scale = scale.max(1);
    let chars = text.chars().count() as u32;
    (chars * GLYPH_SIZE * scale, GLYPH_SIZE * scale)
}

pub fn fill_rect(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    for_each_clipped(image, rect, |px| *px = color);
}

/// Mix `color` into every pixel of `rect` with weight `opacity`.
pub fn blend_rect(image: &mut RgbImage, rect: Rect, color: Rgb<u8>, opacity: f32) {
    let alpha = opacity.clamp(0.0, 1.0);
    for_each_clipped(image, rect, |px| {
        for c in 0..3 {
            let mixed = color[c] as f32 * alpha + px[c] as f32 * (1.0 - alpha);
            px[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    });
}

fn for_each_clipped<F: FnMut(&mut Rgb<u8>)>(image: &mut RgbImage, rect: Rect, mut f: F) {
    let (w, h) = image.dimensions();
    let x0 = rect.x0.clamp(0, w as i64) as u32;
    let x1 = rect.x1.clamp(0, w as i64) as u32;
    let y0 = rect.y0.clamp(0, h as i64) as u32;
    let y1 = rect.y1.clamp(0, h as i64) as u32;
    for y in y0..y1 {
        for x in x0..x1 {
            f(image.get_pixel_mut(x, y));
        }
    }
}
