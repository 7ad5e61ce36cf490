//! Frame annotation and JPEG encoding.
//!
//! Each person's current box and frozen home zone are outlined in the status
//! color (green while observing or inside, red once outside). A filled tag bar
//! above the box carries the same color and a label such as
//! `person 2: outside`, drawn with a small built-in bitmap font.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::geometry::BoundingBox;
use crate::tracker::{PersonObservation, ZoneStatus};

pub const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
pub const RED: Rgb<u8> = Rgb([220, 0, 0]);
pub const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_SCALE: u32 = 2;
const GLYPH_ADVANCE: u32 = (GLYPH_WIDTH + 1) * GLYPH_SCALE;
const LABEL_PADDING: u32 = 3;
const TAG_HEIGHT: u32 = GLYPH_HEIGHT * GLYPH_SCALE + 2 * LABEL_PADDING;

pub fn status_color(status: ZoneStatus) -> Rgb<u8> {
    match status {
        ZoneStatus::Observing | ZoneStatus::Inside => GREEN,
        ZoneStatus::Outside => RED,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Annotator {
    thickness: u32,
}

impl Annotator {
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness: thickness.max(1),
        }
    }

    pub fn annotate(&self, image: &mut RgbImage, observations: &[PersonObservation]) {
        for observation in observations {
            let color = status_color(observation.status);
            if let Some(zone) = observation.home_zone {
                self.outline(image, &zone, color);
            }
            self.outline(image, &observation.bbox, color);
            let label = format!("{}: {}", observation.id, observation.status);
            tag_bar(image, &observation.bbox, &label, color);
        }
    }

    fn outline(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
        for inset in 0..self.thickness {
            if let Some(rect) = to_rect(bbox, inset, image.width(), image.height()) {
                draw_hollow_rect_mut(image, rect, color);
            }
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Filled bar above the box, wide enough for both the box and its label.
fn tag_bar(image: &mut RgbImage, bbox: &BoundingBox, label: &str, color: Rgb<u8>) {
    let left = bbox.left.max(0.0);
    let top = (bbox.top - TAG_HEIGHT as f32).max(0.0);
    let right = bbox.right.max(left + label_width(label) as f32);
    let bar = BoundingBox::new(left, top, right, top + TAG_HEIGHT as f32);
    if let Some(rect) = to_rect(&bar, 0, image.width(), image.height()) {
        draw_filled_rect_mut(image, rect, color);
        draw_label(
            image,
            rect.left() + LABEL_PADDING as i32,
            rect.top() + LABEL_PADDING as i32,
            label,
        );
    }
}

fn label_width(label: &str) -> u32 {
    label.chars().count() as u32 * GLYPH_ADVANCE + 2 * LABEL_PADDING
}

fn draw_label(image: &mut RgbImage, x: i32, y: i32, label: &str) {
    let mut pen = x;
    for ch in label.chars() {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let px = pen + (col * GLYPH_SCALE) as i32;
                    let py = y + (row as u32 * GLYPH_SCALE) as i32;
                    draw_filled_rect_mut(
                        image,
                        Rect::at(px, py).of_size(GLYPH_SCALE, GLYPH_SCALE),
                        LABEL_TEXT,
                    );
                }
            }
        }
        pen += GLYPH_ADVANCE as i32;
    }
}

/// 5x7 rows, most significant of the low five bits on the left. Characters
/// outside the label alphabet draw as blanks.
fn glyph(ch: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let rows = match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        'b' => [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x1E],
        'd' => [0x01, 0x01, 0x0D, 0x13, 0x11, 0x11, 0x0F],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        'g' => [0x00, 0x0F, 0x11, 0x11, 0x0F, 0x01, 0x0E],
        'i' => [0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x0E],
        'n' => [0x00, 0x00, 0x16, 0x19, 0x11, 0x11, 0x11],
        'o' => [0x00, 0x00, 0x0E, 0x11, 0x11, 0x11, 0x0E],
        'p' => [0x00, 0x00, 0x1E, 0x11, 0x1E, 0x10, 0x10],
        'r' => [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10],
        's' => [0x00, 0x00, 0x0E, 0x10, 0x0E, 0x01, 0x1E],
        't' => [0x08, 0x08, 0x1C, 0x08, 0x08, 0x09, 0x06],
        'u' => [0x00, 0x00, 0x11, 0x11, 0x11, 0x13, 0x0D],
        'v' => [0x00, 0x00, 0x11, 0x11, 0x11, 0x0A, 0x04],
        _ => return None,
    };
    Some(rows)
}

/// Pixel rectangle shrunk by `inset` on every side and clipped to the image.
fn to_rect(bbox: &BoundingBox, inset: u32, width: u32, height: u32) -> Option<Rect> {
    let clipped = bbox.clamp_to(width, height);
    let inset = inset as f32;
    let left = (clipped.left + inset).round() as i32;
    let top = (clipped.top + inset).round() as i32;
    let right = (clipped.right - inset).round() as i32;
    let bottom = (clipped.bottom - inset).round() as i32;
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    if !(1..=100).contains(&quality) {
        return Err(anyhow!("jpeg quality must be between 1 and 100"));
    }
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode annotated frame as jpeg")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::PersonId;

    fn observation(
        bbox: BoundingBox,
        zone: Option<BoundingBox>,
        status: ZoneStatus,
    ) -> PersonObservation {
        PersonObservation {
            id: PersonId(1),
            bbox,
            confidence: 0.9,
            home_zone: zone,
            status,
        }
    }

    #[test]
    fn outside_person_is_outlined_in_red() {
        let mut image = RgbImage::new(100, 100);
        let zone = BoundingBox::new(10.0, 20.0, 40.0, 80.0);
        let bbox = BoundingBox::new(60.0, 20.0, 90.0, 80.0);
        let observed = observation(bbox, Some(zone), ZoneStatus::Outside);
        Annotator::new(1).annotate(&mut image, &[observed]);

        assert_eq!(*image.get_pixel(60, 50), RED);
        assert_eq!(*image.get_pixel(10, 50), RED);
        // Interiors stay untouched.
        assert_eq!(*image.get_pixel(75, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn observing_person_is_green_without_zone() {
        let mut image = RgbImage::new(50, 50);
        let bbox = BoundingBox::new(10.0, 10.0, 30.0, 40.0);
        let observed = observation(bbox, None, ZoneStatus::Observing);
        Annotator::default().annotate(&mut image, &[observed]);
        assert_eq!(*image.get_pixel(10, 25), GREEN);
        assert_eq!(*image.get_pixel(11, 25), GREEN);
    }

    #[test]
    fn boxes_past_the_edge_are_clipped() {
        let mut image = RgbImage::new(20, 20);
        let bbox = BoundingBox::new(-10.0, -10.0, 50.0, 50.0);
        let observed = observation(bbox, None, ZoneStatus::Inside);
        Annotator::new(3).annotate(&mut image, &[observed]);
        assert_eq!(*image.get_pixel(0, 10), GREEN);
    }

    #[test]
    fn tag_bar_carries_a_readable_label() {
        let mut image = RgbImage::new(320, 120);
        let bbox = BoundingBox::new(40.0, 40.0, 90.0, 110.0);
        let observed = PersonObservation {
            id: PersonId(7),
            ..observation(bbox, None, ZoneStatus::Outside)
        };
        Annotator::new(1).annotate(&mut image, &[observed]);

        // "person 7: outside" is wider than the box, so the bar grows to fit.
        let bar_top = 40 - TAG_HEIGHT;
        let bar_right = 40 + label_width("person 7: outside");
        assert!(bar_right > 90);
        assert_eq!(*image.get_pixel(40, bar_top), RED);
        assert_eq!(*image.get_pixel(bar_right - 1, bar_top), RED);

        let text_pixels = (40..bar_right)
            .flat_map(|x| (bar_top..40).map(move |y| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) == LABEL_TEXT)
            .count();
        assert!(text_pixels > 100, "only {} text pixels", text_pixels);
        // No text spills below the bar.
        assert!((40..bar_right).all(|x| *image.get_pixel(x, 45) != LABEL_TEXT));
    }

    #[test]
    fn label_alphabet_covers_every_status() {
        for status in [ZoneStatus::Observing, ZoneStatus::Inside, ZoneStatus::Outside] {
            let label = format!("{}: {}", PersonId(1234567890), status);
            for ch in label.chars().filter(|c| *c != ' ') {
                assert!(glyph(ch).is_some(), "no glyph for {:?}", ch);
            }
        }
    }

    #[test]
    fn encodes_jpeg() -> Result<()> {
        let image = RgbImage::from_pixel(16, 16, Rgb([120, 40, 200]));
        let bytes = encode_jpeg(&image, 80)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(encode_jpeg(&image, 0).is_err());
        Ok(())
    }
}
