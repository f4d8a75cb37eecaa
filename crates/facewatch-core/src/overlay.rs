//! Draw detection boxes, labels and a summary header onto RGB frames.

use crate::matcher::{ConfidenceBand, Identity};
use crate::pipeline::Detections;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::sync::LazyLock;

const BORDER: u32 = 2;
const LABEL_BAND: u32 = 38;
const NAME_SCALE: f32 = 16.0;
const CONFIDENCE_SCALE: f32 = 14.0;
const HEADER_SCALE: f32 = 20.0;
const TEXT_INSET: i32 = 6;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const HEADER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

static FONT: LazyLock<Option<FontRef<'static>>> = LazyLock::new(|| {
    let font = FontRef::try_from_slice(epaint_default_fonts::HACK_REGULAR);
    if let Err(e) = &font {
        tracing::warn!(error = %e, "overlay font unavailable; labels will not be drawn");
    }
    font.ok()
});

/// Boxes and labels for every face, then the "Faces / Known / Avg
/// Confidence" header in the top-left corner.
pub fn draw_results(image: &mut RgbImage, detections: &Detections, known_faces: usize) {
    draw_detections(image, detections);
    draw_summary(image, detections, known_faces);
}

/// Outline every face and label it along its bottom edge, colored by
/// confidence band. Known faces get a second line with the confidence.
pub fn draw_detections(image: &mut RgbImage, detections: &Detections) {
    for face in detections.faces() {
        let color = Rgb(ConfidenceBand::classify(&face.identity, face.confidence).color());
        let Some((left, top, right, bottom)) = face.location.pixel_rect(image.width(), image.height())
        else {
            continue;
        };
        let (width, height) = (right - left, bottom - top);

        for inset in 0..BORDER.min(width / 2).min(height / 2).max(1) {
            let rect = Rect::at((left + inset) as i32, (top + inset) as i32)
                .of_size(width - 2 * inset, height - 2 * inset);
            draw_hollow_rect_mut(image, rect, color);
        }

        let band = LABEL_BAND.min(height);
        let band_top = bottom - band;
        draw_filled_rect_mut(image, Rect::at(left as i32, band_top as i32).of_size(width, band), color);

        let Some(font) = FONT.as_ref() else {
            continue;
        };
        let x = left as i32 + TEXT_INSET;
        let name = face.identity.to_string();
        draw_text_mut(image, WHITE, x, band_top as i32 + 2, PxScale::from(NAME_SCALE), font, &name);
        if let Identity::Known(_) = face.identity {
            let text = format!("{:.1}%", face.confidence);
            let y = band_top as i32 + 4 + NAME_SCALE as i32;
            draw_text_mut(image, WHITE, x, y, PxScale::from(CONFIDENCE_SCALE), font, &text);
        }
    }
}

/// Face count, gallery size and, when anyone is recognized, the mean
/// confidence.
pub fn draw_summary(image: &mut RgbImage, detections: &Detections, known_faces: usize) {
    let Some(font) = FONT.as_ref() else {
        return;
    };
    let mut lines = vec![
        format!("Faces: {}", detections.len()),
        format!("Known: {known_faces}"),
    ];
    if let Some(avg) = detections.average_confidence() {
        lines.push(format!("Avg Confidence: {avg:.1}%"));
    }
    for (i, line) in lines.iter().enumerate() {
        let y = 10 + i as i32 * 30;
        draw_text_mut(image, HEADER_COLOR, 10, y, PxScale::from(HEADER_SCALE), font, line);
    }
}
