//! Drawing identity annotations onto frames.

use ab_glyph::FontVec;
use facematch_core::{FaceRegion, UNKNOWN_LABEL};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LABEL_BAR_HEIGHT: u32 = 35;
const LABEL_TEXT_SCALE: f32 = 22.0;
const LABEL_TEXT_INSET: i32 = 6;

/// A resolved face: where it is and who it is.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub region: FaceRegion,
    pub label: String,
}

impl Annotation {
    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }

    /// Green for any identified face, red for "Unknown".
    pub fn color(&self) -> Rgb<u8> {
        if self.is_known() {
            KNOWN_COLOR
        } else {
            UNKNOWN_COLOR
        }
    }
}

/// Renders annotations into a frame in place.
pub trait Annotator: Send {
    fn annotate(&self, frame: &mut RgbImage, annotations: &[Annotation]);
}

/// Bounding box plus a filled label bar along the bottom edge of the box.
///
/// Label text is drawn only when a font has been loaded.
#[derive(Default)]
pub struct BoxAnnotator {
    font: Option<FontVec>,
}

impl BoxAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TTF/OTF font for label text.
    pub fn with_font_file(path: &Path) -> Result<Self, std::io::Error> {
        let bytes = std::fs::read(path)?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        tracing::debug!(path = %path.display(), "label font loaded");
        Ok(Self { font: Some(font) })
    }

    /// Annotator using `path` when given and loadable, otherwise bars only.
    pub fn from_optional_font(path: Option<&Path>) -> Self {
        match path.map(Self::with_font_file) {
            Some(Ok(annotator)) => annotator,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "failed to load label font; drawing labels without text");
                Self::new()
            }
            None => Self::new(),
        }
    }
}

impl Annotator for BoxAnnotator {
    fn annotate(&self, frame: &mut RgbImage, annotations: &[Annotation]) {
        for annotation in annotations {
            let r = &annotation.region;
            if r.width == 0 || r.height == 0 {
                continue;
            }
            let color = annotation.color();

            for inset in 0..BOX_THICKNESS.min(r.width / 2).min(r.height / 2).max(1) {
                let rect = Rect::at((r.x + inset) as i32, (r.y + inset) as i32)
                    .of_size(r.width - 2 * inset, r.height - 2 * inset);
                draw_hollow_rect_mut(frame, rect, color);
            }

            let bar_height = LABEL_BAR_HEIGHT.min(r.height);
            let bar_top = r.y + r.height - bar_height;
            draw_filled_rect_mut(
                frame,
                Rect::at(r.x as i32, bar_top as i32).of_size(r.width, bar_height),
                color,
            );

            if let Some(font) = &self.font {
                draw_text_mut(
                    frame,
                    TEXT_COLOR,
                    r.x as i32 + LABEL_TEXT_INSET,
                    bar_top as i32 + LABEL_TEXT_INSET,
                    LABEL_TEXT_SCALE,
                    font,
                    &annotation.label,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(label: &str) -> Annotation {
        Annotation {
            region: FaceRegion { x: 10, y: 10, width: 40, height: 60, confidence: 0.9 },
            label: label.into(),
        }
    }

    #[test]
    fn test_color_rule() {
        assert_eq!(annotation("alice").color(), KNOWN_COLOR);
        assert_eq!(annotation(UNKNOWN_LABEL).color(), UNKNOWN_COLOR);
    }

    #[test]
    fn test_draws_box_edges_and_label_bar() {
        let mut frame = RgbImage::new(100, 100);
        BoxAnnotator::new().annotate(&mut frame, &[annotation("alice")]);

        // Top edge, both lines of thickness.
        assert_eq!(*frame.get_pixel(30, 10), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(30, 11), KNOWN_COLOR);
        // Interior above the label bar is untouched.
        assert_eq!(*frame.get_pixel(30, 20), Rgb([0, 0, 0]));
        // Label bar fills the bottom 35 rows of the box.
        assert_eq!(*frame.get_pixel(30, 69), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(30, 36), KNOWN_COLOR);
        assert_eq!(*frame.get_pixel(30, 34), Rgb([0, 0, 0]));
        // Outside the box is untouched.
        assert_eq!(*frame.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_unknown_drawn_red() {
        let mut frame = RgbImage::new(100, 100);
        BoxAnnotator::new().annotate(&mut frame, &[annotation(UNKNOWN_LABEL)]);
        assert_eq!(*frame.get_pixel(30, 10), UNKNOWN_COLOR);
    }

    #[test]
    fn test_tiny_region_does_not_panic() {
        let mut frame = RgbImage::new(8, 8);
        let tiny = Annotation {
            region: FaceRegion { x: 7, y: 7, width: 1, height: 1, confidence: 0.5 },
            label: "x".into(),
        };
        BoxAnnotator::new().annotate(&mut frame, &[tiny]);
        assert_eq!(*frame.get_pixel(7, 7), KNOWN_COLOR);
    }

    #[test]
    fn test_missing_font_falls_back_to_bars() {
        let annotator = BoxAnnotator::from_optional_font(Some(Path::new("/nonexistent/font.ttf")));
        assert!(annotator.font.is_none());
    }
}
