use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Label assigned to any face that could not be matched to a gallery entry.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Face embedding vector produced by the face-analysis model.
///
/// Only meaningful when compared against embeddings from the same model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "facenet").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers must ensure both embeddings have the same dimensionality;
    /// extra trailing dimensions are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled identity: a unique human-assigned name and its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Detected face rectangle in full-frame pixel coordinates.
///
/// Always lies fully inside the frame it was detected in and is never empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

/// Geometry-derived identity of a region, used to memoize resolutions.
///
/// Two regions share a key only when their boxes are pixel-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Build a region from floating-point detector output, clamped to the frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamped(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let x1 = x.max(0.0).floor();
        let y1 = y.max(0.0).floor();
        let x2 = (x + width).min(frame_width as f32).floor();
        let y2 = (y + height).min(frame_height as f32).floor();

        if !(x2 > x1 && y2 > y1) {
            return None;
        }

        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
            confidence,
        })
    }

    /// Map a region found on a downscaled frame back to full resolution.
    ///
    /// `scale` is the factor the frame was shrunk by before detection.
    pub fn rescaled(&self, scale: f32, frame_width: u32, frame_height: u32) -> Option<Self> {
        let inv = 1.0 / scale;
        Self::clamped(
            self.x as f32 * inv,
            self.y as f32 * inv,
            self.width as f32 * inv,
            self.height as f32 * inv,
            self.confidence,
            frame_width,
            frame_height,
        )
    }

    pub fn key(&self) -> RegionKey {
        RegionKey {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    /// Copy the pixels under this region out of `frame`.
    pub fn crop(&self, frame: &RgbImage) -> RgbImage {
        image::imageops::crop_imm(frame, self.x, self.y, self.width, self.height).to_image()
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Name of the closest entry strictly below the threshold, if any.
    pub name: Option<String>,
    /// Distance to that entry (`f32::INFINITY` when nothing matched).
    pub distance: f32,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            name: None,
            distance: f32::INFINITY,
        }
    }

    /// Display label: the matched name, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }
}
