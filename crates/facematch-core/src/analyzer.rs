//! Face-analysis collaborator: detection and embedding extraction.

use crate::detector::{DetectorError, ScrfdDetector};
use crate::recognizer::{EmbedderError, OnnxEmbedder};
use crate::types::{Embedding, FaceRegion};
use image::RgbImage;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("embedding extraction failed: {0}")]
    Embedding(#[from] EmbedderError),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("{0}")]
    Other(String),
}

/// Detects faces in a frame and turns face images into embeddings.
///
/// Both operations may fail; callers in the recognition path degrade a
/// failure to "no detections" or "Unknown" rather than propagating it.
pub trait FaceAnalyzer: Send {
    /// Return face regions in `frame` coordinates, best detection first.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceRegion>, AnalyzerError>;

    /// Compute an embedding for an image containing a single face.
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError>;
}

/// Analyzer shared between the recognition worker and enrollment.
///
/// The mutex serializes inference so the two never run a model concurrently.
pub type SharedAnalyzer = Arc<Mutex<Box<dyn FaceAnalyzer>>>;

pub fn shared(analyzer: impl FaceAnalyzer + 'static) -> SharedAnalyzer {
    let boxed: Box<dyn FaceAnalyzer> = Box::new(analyzer);
    Arc::new(Mutex::new(boxed))
}

/// ONNX Runtime analyzer: SCRFD for detection, a configurable embedding network.
pub struct OnnxFaceAnalyzer {
    detector: ScrfdDetector,
    embedder: OnnxEmbedder,
}

impl OnnxFaceAnalyzer {
    pub fn new(detector: ScrfdDetector, embedder: OnnxEmbedder) -> Self {
        Self { detector, embedder }
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceRegion>, AnalyzerError> {
        Ok(self.detector.detect(frame)?)
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError> {
        Ok(self.embedder.extract(face)?)
    }
}
