//! Face embedding extraction via ONNX Runtime.
//!
//! The face crop is resized straight to the network input (no landmark
//! alignment), normalized, and run through the model. Defaults describe a
//! Keras-exported Facenet: 160x160 NHWC input scaled to [0, 1], raw 128-d
//! output.

use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

/// Input geometry and normalization expected by an embedding network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderSpec {
    pub input_size: u32,
    pub layout: TensorLayout,
    pub mean: f32,
    pub std: f32,
    pub l2_normalize: bool,
    /// Tag stored on every embedding this model produces.
    pub model_version: String,
}

impl EmbedderSpec {
    /// Keras Facenet (128-d); distances on the order of 10 separate identities.
    pub fn facenet() -> Self {
        Self {
            input_size: 160,
            layout: TensorLayout::Nhwc,
            mean: 0.0,
            std: 255.0,
            l2_normalize: false,
            model_version: "facenet".into(),
        }
    }

    /// InsightFace ArcFace w600k_r50 (512-d, unit length).
    pub fn arcface() -> Self {
        Self {
            input_size: 112,
            layout: TensorLayout::Nchw,
            mean: 127.5,
            std: 127.5,
            l2_normalize: true,
            model_version: "w600k_r50".into(),
        }
    }
}

impl Default for EmbedderSpec {
    fn default() -> Self {
        Self::facenet()
    }
}

/// ONNX embedding network.
pub struct OnnxEmbedder {
    session: Session,
    spec: EmbedderSpec,
}

impl OnnxEmbedder {
    pub fn load(model_path: &Path, spec: EmbedderSpec) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %spec.model_version,
            input_size = spec.input_size,
            layout = ?spec.layout,
            "loaded embedding model"
        );

        Ok(Self { session, spec })
    }

    /// Extract an embedding from an RGB face crop.
    pub fn extract(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbedderError::EmptyImage);
        }

        let input = preprocess(face, &self.spec);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(EmbedderError::InferenceFailed("model returned an empty embedding".into()));
        }

        let mut values = raw.to_vec();
        if self.spec.l2_normalize {
            l2_normalize(&mut values);
        }

        Ok(Embedding {
            values,
            model_version: Some(self.spec.model_version.clone()),
        })
    }
}

/// Resize a face crop to the model input and normalize into a 4-D tensor.
fn preprocess(face: &RgbImage, spec: &EmbedderSpec) -> Array4<f32> {
    let size = spec.input_size;
    let resized = image::imageops::resize(face, size, size, FilterType::Triangle);
    let n = size as usize;

    let mut tensor = match spec.layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, n, n)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, n, n, 3)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = (pixel.0[c] as f32 - spec.mean) / spec.std;
            match spec.layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
            }
        }
    }

    tensor
}

fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}
