//! Enrollment: capture one frame, embed the first face, persist it, add it to the gallery.

use facematch_core::gallery::{identity_files, GalleryError};
use facematch_core::{EmbeddingStore, FaceRegion, SharedAnalyzer};
use facematch_hw::FrameSource;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("enrollment cancelled: no name given")]
    EmptyName,
    #[error("invalid identity name {0:?}: must not contain path separators or '..'")]
    InvalidName(String),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[source] facematch_hw::CameraError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face analysis failed: {0}")]
    Analyzer(#[source] facematch_core::AnalyzerError),
    #[error("failed to save {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("failed to remove stale gallery image {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub name: String,
    /// Gallery image written for this identity.
    pub image_path: PathBuf,
    pub region: FaceRegion,
    /// Whether an existing identity with this name was overwritten.
    pub replaced: bool,
}

/// Adds identities to a live gallery and its backing directory.
pub struct Enroller {
    analyzer: SharedAnalyzer,
    store: Arc<EmbeddingStore>,
    gallery_dir: PathBuf,
}

impl Enroller {
    pub fn new(analyzer: SharedAnalyzer, store: Arc<EmbeddingStore>, gallery_dir: impl Into<PathBuf>) -> Self {
        Self {
            analyzer,
            store,
            gallery_dir: gallery_dir.into(),
        }
    }

    pub fn gallery_dir(&self) -> &Path {
        &self.gallery_dir
    }

    /// Enroll `name` from the next frame of `source`.
    ///
    /// The face crop is written to `<gallery_dir>/<name>.jpg` before the
    /// store is touched, so any failure leaves the in-memory gallery
    /// unchanged. Older images of the same identity under another extension
    /// are removed so a reload cannot bring them back.
    pub fn enroll(&self, name: &str, source: &mut dyn FrameSource) -> Result<EnrollOutcome, EnrollError> {
        let name = validate_name(name)?;

        let frame = source.read().map_err(EnrollError::CameraUnavailable)?;

        let (region, embedding, face) = {
            let mut analyzer = self.analyzer.lock().unwrap_or_else(PoisonError::into_inner);
            let regions = analyzer.detect(&frame.image).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "face detection failed during enrollment");
                Vec::new()
            });
            let region = *regions.first().ok_or(EnrollError::NoFaceDetected)?;
            let face = region.crop(&frame.image);
            let embedding = analyzer.embed(&face).map_err(EnrollError::Analyzer)?;
            (region, embedding, face)
        };

        let image_path = self.gallery_dir.join(format!("{name}.jpg"));
        std::fs::create_dir_all(&self.gallery_dir)
            .map_err(|e| EnrollError::Persist {
                path: image_path.clone(),
                source: image::ImageError::IoError(e),
            })?;
        face.save_with_format(&image_path, ImageFormat::Jpeg)
            .map_err(|source| EnrollError::Persist {
                path: image_path.clone(),
                source,
            })?;
        self.remove_stale_images(&name, &image_path)?;

        let replaced = self.store.get(&name).is_some();
        self.store.add(name.clone(), embedding);

        tracing::info!(
            name = %name,
            path = %image_path.display(),
            replaced,
            gallery_size = self.store.len(),
            "identity enrolled"
        );

        Ok(EnrollOutcome {
            name,
            image_path,
            region,
            replaced,
        })
    }

    fn remove_stale_images(&self, name: &str, keep: &Path) -> Result<(), EnrollError> {
        for path in identity_files(&self.gallery_dir, name)? {
            if path.file_name() == keep.file_name() {
                continue;
            }
            std::fs::remove_file(&path).map_err(|source| EnrollError::RemoveStale {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "removed stale gallery image");
        }
        Ok(())
    }
}

/// Trimmed identity name, safe to use as a file stem.
pub fn validate_name(name: &str) -> Result<String, EnrollError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EnrollError::EmptyName);
    }
    if name.contains(['/', '\\', '\0']) || name.contains("..") {
        return Err(EnrollError::InvalidName(name.to_string()));
    }
    Ok(name.to_string())
}
