//! Per-frame recognition: detect, resolve, annotate.

use crate::annotate::{Annotation, Annotator, BoxAnnotator};
use crate::config::{Config, ConfigError};
use facematch_core::{CachedMatcher, EmbeddingStore, FaceAnalyzer, FaceRegion, SharedAnalyzer};
use image::imageops::FilterType;
use image::RgbImage;
use std::sync::{Arc, PoisonError};

/// Decides which frames get full detection and matching.
///
/// Frame `i` (zero-based, counted since the last reset) is processed when
/// `i % n == 0`, so the first frame after a reset is always processed.
#[derive(Debug, Clone)]
pub struct FrameSkip {
    n: usize,
    index: usize,
}

impl FrameSkip {
    pub fn new(n: usize) -> Result<Self, ConfigError> {
        if n < 1 {
            return Err(ConfigError::Invalid("frame_skip must be >= 1".into()));
        }
        Ok(Self { n, index: 0 })
    }

    /// Advance by one frame and report whether it should be processed.
    pub fn should_process(&mut self) -> bool {
        let process = self.index % self.n == 0;
        self.index = self.index.wrapping_add(1);
        process
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

/// Outcome of one [`FramePipeline::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Whether detection ran on this frame.
    pub processed: bool,
    /// Faces drawn on the frame.
    pub faces: usize,
}

/// Status line shown alongside a frame.
pub fn status_line(report: &FrameReport) -> String {
    format!("Faces Detected: {}", report.faces)
}

pub struct FramePipeline {
    analyzer: SharedAnalyzer,
    gallery: Arc<EmbeddingStore>,
    matcher: CachedMatcher,
    skip: FrameSkip,
    detect_scale: f32,
    annotator: Box<dyn Annotator>,
    last_annotations: Vec<Annotation>,
}

impl FramePipeline {
    pub fn new(
        analyzer: SharedAnalyzer,
        gallery: Arc<EmbeddingStore>,
        matcher: CachedMatcher,
        skip: FrameSkip,
        detect_scale: f32,
    ) -> Self {
        Self {
            analyzer,
            gallery,
            matcher,
            skip,
            detect_scale,
            annotator: Box::new(BoxAnnotator::new()),
            last_annotations: Vec::new(),
        }
    }

    pub fn from_config(
        config: &Config,
        analyzer: SharedAnalyzer,
        gallery: Arc<EmbeddingStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let matcher = CachedMatcher::new(config.match_threshold, config.match_cache());
        let skip = FrameSkip::new(config.frame_skip)?;
        Ok(Self::new(analyzer, gallery, matcher, skip, config.detect_scale)
            .with_annotator(BoxAnnotator::from_optional_font(config.font_path.as_deref())))
    }

    pub fn with_annotator(mut self, annotator: impl Annotator + 'static) -> Self {
        self.annotator = Box::new(annotator);
        self
    }

    pub fn analyzer(&self) -> &SharedAnalyzer {
        &self.analyzer
    }

    pub fn gallery(&self) -> &Arc<EmbeddingStore> {
        &self.gallery
    }

    pub fn matcher(&self) -> &CachedMatcher {
        &self.matcher
    }

    /// Annotations from the most recent processed frame.
    pub fn last_annotations(&self) -> &[Annotation] {
        &self.last_annotations
    }

    /// Run one frame through the pipeline, drawing annotations into it.
    pub fn process(&mut self, frame: &mut RgbImage) -> FrameReport {
        if !self.skip.should_process() {
            self.annotator.annotate(frame, &self.last_annotations);
            return FrameReport {
                processed: false,
                faces: self.last_annotations.len(),
            };
        }

        let annotations = {
            let source: &RgbImage = frame;
            let mut analyzer = self.analyzer.lock().unwrap_or_else(PoisonError::into_inner);
            let regions = self.detect(&mut **analyzer, source);
            regions
                .into_iter()
                .map(|region| {
                    let label = self
                        .matcher
                        .resolve(&mut **analyzer, &self.gallery, source, &region);
                    Annotation { region, label }
                })
                .collect::<Vec<_>>()
        };

        self.annotator.annotate(frame, &annotations);
        self.last_annotations = annotations;
        FrameReport {
            processed: true,
            faces: self.last_annotations.len(),
        }
    }

    /// Detect on a downscaled copy, returning full-resolution regions.
    fn detect(&self, analyzer: &mut dyn FaceAnalyzer, frame: &RgbImage) -> Vec<FaceRegion> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let scale = self.detect_scale;
        let result = if scale < 1.0 {
            let small_w = ((width as f32 * scale).round() as u32).max(1);
            let small_h = ((height as f32 * scale).round() as u32).max(1);
            let small = image::imageops::resize(frame, small_w, small_h, FilterType::Triangle);
            analyzer.detect(&small).map(|regions| {
                regions
                    .iter()
                    .filter_map(|r| r.rescaled(scale, width, height))
                    .collect()
            })
        } else {
            analyzer.detect(frame)
        };

        match result {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; treating frame as empty");
                Vec::new()
            }
        }
    }

    /// Forget cached identities, skip position and previous annotations.
    pub fn reset(&mut self) {
        self.matcher.clear_cache();
        self.skip.reset();
        self.last_annotations.clear();
    }
}
