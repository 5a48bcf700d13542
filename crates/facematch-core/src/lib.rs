//! facematch-core: face-matching engine.
//!
//! Holds the enrolled gallery, resolves detected faces to identities by
//! nearest embedding within a distance threshold, and memoizes decisions
//! per region. Detection and embedding extraction sit behind the
//! [`FaceAnalyzer`] trait, with an ONNX Runtime implementation (SCRFD +
//! Facenet/ArcFace).

pub mod analyzer;
pub mod cache;
pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer, SharedAnalyzer};
pub use cache::MatchCache;
pub use gallery::{EmbeddingStore, LoadWarning};
pub use matcher::{CachedMatcher, EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use recognizer::{EmbedderSpec, TensorLayout};
pub use types::{Embedding, FaceRegion, GalleryEntry, MatchResult, RegionKey, UNKNOWN_LABEL};
