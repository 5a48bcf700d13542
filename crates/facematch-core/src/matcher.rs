//! Identity resolution: nearest gallery embedding within a distance threshold,
//! memoized per region key.

use crate::analyzer::FaceAnalyzer;
use crate::cache::MatchCache;
use crate::gallery::EmbeddingStore;
use crate::types::{Embedding, FaceRegion, GalleryEntry, MatchResult, UNKNOWN_LABEL};
use image::RgbImage;

/// Maximum Euclidean distance (exclusive) for a gallery entry to count as a match.
///
/// Tuned for Facenet's 128-d embedding space; other models need their own value.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 10.0;

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher: Send {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Only entries strictly below `threshold` are candidates. Ties keep the
/// entry that comes first in gallery order. Entries whose dimensionality
/// differs from the probe are never candidates.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if entry.embedding.dim() != probe.dim() {
                tracing::debug!(
                    name = %entry.name,
                    expected = probe.dim(),
                    actual = entry.embedding.dim(),
                    "skipping gallery entry with mismatched embedding dimension"
                );
                continue;
            }

            let distance = probe.euclidean_distance(&entry.embedding);
            // Written positively so a NaN distance is never a candidate.
            if !(distance < threshold) {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) => MatchResult {
                name: Some(gallery[idx].name.clone()),
                distance,
            },
            None => MatchResult::no_match(),
        }
    }
}

/// Resolves face regions to identity labels, caching each decision by region key.
pub struct CachedMatcher<M: Matcher = EuclideanMatcher> {
    matcher: M,
    threshold: f32,
    cache: MatchCache,
}

impl CachedMatcher<EuclideanMatcher> {
    pub fn new(threshold: f32, cache: MatchCache) -> Self {
        Self::with_matcher(EuclideanMatcher, threshold, cache)
    }
}

impl<M: Matcher> CachedMatcher<M> {
    pub fn with_matcher(matcher: M, threshold: f32, cache: MatchCache) -> Self {
        Self {
            matcher,
            threshold,
            cache,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Resolve the face under `region` in `frame` to a gallery name or `"Unknown"`.
    ///
    /// A cache hit returns without touching the analyzer. Otherwise one
    /// embedding is computed; an extraction failure resolves to `"Unknown"`.
    /// Every outcome, including `"Unknown"`, is cached under the region key.
    pub fn resolve(
        &mut self,
        analyzer: &mut dyn FaceAnalyzer,
        gallery: &EmbeddingStore,
        frame: &RgbImage,
        region: &FaceRegion,
    ) -> String {
        let key = region.key();
        if let Some(label) = self.cache.lookup(&key) {
            tracing::trace!(?key, %label, "match cache hit");
            return label;
        }

        let face = region.crop(frame);
        let label = match analyzer.embed(&face) {
            Ok(embedding) => {
                let entries = gallery.all();
                if entries.is_empty() {
                    UNKNOWN_LABEL.to_string()
                } else {
                    let result = self.matcher.compare(&embedding, &entries, self.threshold);
                    tracing::debug!(
                        ?key,
                        name = ?result.name,
                        distance = result.distance,
                        "resolved face"
                    );
                    result.label()
                }
            }
            Err(e) => {
                tracing::debug!(?key, error = %e, "embedding failed; labelling face unknown");
                UNKNOWN_LABEL.to_string()
            }
        };

        self.cache.insert(key, label.clone());
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns a fixed embedding (or error) and counts `embed` calls.
    struct FixedAnalyzer {
        embedding: Option<Embedding>,
        embed_calls: Arc<AtomicUsize>,
    }

    impl FixedAnalyzer {
        fn new(values: Vec<f32>) -> Self {
            Self {
                embedding: Some(Embedding::new(values)),
                embed_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing() -> Self {
            Self {
                embedding: None,
                embed_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FaceAnalyzer for FixedAnalyzer {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceRegion>, AnalyzerError> {
            Ok(Vec::new())
        }

        fn embed(&mut self, _face: &RgbImage) -> Result<Embedding, AnalyzerError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            self.embedding
                .clone()
                .ok_or_else(|| AnalyzerError::Other("embedding model exploded".into()))
        }
    }

    /// Matcher that records whether a distance search ran.
    struct CountingMatcher {
        calls: Arc<AtomicUsize>,
    }

    impl Matcher for CountingMatcher {
        fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            EuclideanMatcher.compare(probe, gallery, threshold)
        }
    }

    fn entry(name: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            name: name.into(),
            embedding: Embedding::new(values),
        }
    }

    fn frame() -> RgbImage {
        RgbImage::new(64, 64)
    }

    fn region(x: u32) -> FaceRegion {
        FaceRegion { x, y: 4, width: 16, height: 16, confidence: 0.9 }
    }

    #[rstest]
    #[case(0.0, "alice")]
    #[case(9.99, "alice")]
    #[case(10.0, "Unknown")]
    #[case(25.0, "Unknown")]
    fn test_single_entry_threshold(#[case] distance: f32, #[case] expected: &str) {
        let gallery = vec![entry("alice", vec![0.0, 0.0])];
        let probe = Embedding::new(vec![distance, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.label(), expected);
    }

    #[rstest]
    #[case(vec![f32::NAN, 0.0])]
    #[case(vec![0.0, f32::NAN])]
    #[case(vec![f32::INFINITY, 0.0])]
    #[case(vec![f32::NEG_INFINITY, 0.0])]
    fn test_non_finite_embedding_is_unknown(#[case] values: Vec<f32>) {
        let gallery = vec![entry("alice", vec![0.0, 0.0]), entry("bob", vec![1.0, 0.0])];
        let probe = Embedding::new(values);
        let result = EuclideanMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.name, None);
        assert_eq!(result.label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_nan_entry_does_not_shadow_later_match() {
        let gallery = vec![entry("corrupt", vec![f32::NAN, 0.0]), entry("bob", vec![1.0, 0.0])];
        let probe = Embedding::new(vec![0.5, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_resolve_nan_embedding_caches_unknown() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![0.0, 0.0]));
        let mut analyzer = FixedAnalyzer::new(vec![f32::NAN, 0.0]);
        let mut matcher = CachedMatcher::new(DEFAULT_MATCH_THRESHOLD, MatchCache::new());

        assert_eq!(matcher.resolve(&mut analyzer, &store, &frame(), &region(0)), UNKNOWN_LABEL);
        assert_eq!(matcher.cache().len(), 1);
    }

    #[test]
    fn test_nearest_entry_wins() {
        let gallery = vec![
            entry("far", vec![8.0, 0.0]),
            entry("near", vec![2.0, 0.0]),
            entry("out", vec![50.0, 0.0]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 10.0);
        assert_eq!(result.name.as_deref(), Some("near"));
        assert!((result.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_keeps_first_in_gallery_order() {
        let gallery = vec![entry("first", vec![3.0, 0.0]), entry("second", vec![-3.0, 0.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 10.0);
        assert_eq!(result.name.as_deref(), Some("first"));
    }

    #[test]
    fn test_mismatched_dimension_is_not_a_candidate() {
        let gallery = vec![entry("short", vec![0.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 10.0);
        assert_eq!(result, MatchResult::no_match());
    }

    #[test]
    fn test_resolve_matches_gallery() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![1.0, 1.0]));
        let mut analyzer = FixedAnalyzer::new(vec![1.5, 1.0]);
        let mut matcher = CachedMatcher::new(DEFAULT_MATCH_THRESHOLD, MatchCache::new());

        let label = matcher.resolve(&mut analyzer, &store, &frame(), &region(0));
        assert_eq!(label, "alice");
        assert_eq!(matcher.cache().len(), 1);
    }

    #[test]
    fn test_resolve_empty_gallery_skips_distance_search() {
        let store = EmbeddingStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut matcher = CachedMatcher::with_matcher(
            CountingMatcher { calls: calls.clone() },
            DEFAULT_MATCH_THRESHOLD,
            MatchCache::new(),
        );

        for probe in [vec![0.0], vec![100.0, -3.0], vec![]] {
            let mut analyzer = FixedAnalyzer::new(probe);
            matcher.clear_cache();
            let label = matcher.resolve(&mut analyzer, &store, &frame(), &region(0));
            assert_eq!(label, UNKNOWN_LABEL);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_same_key_embeds_once() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![0.0]));
        let mut analyzer = FixedAnalyzer::new(vec![0.0]);
        let calls = analyzer.embed_calls.clone();
        let mut matcher = CachedMatcher::new(DEFAULT_MATCH_THRESHOLD, MatchCache::new());

        let first = matcher.resolve(&mut analyzer, &store, &frame(), &region(0));
        let second = matcher.resolve(&mut analyzer, &store, &frame(), &region(0));

        assert_eq!(first, "alice");
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_moved_region_misses_cache() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![0.0]));
        let mut analyzer = FixedAnalyzer::new(vec![0.0]);
        let calls = analyzer.embed_calls.clone();
        let mut matcher = CachedMatcher::new(DEFAULT_MATCH_THRESHOLD, MatchCache::new());

        matcher.resolve(&mut analyzer, &store, &frame(), &region(0));
        matcher.resolve(&mut analyzer, &store, &frame(), &region(1));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resolve_embedding_failure_is_cached_unknown() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![0.0]));
        let mut analyzer = FixedAnalyzer::failing();
        let calls = analyzer.embed_calls.clone();
        let mut matcher = CachedMatcher::new(DEFAULT_MATCH_THRESHOLD, MatchCache::new());

        assert_eq!(matcher.resolve(&mut analyzer, &store, &frame(), &region(0)), UNKNOWN_LABEL);
        assert_eq!(matcher.resolve(&mut analyzer, &store, &frame(), &region(0)), UNKNOWN_LABEL);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_cache_forces_new_resolution() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![0.0]));
        store.add("bob", Embedding::new(vec![50.0]));
        let mut matcher = CachedMatcher::new(DEFAULT_MATCH_THRESHOLD, MatchCache::new());

        let mut as_alice = FixedAnalyzer::new(vec![0.5]);
        assert_eq!(matcher.resolve(&mut as_alice, &store, &frame(), &region(0)), "alice");

        matcher.clear_cache();
        let mut as_bob = FixedAnalyzer::new(vec![49.5]);
        assert_eq!(matcher.resolve(&mut as_bob, &store, &frame(), &region(0)), "bob");
    }

    #[test]
    fn test_resolve_sees_entries_added_after_construction() {
        let store = EmbeddingStore::new();
        let mut analyzer = FixedAnalyzer::new(vec![0.0]);
        let mut matcher = CachedMatcher::new(DEFAULT_MATCH_THRESHOLD, MatchCache::new());

        assert_eq!(matcher.resolve(&mut analyzer, &store, &frame(), &region(0)), UNKNOWN_LABEL);
        store.add("dave", Embedding::new(vec![0.0]));
        assert_eq!(matcher.resolve(&mut analyzer, &store, &frame(), &region(1)), "dave");
    }
}
