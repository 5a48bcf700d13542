//! Embedding store: the enrolled gallery.
//!
//! On disk the gallery is a directory of face images, one per identity,
//! named `<identity>.<ext>`. In memory it is an insertion-ordered list of
//! [`GalleryEntry`] behind a single-writer lock, so a concurrent enrollment
//! can never interleave with a lookup that is scanning the entries.

use crate::analyzer::FaceAnalyzer;
use crate::types::{Embedding, GalleryEntry};
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use thiserror::Error;

/// File extensions recognized as gallery images (compared case-insensitively).
pub const GALLERY_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A gallery file that could not be turned into an entry. Never fatal.
#[derive(Debug)]
pub struct LoadWarning {
    pub path: PathBuf,
    pub reason: String,
}

/// In-memory gallery of named reference embeddings.
#[derive(Debug, Default)]
pub struct EmbeddingStore {
    entries: RwLock<Vec<GalleryEntry>>,
}

/// Read view over the live gallery entries, in insertion order.
///
/// Holds the store's read lock; writers block until it is dropped.
pub struct GalleryView<'a> {
    guard: RwLockReadGuard<'a, Vec<GalleryEntry>>,
}

impl Deref for GalleryView<'_> {
    type Target = [GalleryEntry];

    fn deref(&self) -> &[GalleryEntry] {
        &self.guard
    }
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from every image in `dir`, creating the directory if needed.
    ///
    /// Files that fail to decode or embed are reported as warnings and skipped.
    pub fn load(
        dir: &Path,
        analyzer: &mut dyn FaceAnalyzer,
    ) -> Result<(Self, Vec<LoadWarning>), GalleryError> {
        let store = Self::new();
        let mut warnings = Vec::new();

        for item in GalleryScan::open(dir)?.entries(analyzer) {
            match item {
                Ok(entry) => {
                    tracing::debug!(name = %entry.name, dim = entry.embedding.dim(), "gallery entry loaded");
                    store.add(entry.name, entry.embedding);
                }
                Err(warning) => {
                    tracing::warn!(
                        path = %warning.path.display(),
                        reason = %warning.reason,
                        "skipping gallery image"
                    );
                    warnings.push(warning);
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            loaded = store.len(),
            skipped = warnings.len(),
            "gallery loaded"
        );
        Ok((store, warnings))
    }

    /// Insert an entry, or overwrite the existing entry with the same name in place.
    pub fn add(&self, name: impl Into<String>, embedding: Embedding) {
        let name = name.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.embedding = embedding,
            None => entries.push(GalleryEntry { name, embedding }),
        }
    }

    /// Remove the entry for `name`. Returns whether one existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() != before
    }

    /// Current entries for matching; reflects every `add` made so far.
    pub fn all(&self) -> GalleryView<'_> {
        GalleryView {
            guard: self.entries.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn get(&self, name: &str) -> Option<GalleryEntry> {
        self.all().iter().find(|e| e.name == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.all().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.all().is_empty()
    }
}

/// Lazy scan of a gallery directory.
///
/// Files are visited in filename order so repeated loads produce the same
/// insertion order.
pub struct GalleryScan {
    files: std::vec::IntoIter<PathBuf>,
}

impl GalleryScan {
    pub fn open(dir: &Path) -> Result<Self, GalleryError> {
        fs::create_dir_all(dir).map_err(|source| GalleryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            files: gallery_files(dir)?.into_iter(),
        })
    }

    /// Turn each file into an entry as the iterator is advanced.
    pub fn entries<'a>(
        self,
        analyzer: &'a mut dyn FaceAnalyzer,
    ) -> impl Iterator<Item = Result<GalleryEntry, LoadWarning>> + 'a {
        self.files.map(move |path| load_entry(&path, analyzer))
    }
}

fn load_entry(path: &Path, analyzer: &mut dyn FaceAnalyzer) -> Result<GalleryEntry, LoadWarning> {
    let warn = |reason: String| LoadWarning {
        path: path.to_path_buf(),
        reason,
    };

    let name = identity_name(path).ok_or_else(|| warn("file name is not valid UTF-8".into()))?;
    let image = image::open(path)
        .map_err(|e| warn(format!("decode failed: {e}")))?
        .to_rgb8();
    let embedding = analyzer
        .embed(&image)
        .map_err(|e| warn(format!("embedding failed: {e}")))?;

    Ok(GalleryEntry { name, embedding })
}

/// Identity label for a gallery file: its stem, without the extension.
pub fn identity_name(path: &Path) -> Option<String> {
    path.file_stem()?.to_str().map(str::to_string)
}

fn is_gallery_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            GALLERY_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Gallery images in `dir` that load as `name`, whatever their extension.
pub fn identity_files(dir: &Path, name: &str) -> Result<Vec<PathBuf>, GalleryError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(gallery_files(dir)?
        .into_iter()
        .filter(|p| identity_name(p).as_deref() == Some(name))
        .collect())
}

/// List gallery image files in `dir`, sorted by file name.
pub fn gallery_files(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let read_dir = fs::read_dir(dir).map_err(|source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_gallery_image(p))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::types::FaceRegion;
    use image::RgbImage;

    /// Embeds an image as its mean red value; fails on all-black images.
    struct MeanRedAnalyzer;

    impl FaceAnalyzer for MeanRedAnalyzer {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceRegion>, AnalyzerError> {
            Ok(Vec::new())
        }

        fn embed(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError> {
            let n = face.pixels().len() as f32;
            let red = face.pixels().map(|p| p.0[0] as f32).sum::<f32>() / n;
            if red == 0.0 {
                return Err(AnalyzerError::Other("no face".into()));
            }
            Ok(Embedding::new(vec![red]))
        }
    }

    #[derive(Default)]
    struct CountingAnalyzer {
        embeds: usize,
    }

    impl FaceAnalyzer for CountingAnalyzer {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceRegion>, AnalyzerError> {
            Ok(Vec::new())
        }

        fn embed(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError> {
            self.embeds += 1;
            MeanRedAnalyzer.embed(face)
        }
    }

    fn write_image(dir: &Path, file: &str, red: u8) {
        RgbImage::from_pixel(4, 4, image::Rgb([red, 0, 0]))
            .save(dir.join(file))
            .unwrap();
    }

    #[test]
    fn test_add_then_lookup() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![1.0]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("alice").unwrap().embedding.values, vec![1.0]);
    }

    #[test]
    fn test_add_overwrites_in_place() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![1.0]));
        store.add("bob", Embedding::new(vec![2.0]));
        store.add("alice", Embedding::new(vec![3.0]));

        assert_eq!(store.len(), 2);
        assert_eq!(store.names(), vec!["alice", "bob"]);
        assert_eq!(store.get("alice").unwrap().embedding.values, vec![3.0]);
    }

    #[test]
    fn test_all_reflects_later_adds() {
        let store = EmbeddingStore::new();
        assert!(store.all().is_empty());
        store.add("carol", Embedding::new(vec![0.5]));
        let view = store.all();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].name, "carol");
    }

    #[test]
    fn test_remove() {
        let store = EmbeddingStore::new();
        store.add("alice", Embedding::new(vec![1.0]));
        assert!(store.remove("alice"));
        assert!(!store.remove("alice"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_skips_failures_and_non_images() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "alice.png", 200);
        write_image(dir.path(), "bob.PNG", 100);
        write_image(dir.path(), "blank.png", 0);
        fs::write(dir.path().join("corrupt.jpg"), b"not an image").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let (store, warnings) = EmbeddingStore::load(dir.path(), &mut MeanRedAnalyzer).unwrap();

        assert_eq!(store.names(), vec!["alice", "bob"]);
        assert_eq!(warnings.len(), 2);
        let warned: Vec<String> = warnings
            .iter()
            .map(|w| w.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(warned.contains(&"blank.png".to_string()));
        assert!(warned.contains(&"corrupt.jpg".to_string()));
    }

    #[test]
    fn test_load_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = dir.path().join("known_faces");
        let (store, warnings) = EmbeddingStore::load(&gallery, &mut MeanRedAnalyzer).unwrap();
        assert!(gallery.is_dir());
        assert!(store.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_scan_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", 10);
        write_image(dir.path(), "b.png", 20);

        let mut analyzer = CountingAnalyzer::default();
        let mut entries = GalleryScan::open(dir.path()).unwrap().entries(&mut analyzer);
        let first = entries.next().unwrap().unwrap();
        assert_eq!(first.name, "a");
        drop(entries);
        assert_eq!(analyzer.embeds, 1);
    }

    #[test]
    fn test_identity_files_matches_stem_across_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "alice.png", 10);
        write_image(dir.path(), "alice.jpg", 10);
        write_image(dir.path(), "alice2.png", 10);
        write_image(dir.path(), "bob.png", 10);
        fs::write(dir.path().join("alice.txt"), b"ignored").unwrap();

        let files = identity_files(dir.path(), "alice").unwrap();
        assert_eq!(files, vec![dir.path().join("alice.jpg"), dir.path().join("alice.png")]);
        assert!(identity_files(&dir.path().join("missing"), "alice").unwrap().is_empty());
    }

    #[test]
    fn test_gallery_extensions_case_insensitive() {
        assert!(is_gallery_image(Path::new("x.JPG")));
        assert!(is_gallery_image(Path::new("x.Jpeg")));
        assert!(is_gallery_image(Path::new("x.png")));
        assert!(!is_gallery_image(Path::new("x.gif")));
        assert!(!is_gallery_image(Path::new("jpg")));
    }

    #[test]
    fn test_identity_name_strips_extension() {
        assert_eq!(identity_name(Path::new("/g/alice.jpg")).as_deref(), Some("alice"));
        assert_eq!(identity_name(Path::new("mary.jane.png")).as_deref(), Some("mary.jane"));
    }
}
