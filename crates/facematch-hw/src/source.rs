//! Frame sources: anything that yields frames one at a time.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::path::{Path, PathBuf};

/// Produces frames on demand. An error means the stream has ended.
pub trait FrameSource {
    fn read(&mut self) -> Result<Frame, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Frame, CameraError> {
        (**self).read()
    }
}

/// Opens a fresh frame source, e.g. a camera device.
///
/// Sources are opened on the thread that reads them, so they need not be `Send`.
pub trait CameraOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Serves a still image as a stream of identical frames.
///
/// With a frame limit the stream ends after that many reads.
pub struct ImageFileSource {
    image: image::RgbImage,
    remaining: Option<usize>,
    sequence: u32,
}

impl ImageFileSource {
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        let image = image::open(path)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {e}", path.display())))?
            .to_rgb8();
        tracing::debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "opened still image source"
        );
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: image::RgbImage) -> Self {
        Self {
            image,
            remaining: None,
            sequence: 0,
        }
    }

    pub fn with_frame_limit(mut self, frames: usize) -> Self {
        self.remaining = Some(frames);
        self
    }
}

impl FrameSource for ImageFileSource {
    fn read(&mut self) -> Result<Frame, CameraError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(CameraError::EndOfStream);
            }
            *remaining -= 1;
        }
        let frame = Frame::new(self.image.clone(), self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}

/// Opens [`ImageFileSource`]s for a fixed image path.
pub struct ImageFileOpener {
    path: PathBuf,
}

impl ImageFileOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraOpener for ImageFileOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(ImageFileSource::open(&self.path)?))
    }
}
