//! Snapshots of raw camera frames.

use chrono::{DateTime, Local, TimeZone};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// `snapshot_HH-MM-SS.jpg` for the given wall-clock time.
pub fn snapshot_file_name<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("snapshot_{}.jpg", time.format("%H-%M-%S"))
}

/// Write `frame` as a JPEG in `dir`, named after the current local time.
///
/// Two snapshots within the same second share a name; the later one wins.
pub fn save_snapshot(frame: &RgbImage, dir: &Path) -> Result<PathBuf, SnapshotError> {
    save_snapshot_at(frame, dir, &Local::now())
}

pub fn save_snapshot_at<Tz: TimeZone>(
    frame: &RgbImage,
    dir: &Path,
    time: &DateTime<Tz>,
) -> Result<PathBuf, SnapshotError>
where
    Tz::Offset: std::fmt::Display,
{
    if frame.width() == 0 || frame.height() == 0 {
        return Err(SnapshotError::EmptyFrame);
    }

    let path = dir.join(snapshot_file_name(time));
    frame
        .save_with_format(&path, ImageFormat::Jpeg)
        .map_err(|source| SnapshotError::Write {
            path: path.clone(),
            source,
        })?;

    tracing::info!(path = %path.display(), "snapshot saved");
    Ok(path)
}
