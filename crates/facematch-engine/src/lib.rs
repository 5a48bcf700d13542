//! facematch-engine: live recognition on top of facematch-core.
//!
//! A [`RecognitionSession`] runs one worker thread that pulls frames from a
//! camera, pushes them through the [`FramePipeline`] and hands the annotated
//! result to a [`DisplaySink`]. Enrollment and snapshots run beside it.

pub mod annotate;
pub mod config;
pub mod display;
pub mod enroll;
pub mod pipeline;
pub mod session;
pub mod snapshot;

pub use annotate::{Annotation, Annotator, BoxAnnotator};
pub use config::{Config, ConfigError};
pub use display::{ChannelSink, DisplaySink, DisplayUpdate, NullSink};
pub use enroll::{EnrollError, EnrollOutcome, Enroller};
pub use pipeline::{status_line, FramePipeline, FrameReport, FrameSkip};
pub use session::{RecognitionSession, SessionError, SessionState, STOPPED_STATUS};
pub use snapshot::{save_snapshot, snapshot_file_name, SnapshotError};
