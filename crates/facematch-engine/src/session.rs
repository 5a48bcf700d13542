//! Recognition session: drives one long-lived worker thread that streams
//! frames through the pipeline to the display.
//!
//! The worker is spawned on the first `start` and serves start/stop commands
//! until the session is dropped. The camera is opened on the worker and
//! dropped there on every exit path. `start` does not return until the
//! worker has read its first frame (or failed to), so a dead camera is
//! reported synchronously.

use crate::config::{Config, ConfigError};
use crate::display::DisplaySink;
use crate::enroll::{EnrollError, EnrollOutcome, Enroller};
use crate::pipeline::{status_line, FramePipeline};
use crate::snapshot::{save_snapshot, SnapshotError};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use facematch_core::{EmbeddingStore, SharedAnalyzer};
use facematch_hw::{CameraError, CameraOpener, Frame, FrameSource};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;

pub const STOPPED_STATUS: &str = "Recognition stopped";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("recognition is already running")]
    AlreadyRunning,
    #[error("recognition is not running")]
    NotRunning,
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[source] CameraError),
    #[error("failed to spawn recognition worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("recognition worker exited")]
    WorkerExited,
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// Requests sent from the session to its worker thread.
enum Command {
    Start {
        reply: Sender<Result<(), CameraError>>,
    },
    /// Checked once per frame; the reply is sent after the camera is released.
    Stop { reply: Sender<()> },
}

struct Worker {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Most recent raw frame read by the worker, before annotation.
type LatestFrame = Arc<Mutex<Option<RgbImage>>>;

/// Start/stop controller for live recognition.
///
/// Running from a successful `start` until `stop` (or drop), even if the
/// camera stream ends in between.
pub struct RecognitionSession {
    opener: Arc<dyn CameraOpener>,
    pipeline: Arc<Mutex<FramePipeline>>,
    sink: Arc<dyn DisplaySink>,
    latest_frame: LatestFrame,
    enroller: Enroller,
    warmup_frames: usize,
    state: SessionState,
    worker: Option<Worker>,
}

impl RecognitionSession {
    pub fn new(
        opener: Arc<dyn CameraOpener>,
        pipeline: FramePipeline,
        sink: Arc<dyn DisplaySink>,
        gallery_dir: impl Into<PathBuf>,
    ) -> Self {
        let enroller = Enroller::new(
            pipeline.analyzer().clone(),
            pipeline.gallery().clone(),
            gallery_dir,
        );
        Self {
            opener,
            pipeline: Arc::new(Mutex::new(pipeline)),
            sink,
            latest_frame: Arc::new(Mutex::new(None)),
            enroller,
            warmup_frames: 0,
            state: SessionState::Idle,
            worker: None,
        }
    }

    pub fn from_config(
        config: &Config,
        opener: Arc<dyn CameraOpener>,
        analyzer: SharedAnalyzer,
        gallery: Arc<EmbeddingStore>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<Self, ConfigError> {
        let pipeline = FramePipeline::from_config(config, analyzer, gallery)?;
        Ok(Self::new(opener, pipeline, sink, config.gallery_dir.clone())
            .with_warmup_frames(config.warmup_frames))
    }

    pub fn with_warmup_frames(mut self, frames: usize) -> Self {
        self.warmup_frames = frames;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pipeline(&self) -> &Arc<Mutex<FramePipeline>> {
        &self.pipeline
    }

    /// Open the camera on the worker thread and begin streaming.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Running {
            return Err(SessionError::AlreadyRunning);
        }

        self.reset_pipeline();
        let (reply, ready) = crossbeam_channel::bounded(1);
        self.send(Command::Start { reply })?;

        match ready.recv() {
            Ok(Ok(())) => {
                self.state = SessionState::Running;
                tracing::info!("recognition started");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "recognition not started");
                self.sink
                    .publish(&RgbImage::new(0, 0), &format!("Camera unavailable: {e}"));
                Err(SessionError::CameraUnavailable(e))
            }
            Err(_) => Err(self.worker_lost()),
        }
    }

    /// Stop streaming, release the camera and forget cached identities.
    ///
    /// Returns once the worker has dropped the camera, at most one frame
    /// read after the request.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Idle {
            return Err(SessionError::NotRunning);
        }
        self.state = SessionState::Idle;

        let (reply, done) = crossbeam_channel::bounded(1);
        let stopped = self
            .send(Command::Stop { reply })
            .and_then(|()| done.recv().map_err(|_| self.worker_lost()));

        self.reset_pipeline();
        self.latest_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.sink.publish(&RgbImage::new(0, 0), STOPPED_STATUS);
        tracing::info!("recognition stopped");
        stopped
    }

    /// Enroll a new identity from `source`; a running session sees it on its
    /// next resolution.
    pub fn enroll(
        &self,
        name: &str,
        source: &mut dyn FrameSource,
    ) -> Result<EnrollOutcome, SessionError> {
        Ok(self.enroller.enroll(name, source)?)
    }

    /// Write the most recent raw camera frame to `dir` as a timestamped JPEG.
    ///
    /// Uses the capture the worker already holds, so it works while the
    /// camera is busy streaming.
    pub fn snapshot(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        if self.state == SessionState::Idle {
            return Err(SessionError::NotRunning);
        }
        let frame = self
            .latest_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SnapshotError::EmptyFrame)?;
        Ok(save_snapshot(&frame, dir)?)
    }

    fn reset_pipeline(&self) {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    /// Deliver a command, spawning the worker on first use.
    fn send(&mut self, command: Command) -> Result<(), SessionError> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => self.spawn_worker()?,
        };
        if worker.commands.send(command).is_err() {
            self.worker = Some(worker);
            return Err(self.worker_lost());
        }
        self.worker = Some(worker);
        Ok(())
    }

    fn spawn_worker(&self) -> Result<Worker, SessionError> {
        let (commands, inbox) = crossbeam_channel::unbounded();
        let ctx = WorkerContext {
            opener: self.opener.clone(),
            pipeline: self.pipeline.clone(),
            sink: self.sink.clone(),
            latest_frame: self.latest_frame.clone(),
            warmup_frames: self.warmup_frames,
        };
        let handle = std::thread::Builder::new()
            .name("facematch-recognition".into())
            .spawn(move || ctx.run(inbox))
            .map_err(SessionError::Spawn)?;
        Ok(Worker { commands, handle })
    }

    /// Reap a worker that stopped answering; the next `start` spawns a new one.
    fn worker_lost(&mut self) -> SessionError {
        self.state = SessionState::Idle;
        if let Some(worker) = self.worker.take() {
            drop(worker.commands);
            if worker.handle.join().is_err() {
                tracing::error!("recognition worker panicked");
            }
        }
        SessionError::WorkerExited
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        if self.state == SessionState::Running {
            let _ = self.stop();
        }
        if let Some(worker) = self.worker.take() {
            drop(worker.commands);
            if worker.handle.join().is_err() {
                tracing::error!("recognition worker panicked");
            }
        }
    }
}

struct WorkerContext {
    opener: Arc<dyn CameraOpener>,
    pipeline: Arc<Mutex<FramePipeline>>,
    sink: Arc<dyn DisplaySink>,
    latest_frame: LatestFrame,
    warmup_frames: usize,
}

impl WorkerContext {
    /// Serve commands until the session drops its sender.
    fn run(self, inbox: Receiver<Command>) {
        tracing::debug!("recognition worker started");
        while let Ok(command) = inbox.recv() {
            match command {
                Command::Start { reply } => match self.open() {
                    Ok((source, first)) => {
                        // Visible to `snapshot` as soon as `start` returns.
                        self.remember(&first.image);
                        let _ = reply.send(Ok(()));
                        if !self.stream(source, first, &inbox) {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
                // Stream already ended on its own.
                Command::Stop { reply } => {
                    let _ = reply.send(());
                }
            }
        }
        tracing::debug!("recognition worker exiting");
    }

    /// Stream frames until stopped or the source fails.
    ///
    /// Returns `false` when the session has gone away.
    fn stream(&self, mut source: Box<dyn FrameSource>, first: Frame, inbox: &Receiver<Command>) -> bool {
        tracing::debug!("recognition worker streaming");
        let mut pending = Some(first);
        loop {
            match inbox.try_recv() {
                Ok(Command::Stop { reply }) => {
                    drop(source);
                    let _ = reply.send(());
                    return true;
                }
                Ok(Command::Start { reply }) => {
                    let _ = reply.send(Ok(()));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return false,
            }

            let frame = match pending.take() {
                Some(frame) => frame,
                None => match source.read() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "camera stream ended");
                        self.sink
                            .publish(&RgbImage::new(0, 0), &format!("Camera stream ended: {e}"));
                        return true;
                    }
                },
            };

            let mut image = frame.image;
            self.remember(&image);
            let report = self
                .pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .process(&mut image);
            self.sink.publish(&image, &status_line(&report));
        }
    }

    fn remember(&self, image: &RgbImage) {
        *self.latest_frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(image.clone());
    }

    /// Open the camera, let it settle, and read the first frame.
    fn open(&self) -> Result<(Box<dyn FrameSource>, Frame), CameraError> {
        let mut source = self.opener.open()?;
        if self.warmup_frames > 0 {
            tracing::debug!(count = self.warmup_frames, "discarding warmup frames");
            for i in 0..self.warmup_frames {
                if let Err(e) = source.read() {
                    tracing::debug!(frame = i, error = %e, "warmup read failed");
                }
            }
        }
        let first = source.read()?;
        Ok((source, first))
    }
}
