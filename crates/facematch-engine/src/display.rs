//! Display collaborator: where annotated frames and status lines go.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;

/// Receives each annotated frame together with a one-line status.
///
/// Called from the recognition worker thread; must not block for long.
pub trait DisplaySink: Send + Sync {
    fn publish(&self, frame: &RgbImage, status: &str);
}

/// One published frame.
#[derive(Debug, Clone)]
pub struct DisplayUpdate {
    /// Empty (0x0) for status-only updates such as "Recognition stopped".
    pub frame: RgbImage,
    pub status: String,
}

impl DisplayUpdate {
    pub fn has_frame(&self) -> bool {
        self.frame.width() > 0 && self.frame.height() > 0
    }
}

/// Forwards updates over a bounded channel, dropping them while the consumer lags.
pub struct ChannelSink {
    tx: Sender<DisplayUpdate>,
}

impl ChannelSink {
    /// Sink plus the receiving end for the consumer.
    pub fn bounded(capacity: usize) -> (Self, Receiver<DisplayUpdate>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl DisplaySink for ChannelSink {
    fn publish(&self, frame: &RgbImage, status: &str) {
        let update = DisplayUpdate {
            frame: frame.clone(),
            status: status.to_string(),
        };
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("display consumer lagging; frame dropped"),
            Err(TrySendError::Disconnected(_)) => tracing::trace!("display consumer gone"),
        }
    }
}

/// Discards every update.
pub struct NullSink;

impl DisplaySink for NullSink {
    fn publish(&self, _frame: &RgbImage, _status: &str) {}
}
