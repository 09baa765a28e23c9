//! Upload notifications
//!
//! Observers receive progress, status changes, errors and session
//! recoveries. Any number can be attached to a client; all methods have
//! no-op defaults so an observer implements only what it needs.

use std::sync::Arc;

use tracing::{info, warn};

use super::state::UploadStatus;
use super::UploadError;

/// Progress after a committed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// 0-100, counting committed chunks only
    pub percent: u8,
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn new(uploaded_chunks: u64, total_chunks: u64, uploaded_bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_chunks == 0 {
            0
        } else {
            (uploaded_chunks.min(total_chunks) * 100 / total_chunks) as u8
        };
        Self {
            percent,
            uploaded_chunks,
            total_chunks,
            uploaded_bytes,
            total_bytes,
        }
    }
}

/// How a session was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    /// The server swapped the session inside a chunk response
    Automatic,
    /// The client called `recover-session`
    Manual,
    /// A new upload was initialized; earlier parts were discarded
    Reinitialized,
}

impl RecoveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryKind::Automatic => "automatic",
            RecoveryKind::Manual => "manual",
            RecoveryKind::Reinitialized => "reinitialized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryEvent {
    pub previous_video_id: String,
    pub new_video_id: String,
    pub recovered: bool,
    pub kind: RecoveryKind,
}

/// Receives upload notifications
pub trait UploadObserver: Send + Sync {
    fn on_progress(&self, _progress: &UploadProgress) {}

    fn on_status(&self, _status: UploadStatus) {}

    fn on_error(&self, _error: &UploadError) {}

    fn on_recovery(&self, _event: &RecoveryEvent) {}
}

/// Logs every notification through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl UploadObserver for TracingObserver {
    fn on_progress(&self, progress: &UploadProgress) {
        info!(
            percent = progress.percent,
            uploaded_chunks = progress.uploaded_chunks,
            total_chunks = progress.total_chunks,
            "Upload progress"
        );
    }

    fn on_status(&self, status: UploadStatus) {
        info!(status = %status, "Upload status changed");
    }

    fn on_error(&self, error: &UploadError) {
        warn!(reason = %error.reason(), error = %error, "Upload error");
    }

    fn on_recovery(&self, event: &RecoveryEvent) {
        info!(
            kind = event.kind.as_str(),
            previous_video_id = %event.previous_video_id,
            new_video_id = %event.new_video_id,
            "Upload session replaced"
        );
    }
}

/// Fan-out to every attached observer
#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn UploadObserver>>);

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn UploadObserver>) {
        self.0.push(observer);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn progress(&self, progress: &UploadProgress) {
        self.0.iter().for_each(|o| o.on_progress(progress));
    }

    pub(crate) fn status(&self, status: UploadStatus) {
        self.0.iter().for_each(|o| o.on_status(status));
    }

    pub(crate) fn error(&self, error: &UploadError) {
        self.0.iter().for_each(|o| o.on_error(error));
    }

    pub(crate) fn recovery(&self, event: &RecoveryEvent) {
        self.0.iter().for_each(|o| o.on_recovery(event));
    }
}
