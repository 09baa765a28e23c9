//! Upload module
//!
//! Chunked, resumable video uploads against the video-streaming API.
//!
//! ```text
//! initialize ──▶ chunk 1 ──▶ chunk 2 ──▶ ... ──▶ chunk N ──▶ complete
//!                   │  ▲
//!        expired /  │  │ retry same chunk
//!        recovered  ▼  │
//!              session recovery
//! ```

use thiserror::Error;

use crate::api::ApiError;

pub mod chunk;
pub mod chunk_uploader;
pub mod client;
pub mod observer;
pub mod recovery;
pub mod session;
pub mod source;
pub mod state;

pub use chunk::{Chunk, ChunkBounds, ChunkPlan};
pub use chunk_uploader::{ChunkOutcome, ChunkUploader, RetryPolicy};
pub use client::{AbortOutcome, CompletedUpload, UploadMetadata, UploadSettings, VideoUploadClient};
pub use observer::{RecoveryEvent, RecoveryKind, TracingObserver, UploadObserver, UploadProgress};
pub use recovery::{RecoveryOutcome, SessionRecoveryAgent};
pub use session::{ChunkPart, RecoveryData, SessionRecovery, UploadSession};
pub use source::{FileSource, MemorySource, UploadSource};
pub use state::{StateError, UploadEvent, UploadState, UploadStatus};

/// Caller-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Unauthorized,
    Forbidden,
    PayloadTooLarge,
    UnsupportedMediaType,
    ServerUnavailable,
    NotFound,
    NetworkError,
    SessionExpired,
    RecoveryLimitReached,
    BackendConfiguration,
    Validation,
    Other,
}

impl FailureReason {
    /// Stable label, used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Unauthorized => "unauthorized",
            FailureReason::Forbidden => "forbidden",
            FailureReason::PayloadTooLarge => "payload_too_large",
            FailureReason::UnsupportedMediaType => "unsupported_media_type",
            FailureReason::ServerUnavailable => "server_unavailable",
            FailureReason::NotFound => "not_found",
            FailureReason::NetworkError => "network_error",
            FailureReason::SessionExpired => "session_expired",
            FailureReason::RecoveryLimitReached => "recovery_limit_reached",
            FailureReason::BackendConfiguration => "backend_configuration",
            FailureReason::Validation => "validation",
            FailureReason::Other => "other",
        }
    }

    /// Message suitable for an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureReason::Unauthorized => "Your session has expired. Please sign in again.",
            FailureReason::Forbidden => "You do not have permission to upload videos to this course.",
            FailureReason::PayloadTooLarge => "The video file is too large to upload.",
            FailureReason::UnsupportedMediaType => "This video format is not supported.",
            FailureReason::ServerUnavailable => {
                "The video service is temporarily unavailable. Please try again later."
            }
            FailureReason::NotFound => "The upload service could not be found. Please contact support.",
            FailureReason::NetworkError => "Network error. Check your connection and try again.",
            FailureReason::SessionExpired => "The upload session expired. Please restart the upload.",
            FailureReason::RecoveryLimitReached => {
                "The upload session kept expiring and could not be recovered. Please restart the upload."
            }
            FailureReason::BackendConfiguration => {
                "The video service could not process the upload. Please contact support."
            }
            FailureReason::Validation => "The upload data is invalid. Please restart the upload.",
            FailureReason::Other => "The upload failed. Please try again.",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("courseId is required to upload a video")]
    MissingCourseId,

    #[error("Upload not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid upload session: {0}")]
    InvalidSession(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to initialize upload ({reason}): {message}")]
    Initialization {
        reason: FailureReason,
        message: String,
        #[source]
        source: Option<ApiError>,
    },

    #[error("Chunk {part_number} failed after {attempts} attempt(s): {message}")]
    ChunkFailed {
        part_number: u32,
        attempts: u32,
        reason: FailureReason,
        message: String,
    },

    #[error("Upload session for video {video_id} expired: {source}")]
    SessionExpired {
        video_id: String,
        #[source]
        source: ApiError,
    },

    #[error("Backend configuration error: {0}")]
    BackendConfiguration(String),

    #[error("Recovery limit reached after {attempts} session recoveries")]
    RecoveryLimitReached { attempts: u32 },

    #[error("Failed to complete upload ({reason}): {message}")]
    Completion { reason: FailureReason, message: String },

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl UploadError {
    pub fn reason(&self) -> FailureReason {
        match self {
            UploadError::MissingCourseId
            | UploadError::NotInitialized(_)
            | UploadError::InvalidSession(_)
            | UploadError::Validation(_)
            | UploadError::State(_) => FailureReason::Validation,
            UploadError::Initialization { reason, .. }
            | UploadError::ChunkFailed { reason, .. }
            | UploadError::Completion { reason, .. } => *reason,
            UploadError::SessionExpired { .. } => FailureReason::SessionExpired,
            UploadError::BackendConfiguration(_) => FailureReason::BackendConfiguration,
            UploadError::RecoveryLimitReached { .. } => FailureReason::RecoveryLimitReached,
            UploadError::Api(e) => e.reason(),
        }
    }

    /// Message suitable for an end user
    pub fn user_message(&self) -> String {
        match self {
            UploadError::MissingCourseId => {
                "A course must be selected before uploading a video.".to_string()
            }
            UploadError::Initialization { message, .. } | UploadError::Completion { message, .. } => {
                message.clone()
            }
            other => other.reason().user_message().to_string(),
        }
    }
}
