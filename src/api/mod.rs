//! Video-streaming API client
//!
//! Request/response types for the five upload endpoints and the
//! [`VideoStreamingApi`] trait the upload pipeline talks to.
//!
//! | Operation | Path |
//! |-----------|------|
//! | Initialize | `POST /video-streaming/initialize-upload` |
//! | Upload chunk | `POST /video-streaming/upload-chunk` |
//! | Complete | `POST /video-streaming/complete-upload` |
//! | Recover session | `POST /video-streaming/recover-session` |
//! | Abort | `POST /video-streaming/abort-upload` |
//!
//! All bodies are camelCase JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::upload::session::{ChunkPart, RecoveryData, UploadSession};
use crate::upload::FailureReason;

mod http;

pub use http::HttpVideoStreamingApi;

pub const INITIALIZE_UPLOAD_PATH: &str = "/video-streaming/initialize-upload";
pub const UPLOAD_CHUNK_PATH: &str = "/video-streaming/upload-chunk";
pub const COMPLETE_UPLOAD_PATH: &str = "/video-streaming/complete-upload";
pub const RECOVER_SESSION_PATH: &str = "/video-streaming/recover-session";
pub const ABORT_UPLOAD_PATH: &str = "/video-streaming/abort-upload";

/// Error codes that mean the upload session is gone
const SESSION_EXPIRED_CODES: &[&str] = &[
    "SESSION_EXPIRED",
    "UPLOAD_SESSION_EXPIRED",
    "INVALID_UPLOAD_SESSION",
    "NO_SUCH_UPLOAD",
    "NOSUCHUPLOAD",
    "UPLOAD_NOT_FOUND",
];

const SESSION_EXPIRED_MARKERS: &[&str] = &[
    "session expired",
    "session has expired",
    "upload session not found",
    "upload does not exist",
    "nosuchupload",
    "invalid upload session",
    "invalid upload id",
];

/// Error codes that mean the backend cannot parse well-formed requests
const BACKEND_CONFIG_CODES: &[&str] = &[
    "BACKEND_CONFIGURATION_ERROR",
    "MULTIPART_PARSE_ERROR",
    "BODY_PARSER_ERROR",
];

const BACKEND_CONFIG_MARKERS: &[&str] = &[
    "multipart: boundary",
    "boundary not found",
    "unexpected end of form",
    "unexpected end of json input",
    "body-parser",
    "request body parser",
];

/// API errors
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Missing authentication token")]
    MissingToken,

    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn code_and_message(&self) -> Option<(Option<&str>, &str)> {
        match self {
            ApiError::Status { code, message, .. } => Some((code.as_deref(), message.as_str())),
            _ => None,
        }
    }

    /// The server reports the upload session as expired or unknown
    pub fn is_session_expired(&self) -> bool {
        if self.status() == Some(410) {
            return true;
        }
        self.code_and_message()
            .map(|(code, message)| matches_any(code, message, SESSION_EXPIRED_CODES, SESSION_EXPIRED_MARKERS))
            .unwrap_or(false)
    }

    /// The server failed to parse the request body; retrying cannot help
    pub fn is_backend_config_error(&self) -> bool {
        self.code_and_message()
            .map(|(code, message)| matches_any(code, message, BACKEND_CONFIG_CODES, BACKEND_CONFIG_MARKERS))
            .unwrap_or(false)
    }

    /// Connectivity problems and 5xx/408/429 answers
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => true,
            ApiError::Status { status, .. } => {
                (*status >= 500 || *status == 408 || *status == 429)
                    && !self.is_backend_config_error()
                    && !self.is_session_expired()
            }
            ApiError::MissingToken | ApiError::InvalidResponse(_) => false,
        }
    }

    /// "Not found" or an unclear backend answer
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404) || self.is_session_expired()
    }

    /// Caller-facing classification
    pub fn reason(&self) -> FailureReason {
        match self {
            ApiError::MissingToken => FailureReason::Unauthorized,
            ApiError::Network(_) | ApiError::Timeout(_) => FailureReason::NetworkError,
            ApiError::InvalidResponse(_) => FailureReason::Other,
            ApiError::Status { status, .. } => match status {
                401 => FailureReason::Unauthorized,
                403 => FailureReason::Forbidden,
                404 => FailureReason::NotFound,
                413 => FailureReason::PayloadTooLarge,
                415 => FailureReason::UnsupportedMediaType,
                502..=504 => FailureReason::ServerUnavailable,
                _ => FailureReason::Other,
            },
        }
    }
}

fn matches_any(code: Option<&str>, message: &str, codes: &[&str], markers: &[&str]) -> bool {
    let code_hit = code
        .map(|c| c.trim().to_ascii_uppercase().replace(['-', ' '], "_"))
        .map(|c| codes.iter().any(|known| *known == c))
        .unwrap_or(false);
    if code_hit {
        return true;
    }
    let message = message.to_ascii_lowercase();
    markers.iter().any(|marker| message.contains(marker))
}

// ============================================================================
// Wire types
// ============================================================================

/// The four core session fields sent with every session-scoped call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub upload_id: String,
    pub video_id: String,
    pub key: String,
    pub bucket: String,
}

impl From<&UploadSession> for SessionRef {
    fn from(session: &UploadSession) -> Self {
        Self {
            upload_id: session.upload_id.clone(),
            video_id: session.video_id.clone(),
            key: session.key.clone(),
            bucket: session.bucket.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub course_id: String,
    pub chunk_size: u64,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub upload_session: SessionRef,
    pub chunk_data: String,
    pub part_number: u32,
    pub original_file_name: String,
    pub course_id: String,
    pub content_type: String,
}

impl UploadChunkRequest {
    pub fn new(session: &UploadSession, recovery: &RecoveryData, part_number: u32, chunk_data: String) -> Self {
        Self {
            upload_session: SessionRef::from(session),
            chunk_data,
            part_number,
            original_file_name: recovery.original_file_name.clone(),
            course_id: recovery.course_id.clone(),
            content_type: recovery.content_type.clone(),
        }
    }

    /// The reduced shape older servers expect
    pub fn to_compat(&self) -> CompatUploadChunkRequest {
        CompatUploadChunkRequest {
            upload_id: self.upload_session.upload_id.clone(),
            video_id: self.upload_session.video_id.clone(),
            key: self.upload_session.key.clone(),
            chunk_data: self.chunk_data.clone(),
            part_number: self.part_number,
        }
    }
}

/// Flat chunk payload without bucket or recovery fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatUploadChunkRequest {
    pub upload_id: String,
    pub video_id: String,
    pub key: String,
    pub chunk_data: String,
    pub part_number: u32,
}

/// A session as returned by the server during recovery
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    #[serde(alias = "upload_id")]
    pub upload_id: String,
    #[serde(alias = "video_id")]
    pub video_id: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
}

impl SessionPayload {
    /// Turn the payload into a full session, keeping the retained recovery
    /// fields
    pub fn into_session(self, recovery: &RecoveryData, default_bucket: &str) -> UploadSession {
        UploadSession::from_parts(
            self.upload_id,
            self.video_id,
            self.key,
            self.bucket,
            recovery,
            default_bucket,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryInfo {
    #[serde(default, alias = "previous_video_id")]
    pub previous_video_id: Option<String>,
    #[serde(default, alias = "new_video_id")]
    pub new_video_id: Option<String>,
    #[serde(default, alias = "session_recovered")]
    pub session_recovered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    #[serde(default, alias = "ETag", alias = "eTag")]
    pub etag: Option<String>,
    #[serde(default, alias = "part_number")]
    pub part_number: Option<u32>,
    #[serde(default, alias = "session_recovered")]
    pub session_recovered: bool,
    #[serde(default, alias = "new_upload_session")]
    pub new_upload_session: Option<SessionPayload>,
    #[serde(default)]
    pub recovery: Option<RecoveryInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_session: SessionRef,
    pub parts: Vec<ChunkPart>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    #[serde(alias = "video_id")]
    pub video_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "processing_job_id")]
    pub processing_job_id: Option<String>,
    #[serde(default, alias = "estimated_processing_time")]
    pub estimated_processing_time: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSessionRequest {
    pub expired_session: SessionRef,
    pub original_file_name: String,
    pub course_id: String,
    pub content_type: String,
}

impl RecoverSessionRequest {
    pub fn new(expired: &UploadSession, recovery: &RecoveryData) -> Self {
        Self {
            expired_session: SessionRef::from(expired),
            original_file_name: recovery.original_file_name.clone(),
            course_id: recovery.course_id.clone(),
            content_type: recovery.content_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSessionResponse {
    #[serde(alias = "new_upload_session")]
    pub new_upload_session: SessionPayload,
    #[serde(default)]
    pub recovery: Option<RecoveryInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub upload_session: SessionRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// The upload endpoints
///
/// Implementations attach authentication and map transport failures to
/// [`ApiError`]. Initialization returns the raw JSON because its shape varies
/// between server versions; see
/// [`normalize_init_response`](crate::upload::session::normalize_init_response).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoStreamingApi: Send + Sync {
    async fn initialize_upload(&self, request: &InitializeUploadRequest) -> Result<Value, ApiError>;

    async fn upload_chunk(&self, request: &UploadChunkRequest) -> Result<UploadChunkResponse, ApiError>;

    async fn upload_chunk_compat(
        &self,
        request: &CompatUploadChunkRequest,
    ) -> Result<UploadChunkResponse, ApiError>;

    async fn complete_upload(
        &self,
        request: &CompleteUploadRequest,
    ) -> Result<CompleteUploadResponse, ApiError>;

    async fn recover_session(
        &self,
        request: &RecoverSessionRequest,
    ) -> Result<RecoverSessionResponse, ApiError>;

    async fn abort_upload(&self, request: &AbortUploadRequest) -> Result<AbortUploadResponse, ApiError>;
}
