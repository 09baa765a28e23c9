//! Single-chunk upload with bounded retries
//!
//! One call uploads one chunk against one session. Transient failures are
//! retried with a growing delay; session expiry and backend configuration
//! errors are returned immediately so the orchestrator can decide what to do.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::chunk::{encode_chunk, validate_chunk_len, Chunk};
use super::session::{ChunkPart, RecoveryData, SessionRecovery, UploadSession};
use super::source::UploadSource;
use super::{FailureReason, UploadError};
use crate::api::{ApiError, UploadChunkRequest, UploadChunkResponse, VideoStreamingApi};
use crate::metrics;

/// Chunk-level retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first
    pub max_attempts: u32,
    /// Delay unit; the wait before attempt `n + 1` is `n * base_delay`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt that follows failed attempt `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Result of uploading one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The part is committed
    Uploaded(ChunkPart),
    /// The server replaced the session while handling the chunk. The chunk
    /// must be sent again under the new session.
    SessionRecovered(SessionRecovery),
    /// The source produced no bytes for this range
    EndOfSource,
}

/// Uploads single chunks
pub struct ChunkUploader<'a> {
    api: &'a dyn VideoStreamingApi,
    policy: RetryPolicy,
    default_bucket: &'a str,
}

impl<'a> ChunkUploader<'a> {
    pub fn new(api: &'a dyn VideoStreamingApi, policy: RetryPolicy, default_bucket: &'a str) -> Self {
        Self {
            api,
            policy,
            default_bucket,
        }
    }

    /// Upload `chunk` of `source` under `session`
    #[tracing::instrument(
        name = "video.upload_chunk",
        skip(self, session, recovery, source, chunk),
        fields(
            video_id = %session.video_id,
            part_number = chunk.part_number(),
            chunk.bytes = chunk.len()
        ),
        err
    )]
    pub async fn upload_chunk(
        &self,
        session: &UploadSession,
        recovery: &RecoveryData,
        source: &dyn UploadSource,
        chunk: &Chunk,
    ) -> Result<ChunkOutcome, UploadError> {
        if !session.is_usable() {
            return Err(UploadError::InvalidSession(
                "uploadId and videoId are required to upload a chunk".into(),
            ));
        }
        validate_chunk_len(chunk.len())?;

        let part_number = chunk.part_number();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure = (FailureReason::Other, String::from("no attempt made"));

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                metrics::record_chunk_retry();
                tokio::time::sleep(self.policy.delay_after(attempt - 1)).await;
            }

            let bytes = match source.read_range(chunk.range.start, chunk.range.end).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(part_number, attempt, error = %e, "Failed to read chunk");
                    last_failure = (FailureReason::Other, format!("failed to read chunk: {}", e));
                    continue;
                }
            };
            if bytes.is_empty() {
                return Ok(ChunkOutcome::EndOfSource);
            }
            validate_chunk_len(bytes.len() as u64)?;

            let started = Instant::now();
            let byte_count = bytes.len() as u64;
            let request = UploadChunkRequest::new(session, recovery, part_number, encode_chunk(&bytes));
            drop(bytes);

            let result = match self.api.upload_chunk(&request).await {
                Err(e) if attempt == 1 && wants_compat_payload(&e) => {
                    warn!(part_number, error = %e, "Chunk rejected, retrying with reduced payload");
                    self.api.upload_chunk_compat(&request.to_compat()).await
                }
                other => other,
            };

            match result {
                Ok(response) => match self.interpret(session, recovery, part_number, response) {
                    Some(ChunkOutcome::Uploaded(part)) => {
                        metrics::record_chunk_uploaded(byte_count, started.elapsed().as_secs_f64());
                        debug!(part_number, etag = %part.etag, attempt, "Chunk uploaded");
                        return Ok(ChunkOutcome::Uploaded(part));
                    }
                    Some(outcome) => return Ok(outcome),
                    None => {
                        warn!(part_number, attempt, "Chunk response carried no etag");
                        last_failure = (FailureReason::Other, "response carried no etag".into());
                    }
                },
                Err(e) if e.is_session_expired() => {
                    return Err(UploadError::SessionExpired {
                        video_id: session.video_id.clone(),
                        source: e,
                    });
                }
                Err(e) if e.is_backend_config_error() => {
                    return Err(UploadError::BackendConfiguration(e.to_string()));
                }
                Err(e) if e.is_transient() => {
                    warn!(part_number, attempt, max_attempts, error = %e, "Transient chunk failure");
                    last_failure = (e.reason(), e.to_string());
                }
                Err(e) => {
                    return Err(UploadError::ChunkFailed {
                        part_number,
                        attempts: attempt,
                        reason: e.reason(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let (reason, message) = last_failure;
        Err(UploadError::ChunkFailed {
            part_number,
            attempts: max_attempts,
            reason,
            message,
        })
    }

    /// Turn a successful response into an outcome; `None` when it carries
    /// neither a recovered session nor an etag
    fn interpret(
        &self,
        session: &UploadSession,
        recovery: &RecoveryData,
        part_number: u32,
        response: UploadChunkResponse,
    ) -> Option<ChunkOutcome> {
        let info = response.recovery.unwrap_or_default();

        if let Some(payload) = response.new_upload_session {
            let replacement = payload.into_session(recovery, self.default_bucket);
            if replacement.is_usable() && replacement.differs_from(session) {
                return Some(ChunkOutcome::SessionRecovered(SessionRecovery {
                    previous_video_id: info
                        .previous_video_id
                        .unwrap_or_else(|| session.video_id.clone()),
                    new_video_id: info
                        .new_video_id
                        .unwrap_or_else(|| replacement.video_id.clone()),
                    session: replacement,
                }));
            }
        }

        response
            .etag
            .map(|etag| etag.trim().to_string())
            .filter(|etag| !etag.is_empty())
            .map(|etag| ChunkOutcome::Uploaded(ChunkPart { part_number, etag }))
    }
}

/// A plain "bad request" on the full payload may come from a server that
/// expects the reduced shape
fn wants_compat_payload(error: &ApiError) -> bool {
    matches!(error.status(), Some(400) | Some(422))
        && !error.is_session_expired()
        && !error.is_backend_config_error()
}
