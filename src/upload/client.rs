//! Upload orchestration
//!
//! [`VideoUploadClient`] drives one upload at a time: initialize a session,
//! send the chunks in order, recover expired sessions, then complete the
//! multipart upload with the ordered part list.
//!
//! A failed upload is never aborted automatically. The session stays in the
//! failed state until [`VideoUploadClient::abort`] or
//! [`VideoUploadClient::reset`] is called.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::chunk::{optimal_chunk_size, ChunkBounds, ChunkPlan, MAX_CHUNK_SIZE};
use super::chunk_uploader::{ChunkOutcome, ChunkUploader, RetryPolicy};
use super::observer::{Observers, RecoveryEvent, RecoveryKind, UploadObserver, UploadProgress};
use super::recovery::{RecoveryOutcome, SessionRecoveryAgent, DEFAULT_MAX_RECOVERY_ATTEMPTS};
use super::session::{normalize_init_response, ChunkPart, RecoveryData, SessionRecovery, UploadSession};
use super::source::UploadSource;
use super::state::{UploadEvent, UploadState, UploadStatus};
use super::{FailureReason, UploadError};
use crate::api::{
    AbortUploadRequest, ApiError, CompleteUploadRequest, InitializeUploadRequest, SessionRef,
    VideoStreamingApi,
};
use crate::config::UploadConfig;
use crate::metrics;

/// Bucket used when neither the server nor the configuration names one
pub const DEFAULT_BUCKET: &str = "video-uploads";

/// Status reported when the completion response omits one
const DEFAULT_COMPLETED_STATUS: &str = "processing";

/// Tunables of [`VideoUploadClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSettings {
    pub retry: RetryPolicy,
    pub max_recovery_attempts: u32,
    pub chunk_bounds: ChunkBounds,
    /// Connection speed hint in Mbit/s used when proposing a chunk size
    pub connection_speed_mbps: Option<f64>,
    pub default_bucket: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            chunk_bounds: ChunkBounds::default(),
            connection_speed_mbps: None,
            default_bucket: DEFAULT_BUCKET.to_string(),
        }
    }
}

impl UploadSettings {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.max_chunk_retries,
                base_delay: std::time::Duration::from_millis(config.retry_base_delay_ms),
            },
            max_recovery_attempts: config.max_recovery_attempts,
            chunk_bounds: ChunkBounds {
                min: config.min_chunk_size,
                max: config.max_chunk_size,
            },
            connection_speed_mbps: config.connection_speed_mbps,
            default_bucket: config.default_bucket.clone(),
        }
    }
}

/// Caller-supplied metadata
///
/// `course_id` is required by [`VideoUploadClient::initialize`]. Everything
/// in `fields` (title, description, ...) is forwarded to the server as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadMetadata {
    pub course_id: Option<String>,
    pub fields: Map<String, Value>,
}

impl UploadMetadata {
    pub fn for_course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: Some(course_id.into()),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.with_field("title", title.into())
    }

    fn course_id(&self) -> Option<&str> {
        self.course_id.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

/// A finished upload
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedUpload {
    pub video_id: String,
    pub status: String,
    pub processing_job_id: Option<String>,
    pub estimated_processing_time: Option<Value>,
}

/// What [`VideoUploadClient::abort`] did on the server side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// There was no session to release
    NoSession,
    /// The server released the session
    Released,
    /// The server no longer knew the session
    AlreadyReleased,
    /// The abort call failed; local state was cleared anyway
    Unconfirmed,
}

/// Orchestrates chunked uploads against a [`VideoStreamingApi`]
pub struct VideoUploadClient {
    api: Arc<dyn VideoStreamingApi>,
    settings: UploadSettings,
    observers: Observers,
    state: UploadState,
    recovery: SessionRecoveryAgent,
    recovery_data: Option<RecoveryData>,
    source: Option<Arc<dyn UploadSource>>,
    metadata: Option<UploadMetadata>,
}

impl VideoUploadClient {
    pub fn new(api: Arc<dyn VideoStreamingApi>, settings: UploadSettings) -> Self {
        let recovery = SessionRecoveryAgent::new(settings.max_recovery_attempts);
        Self {
            api,
            settings,
            observers: Observers::default(),
            state: UploadState::Idle,
            recovery,
            recovery_data: None,
            source: None,
            metadata: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn UploadObserver>) {
        self.observers.push(observer);
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    pub fn status(&self) -> UploadStatus {
        self.state.status()
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.state.session()
    }

    /// Parts committed so far, in commit order
    pub fn parts(&self) -> &[ChunkPart] {
        self.state.parts()
    }

    pub fn total_chunks(&self) -> Option<u64> {
        self.state.plan().map(ChunkPlan::total_chunks)
    }

    pub fn chunk_size(&self) -> Option<u64> {
        self.state.plan().map(ChunkPlan::chunk_size)
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery.attempts()
    }

    pub fn recovery_data(&self) -> Option<&RecoveryData> {
        self.recovery_data.as_ref()
    }

    pub fn completed(&self) -> Option<&CompletedUpload> {
        self.state.completed()
    }

    /// Open an upload session for `source`
    ///
    /// Any previous upload state is discarded first.
    #[tracing::instrument(
        name = "video.initialize",
        skip(self, source, metadata),
        fields(file.name = %source.file_name(), file.size = source.size()),
        err
    )]
    pub async fn initialize(
        &mut self,
        source: Arc<dyn UploadSource>,
        metadata: UploadMetadata,
    ) -> Result<UploadSession, UploadError> {
        self.clear();
        self.transition(UploadEvent::Begin)?;

        match self.open_session(source, metadata).await {
            Ok((session, plan)) => {
                info!(
                    upload_id = %session.upload_id,
                    video_id = %session.video_id,
                    chunk_size = plan.chunk_size(),
                    total_chunks = plan.total_chunks(),
                    "Upload session initialized"
                );
                self.transition(UploadEvent::Initialized {
                    session: session.clone(),
                    plan,
                })?;
                Ok(session)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Upload every chunk of the initialized source and complete the upload
    #[tracing::instrument(
        name = "video.upload",
        skip(self),
        fields(video_id = self.session().map(|s| s.video_id.as_str()).unwrap_or_default()),
        err
    )]
    pub async fn upload(&mut self) -> Result<CompletedUpload, UploadError> {
        let status = self.status();
        if status != UploadStatus::Initialized {
            return Err(UploadError::NotInitialized(format!(
                "upload requires an initialized session, current status is {}",
                status
            )));
        }
        let (source, recovery) = match (self.source.clone(), self.recovery_data.clone()) {
            (Some(source), Some(recovery)) => (source, recovery),
            _ => {
                return Err(UploadError::NotInitialized(
                    "no source captured at initialization".into(),
                ))
            }
        };

        self.transition(UploadEvent::Started)?;

        match self.run(source.as_ref(), &recovery).await {
            Ok(result) => {
                self.transition(UploadEvent::Completed(result.clone()))?;
                metrics::record_upload("completed");
                info!(video_id = %result.video_id, status = %result.status, "Upload completed");
                Ok(result)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Initialize and upload in one call
    pub async fn upload_file(
        &mut self,
        source: Arc<dyn UploadSource>,
        metadata: UploadMetadata,
    ) -> Result<CompletedUpload, UploadError> {
        self.initialize(source, metadata).await?;
        self.upload().await
    }

    /// Release the server session, if any, and clear local state
    ///
    /// Never fails: server errors are logged and the local state is cleared
    /// regardless.
    #[tracing::instrument(name = "video.abort", skip(self))]
    pub async fn abort(&mut self) -> AbortOutcome {
        let outcome = match self.state.session().cloned() {
            None => AbortOutcome::NoSession,
            Some(session) => {
                let request = AbortUploadRequest {
                    upload_session: SessionRef::from(&session),
                };
                match self.api.abort_upload(&request).await {
                    Ok(response) if response.success => {
                        info!(video_id = %session.video_id, "Upload aborted");
                        AbortOutcome::Released
                    }
                    Ok(response) => {
                        warn!(
                            video_id = %session.video_id,
                            message = response.message.as_deref().unwrap_or(""),
                            "Server did not confirm abort"
                        );
                        AbortOutcome::Unconfirmed
                    }
                    Err(e) if e.is_not_found() => {
                        info!(video_id = %session.video_id, error = %e, "Upload session already gone");
                        AbortOutcome::AlreadyReleased
                    }
                    Err(e) => {
                        warn!(video_id = %session.video_id, error = %e, "Abort request failed");
                        AbortOutcome::Unconfirmed
                    }
                }
            }
        };

        self.clear();
        if let Err(e) = self.transition(UploadEvent::Aborted) {
            warn!(error = %e, "Could not record abort");
        }
        metrics::record_upload("aborted");
        outcome
    }

    /// Forget everything about the current upload
    pub fn reset(&mut self) {
        self.clear();
        self.observers.status(UploadStatus::Idle);
    }

    /// Back to idle without notifying observers
    fn clear(&mut self) {
        self.state = std::mem::take(&mut self.state)
            .apply(UploadEvent::Reset)
            .unwrap_or_default();
        self.recovery.reset();
        self.recovery_data = None;
        self.source = None;
        self.metadata = None;
    }

    /// Apply `event`, notifying observers when the status changes
    ///
    /// A rejected event leaves the client idle.
    fn transition(&mut self, event: UploadEvent) -> Result<(), UploadError> {
        let current = std::mem::take(&mut self.state);
        let before = current.status();
        self.state = current.apply(event)?;

        let after = self.state.status();
        if after != before {
            self.observers.status(after);
        }
        Ok(())
    }

    fn fail(&mut self, error: &UploadError) {
        metrics::record_upload("failed");
        self.observers.error(error);

        let event = UploadEvent::Failed {
            reason: error.reason(),
            message: error.user_message(),
        };
        if let Err(e) = self.transition(event) {
            warn!(error = %e, "Could not record upload failure");
        }
    }

    async fn open_session(
        &mut self,
        source: Arc<dyn UploadSource>,
        metadata: UploadMetadata,
    ) -> Result<(UploadSession, ChunkPlan), UploadError> {
        let course_id = metadata.course_id().ok_or(UploadError::MissingCourseId)?.to_string();
        if source.size() == 0 {
            return Err(UploadError::Validation("file is empty".into()));
        }

        let recovery = RecoveryData {
            original_file_name: source.file_name().to_string(),
            course_id,
            content_type: source.content_type().to_string(),
        };
        let opened = self
            .request_session(&recovery, source.size(), &metadata.fields)
            .await?;

        self.recovery_data = Some(recovery);
        self.source = Some(source);
        self.metadata = Some(metadata);
        Ok(opened)
    }

    /// Call `initialize-upload` and build the session and chunk plan
    async fn request_session(
        &self,
        recovery: &RecoveryData,
        file_size: u64,
        fields: &Map<String, Value>,
    ) -> Result<(UploadSession, ChunkPlan), UploadError> {
        let proposed = optimal_chunk_size(
            file_size,
            self.settings.connection_speed_mbps,
            self.settings.chunk_bounds,
        );
        let request = InitializeUploadRequest {
            file_name: recovery.original_file_name.clone(),
            file_size,
            content_type: recovery.content_type.clone(),
            course_id: recovery.course_id.clone(),
            chunk_size: proposed,
            metadata: fields.clone(),
        };

        let raw = self
            .api
            .initialize_upload(&request)
            .await
            .map_err(initialization_error)?;

        let response = normalize_init_response(&raw).ok_or_else(|| UploadError::Initialization {
            reason: FailureReason::Other,
            message: "The server response did not contain an upload session.".into(),
            source: None,
        })?;

        let chunk_size = response.chunk_size.unwrap_or(proposed);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(UploadError::Initialization {
                reason: FailureReason::Validation,
                message: format!(
                    "The server proposed an invalid chunk size of {} bytes.",
                    chunk_size
                ),
                source: None,
            });
        }

        let plan = ChunkPlan::new(file_size, chunk_size)?;
        if let Some(server_total) = response.total_chunks {
            if server_total != plan.total_chunks() {
                debug!(
                    server_total,
                    computed = plan.total_chunks(),
                    "Server chunk count differs, using computed count"
                );
            }
        }

        let session = UploadSession::from_parts(
            response.upload_id,
            response.video_id,
            response.key,
            response.bucket,
            recovery,
            &self.settings.default_bucket,
        );
        Ok((session, plan))
    }

    /// Chunk loop followed by completion
    async fn run(
        &mut self,
        source: &dyn UploadSource,
        recovery: &RecoveryData,
    ) -> Result<CompletedUpload, UploadError> {
        let mut index = 0u64;
        let mut uploaded_bytes = 0u64;

        loop {
            let plan = *self
                .state
                .plan()
                .ok_or_else(|| UploadError::NotInitialized("no chunk plan".into()))?;
            let Some(chunk) = plan.chunk(index) else {
                break;
            };
            let session = self
                .state
                .session()
                .cloned()
                .ok_or_else(|| UploadError::InvalidSession("no active session".into()))?;

            let outcome = ChunkUploader::new(
                self.api.as_ref(),
                self.settings.retry,
                &self.settings.default_bucket,
            )
            .upload_chunk(&session, recovery, source, &chunk)
            .await;

            match outcome {
                Ok(ChunkOutcome::Uploaded(part)) => {
                    self.transition(UploadEvent::ChunkCommitted(part))?;
                    index += 1;
                    uploaded_bytes += chunk.len();
                    self.observers.progress(&UploadProgress::new(
                        index,
                        plan.total_chunks(),
                        uploaded_bytes,
                        plan.file_size(),
                    ));
                }
                Ok(ChunkOutcome::SessionRecovered(recovered)) => {
                    self.recovery.record_automatic(&recovered)?;
                    self.adopt(recovered, RecoveryKind::Automatic)?;
                }
                Ok(ChunkOutcome::EndOfSource) => {
                    warn!(
                        chunk = index,
                        planned = plan.total_chunks(),
                        "Source ended before the planned last chunk"
                    );
                    self.transition(UploadEvent::PlanTruncated(index))?;
                    if index > 0 {
                        self.observers.progress(&UploadProgress::new(
                            index,
                            index,
                            uploaded_bytes,
                            plan.file_size(),
                        ));
                    }
                    break;
                }
                Err(UploadError::SessionExpired { video_id, source: e }) => {
                    warn!(video_id = %video_id, chunk = index, error = %e, "Upload session expired");
                    let outcome = self
                        .recovery
                        .recover(self.api.as_ref(), &session, recovery, &self.settings.default_bucket)
                        .await?;

                    match outcome {
                        RecoveryOutcome::Recovered(recovered) => {
                            self.adopt(recovered, RecoveryKind::Manual)?;
                        }
                        RecoveryOutcome::ReinitializeRequired => {
                            self.restart(&session, source, recovery).await?;
                            index = 0;
                            uploaded_bytes = 0;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let session = self
            .state
            .session()
            .cloned()
            .ok_or_else(|| UploadError::InvalidSession("no active session".into()))?;
        if !session.is_complete() {
            return Err(UploadError::InvalidSession(
                "upload session is missing fields required for completion".into(),
            ));
        }
        let expected = self.total_chunks().unwrap_or_default();
        let parts = ordered_parts(self.state.parts(), expected)?;
        self.complete(&session, parts).await
    }

    fn adopt(&mut self, recovered: SessionRecovery, kind: RecoveryKind) -> Result<(), UploadError> {
        let event = RecoveryEvent {
            previous_video_id: recovered.previous_video_id,
            new_video_id: recovered.new_video_id,
            recovered: true,
            kind,
        };
        self.transition(UploadEvent::SessionReplaced(recovered.session))?;
        self.observers.recovery(&event);
        Ok(())
    }

    /// Replace the expired upload with a brand new one and start over
    async fn restart(
        &mut self,
        expired: &UploadSession,
        source: &dyn UploadSource,
        recovery: &RecoveryData,
    ) -> Result<(), UploadError> {
        let fields = self
            .metadata
            .as_ref()
            .map(|m| m.fields.clone())
            .unwrap_or_default();
        let (session, plan) = self.request_session(recovery, source.size(), &fields).await?;

        info!(
            previous_video_id = %expired.video_id,
            new_video_id = %session.video_id,
            "Upload re-initialized, restarting from the first chunk"
        );
        let event = RecoveryEvent {
            previous_video_id: expired.video_id.clone(),
            new_video_id: session.video_id.clone(),
            recovered: true,
            kind: RecoveryKind::Reinitialized,
        };
        self.transition(UploadEvent::Restarted { session, plan })?;
        self.observers.recovery(&event);
        Ok(())
    }

    #[tracing::instrument(
        name = "video.complete",
        skip(self, session, parts),
        fields(video_id = %session.video_id, parts_count = parts.len()),
        err
    )]
    async fn complete(
        &self,
        session: &UploadSession,
        parts: Vec<ChunkPart>,
    ) -> Result<CompletedUpload, UploadError> {
        let request = CompleteUploadRequest {
            upload_session: SessionRef::from(session),
            parts,
        };
        let response = self
            .api
            .complete_upload(&request)
            .await
            .map_err(completion_error)?;

        Ok(CompletedUpload {
            video_id: response.video_id,
            status: response
                .status
                .unwrap_or_else(|| DEFAULT_COMPLETED_STATUS.to_string()),
            processing_job_id: response.processing_job_id,
            estimated_processing_time: response.estimated_processing_time,
        })
    }
}

/// Sort committed parts and check they form `1..=expected`
fn ordered_parts(parts: &[ChunkPart], expected: u64) -> Result<Vec<ChunkPart>, UploadError> {
    if parts.is_empty() {
        return Err(UploadError::Validation("no parts to complete".into()));
    }

    let mut parts = parts.to_vec();
    parts.sort_by_key(|p| p.part_number);

    for (i, part) in parts.iter().enumerate() {
        let wanted = i as u64 + 1;
        if part.part_number as u64 != wanted {
            return Err(UploadError::Validation(format!(
                "part list is not contiguous: expected part {}, found {}",
                wanted, part.part_number
            )));
        }
        if part.etag.trim().is_empty() {
            return Err(UploadError::Validation(format!(
                "part {} has no etag",
                part.part_number
            )));
        }
    }

    if parts.len() as u64 != expected {
        return Err(UploadError::Validation(format!(
            "{} of {} parts committed",
            parts.len(),
            expected
        )));
    }
    Ok(parts)
}

fn initialization_error(e: ApiError) -> UploadError {
    let reason = e.reason();
    let message = match reason {
        FailureReason::Other => format!("Failed to initialize upload: {}", e),
        known => known.user_message().to_string(),
    };
    UploadError::Initialization {
        reason,
        message,
        source: Some(e),
    }
}

fn completion_error(e: ApiError) -> UploadError {
    match e.status() {
        Some(404) => UploadError::Completion {
            reason: FailureReason::SessionExpired,
            message: "Upload session not found or expired. Please restart the upload.".into(),
        },
        Some(400) => UploadError::Completion {
            reason: FailureReason::Validation,
            message: "Invalid upload data. Please restart the upload.".into(),
        },
        _ => UploadError::Api(e),
    }
}
