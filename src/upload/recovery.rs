//! Bounded session recovery
//!
//! Every recovery, automatic (announced inside a chunk response) or manual
//! (`recover-session` call), consumes one attempt from a per-upload budget.
//! Once the budget is spent the next expiry fails the upload.

use tracing::{info, warn};

use super::session::{RecoveryData, SessionRecovery, UploadSession};
use super::UploadError;
use crate::api::{RecoverSessionRequest, VideoStreamingApi};
use crate::metrics;

/// Default recovery budget per upload
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 2;

/// Result of a manual recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The server issued a replacement session
    Recovered(SessionRecovery),
    /// The session cannot be recovered; a new upload must be initialized
    /// from the original source
    ReinitializeRequired,
}

/// Tracks the recovery budget of one upload
#[derive(Debug, Clone)]
pub struct SessionRecoveryAgent {
    max_attempts: u32,
    attempts: u32,
}

impl Default for SessionRecoveryAgent {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECOVERY_ATTEMPTS)
    }
}

impl SessionRecoveryAgent {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consume one attempt, or fail when the budget is spent
    pub fn begin_attempt(&mut self) -> Result<u32, UploadError> {
        if self.attempts >= self.max_attempts {
            warn!(
                attempts = self.attempts,
                max_attempts = self.max_attempts,
                "Session recovery limit reached"
            );
            return Err(UploadError::RecoveryLimitReached {
                attempts: self.attempts,
            });
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// Count a recovery the server already performed
    pub fn record_automatic(&mut self, recovery: &SessionRecovery) -> Result<(), UploadError> {
        let attempt = self.begin_attempt()?;
        metrics::record_session_recovery("automatic");
        info!(
            attempt,
            previous_video_id = %recovery.previous_video_id,
            new_video_id = %recovery.new_video_id,
            "Adopted automatically recovered session"
        );
        Ok(())
    }

    /// Ask the server to replace `expired`
    ///
    /// Only the budget check fails; a recovery call that does not produce a
    /// usable session turns into [`RecoveryOutcome::ReinitializeRequired`].
    #[tracing::instrument(
        name = "video.recover_session",
        skip(self, api, expired, recovery, default_bucket),
        fields(expired_video_id = %expired.video_id, attempt = self.attempts + 1),
        err
    )]
    pub async fn recover(
        &mut self,
        api: &dyn VideoStreamingApi,
        expired: &UploadSession,
        recovery: &RecoveryData,
        default_bucket: &str,
    ) -> Result<RecoveryOutcome, UploadError> {
        self.begin_attempt()?;

        if !recovery.is_complete() || !expired.is_usable() {
            warn!("Recovery data incomplete, a new upload is required");
            metrics::record_session_recovery("reinitialize");
            return Ok(RecoveryOutcome::ReinitializeRequired);
        }

        let response = match api.recover_session(&RecoverSessionRequest::new(expired, recovery)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Session recovery failed, a new upload is required");
                metrics::record_session_recovery("reinitialize");
                return Ok(RecoveryOutcome::ReinitializeRequired);
            }
        };

        let info = response.recovery.unwrap_or_default();
        let session = response.new_upload_session.into_session(recovery, default_bucket);
        if !session.is_usable() {
            warn!("Recovered session is missing identifiers, a new upload is required");
            metrics::record_session_recovery("reinitialize");
            return Ok(RecoveryOutcome::ReinitializeRequired);
        }

        metrics::record_session_recovery("manual");
        info!(
            previous_video_id = %expired.video_id,
            new_video_id = %session.video_id,
            "Upload session recovered"
        );

        Ok(RecoveryOutcome::Recovered(SessionRecovery {
            previous_video_id: info
                .previous_video_id
                .unwrap_or_else(|| expired.video_id.clone()),
            new_video_id: info.new_video_id.unwrap_or_else(|| session.video_id.clone()),
            session,
        }))
    }
}
