//! Upload state machine
//!
//! [`UploadState`] carries exactly the data valid in each phase. Transitions
//! are pure: [`UploadState::apply`] consumes the state and an event and
//! returns the next state, or a [`StateError`] for an event that makes no
//! sense in the current phase.

use thiserror::Error;

use super::chunk::ChunkPlan;
use super::client::CompletedUpload;
use super::session::{ChunkPart, UploadSession};
use super::FailureReason;

/// Status reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    Idle,
    Initializing,
    Initialized,
    Uploading,
    Completed,
    Failed,
    Aborted,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Idle => "idle",
            UploadStatus::Initializing => "initializing",
            UploadStatus::Initialized => "initialized",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Aborted => "aborted",
        }
    }

    /// No further progress is possible without a new `initialize`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Aborted
        )
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid upload state transition: {event} while {from}")]
pub struct StateError {
    pub from: UploadStatus,
    pub event: &'static str,
}

/// Phase of one upload
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UploadState {
    #[default]
    Idle,
    Initializing,
    Ready {
        session: UploadSession,
        plan: ChunkPlan,
    },
    Uploading {
        session: UploadSession,
        plan: ChunkPlan,
        parts: Vec<ChunkPart>,
    },
    Completed(CompletedUpload),
    /// The session is kept so an explicit abort can still release it
    Failed {
        reason: FailureReason,
        message: String,
        session: Option<UploadSession>,
    },
    Aborted,
}

/// Input to [`UploadState::apply`]
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Begin,
    Initialized {
        session: UploadSession,
        plan: ChunkPlan,
    },
    Started,
    ChunkCommitted(ChunkPart),
    /// Recovery swapped the session; committed parts stay valid
    SessionReplaced(UploadSession),
    /// A brand new multipart upload replaced the old one; parts are dropped
    Restarted {
        session: UploadSession,
        plan: ChunkPlan,
    },
    PlanTruncated(u64),
    Completed(CompletedUpload),
    Failed {
        reason: FailureReason,
        message: String,
    },
    Aborted,
    Reset,
}

impl UploadEvent {
    fn name(&self) -> &'static str {
        match self {
            UploadEvent::Begin => "begin",
            UploadEvent::Initialized { .. } => "initialized",
            UploadEvent::Started => "started",
            UploadEvent::ChunkCommitted(_) => "chunk_committed",
            UploadEvent::SessionReplaced(_) => "session_replaced",
            UploadEvent::Restarted { .. } => "restarted",
            UploadEvent::PlanTruncated(_) => "plan_truncated",
            UploadEvent::Completed(_) => "completed",
            UploadEvent::Failed { .. } => "failed",
            UploadEvent::Aborted => "aborted",
            UploadEvent::Reset => "reset",
        }
    }
}

impl UploadState {
    pub fn status(&self) -> UploadStatus {
        match self {
            UploadState::Idle => UploadStatus::Idle,
            UploadState::Initializing => UploadStatus::Initializing,
            UploadState::Ready { .. } => UploadStatus::Initialized,
            UploadState::Uploading { .. } => UploadStatus::Uploading,
            UploadState::Completed(_) => UploadStatus::Completed,
            UploadState::Failed { .. } => UploadStatus::Failed,
            UploadState::Aborted => UploadStatus::Aborted,
        }
    }

    /// The live session, if any
    pub fn session(&self) -> Option<&UploadSession> {
        match self {
            UploadState::Ready { session, .. } | UploadState::Uploading { session, .. } => Some(session),
            UploadState::Failed { session, .. } => session.as_ref(),
            _ => None,
        }
    }

    pub fn plan(&self) -> Option<&ChunkPlan> {
        match self {
            UploadState::Ready { plan, .. } | UploadState::Uploading { plan, .. } => Some(plan),
            _ => None,
        }
    }

    /// Parts committed so far, in commit order
    pub fn parts(&self) -> &[ChunkPart] {
        match self {
            UploadState::Uploading { parts, .. } => parts,
            _ => &[],
        }
    }

    pub fn completed(&self) -> Option<&CompletedUpload> {
        match self {
            UploadState::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// Compute the next state
    pub fn apply(self, event: UploadEvent) -> Result<UploadState, StateError> {
        let from = self.status();
        let name = event.name();

        let next = match (self, event) {
            (_, UploadEvent::Reset) => UploadState::Idle,
            (_, UploadEvent::Aborted) => UploadState::Aborted,

            (UploadState::Idle, UploadEvent::Begin) => UploadState::Initializing,

            (UploadState::Initializing, UploadEvent::Initialized { session, plan }) => {
                UploadState::Ready { session, plan }
            }

            (UploadState::Ready { session, plan }, UploadEvent::Started) => UploadState::Uploading {
                session,
                plan,
                parts: Vec::new(),
            },

            (
                UploadState::Uploading {
                    session,
                    plan,
                    mut parts,
                },
                UploadEvent::ChunkCommitted(part),
            ) => {
                parts.retain(|p| p.part_number != part.part_number);
                parts.push(part);
                UploadState::Uploading { session, plan, parts }
            }

            (UploadState::Uploading { plan, parts, .. }, UploadEvent::SessionReplaced(session)) => {
                UploadState::Uploading { session, plan, parts }
            }

            (UploadState::Uploading { .. }, UploadEvent::Restarted { session, plan }) => {
                UploadState::Uploading {
                    session,
                    plan,
                    parts: Vec::new(),
                }
            }

            (
                UploadState::Uploading {
                    session,
                    mut plan,
                    parts,
                },
                UploadEvent::PlanTruncated(total_chunks),
            ) => {
                plan.truncate(total_chunks);
                UploadState::Uploading { session, plan, parts }
            }

            (UploadState::Uploading { .. }, UploadEvent::Completed(result)) => UploadState::Completed(result),

            (UploadState::Initializing, UploadEvent::Failed { reason, message }) => UploadState::Failed {
                reason,
                message,
                session: None,
            },

            (
                UploadState::Ready { session, .. } | UploadState::Uploading { session, .. },
                UploadEvent::Failed { reason, message },
            ) => UploadState::Failed {
                reason,
                message,
                session: Some(session),
            },

            _ => return Err(StateError { from, event: name }),
        };

        Ok(next)
    }
}
