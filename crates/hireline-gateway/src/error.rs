use thiserror::Error;

/// Failures reported to the client through the request's ack.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("{0}")]
    Validation(String),

    #[error("participant not found")]
    ParticipantNotFound,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("not a participant of this conversation")]
    NotParticipant,

    #[error("failed to persist message")]
    Persistence(#[from] anyhow::Error),
}

impl SendError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}
