use thiserror::Error;

/// Failures of coordinator operations.
///
/// Every variant is reported to the originating connection only; none of them
/// affect other connections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("not a member of room {room_id}")]
    NotAMember { room_id: String },
    #[error("room membership is temporarily unavailable")]
    MembershipUnavailable,
    #[error("message content exceeds {limit} characters")]
    ContentTooLarge { limit: usize },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("failed to persist message")]
    PersistFailure,
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage unavailable")]
    StorageUnavailable,
}

impl RealtimeError {
    pub fn not_a_member(room_id: impl Into<String>) -> Self {
        Self::NotAMember {
            room_id: room_id.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidPayload(reason.into())
    }

    /// Stable code sent alongside the human readable message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::NotAMember { .. } => "not_a_member",
            Self::MembershipUnavailable => "membership_unavailable",
            Self::ContentTooLarge { .. } => "content_too_large",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::PersistFailure => "persist_failure",
            Self::NotFound(_) => "not_found",
            Self::StorageUnavailable => "storage_unavailable",
        }
    }
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;
