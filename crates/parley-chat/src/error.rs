use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Every failure a caller of the chat core can observe.
///
/// `kind()` is the stable machine-readable name surfaced over REST and the socket.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("missing bearer credential")]
    Unauthorized,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("{0} not found")]
    NotFound(String),

    #[error("cannot start a conversation with yourself")]
    SelfChatNotAllowed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidCredential => "invalid_credential",
            Self::NotFound(_) => "not_found",
            Self::SelfChatNotAllowed => "self_chat_not_allowed",
            Self::Forbidden(_) => "forbidden",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Validation(_) => "validation_error",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// Message safe to hand to a client. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
