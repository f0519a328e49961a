use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message cannot be empty")]
    Empty,
    #[error("message is too long ({length}/{max} characters)")]
    TooLong { length: usize, max: usize },
}

/// Failure states surfaced to the chat UI. Each variant maps to its own copy
/// through [`ChatError::user_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Too many messages. Wait {wait_secs} seconds.")]
    RateLimited { wait_secs: u64 },
    #[error("failed to deliver message: {0}")]
    Delivery(String),
    #[error("message could not be delivered after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("only the sender can change this message")]
    Unauthorized,
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("conversation is closed")]
    Closed,
}

impl ChatError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::RateLimited { .. } => self.to_string(),
            Self::Delivery(_) => "Message not sent. We'll retry automatically.".to_string(),
            Self::RetriesExhausted { .. } => {
                "Message could not be sent. Tap retry to try again.".to_string()
            }
            Self::Unauthorized => "You can only change your own messages.".to_string(),
            Self::NotFound(_) => "This message no longer exists.".to_string(),
            Self::Closed => "This conversation is closed.".to_string(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::{ChatError, ValidationError};

    #[test]
    fn rate_limit_copy_includes_wait() {
        let err = ChatError::RateLimited { wait_secs: 42 };
        assert_eq!(err.user_message(), "Too many messages. Wait 42 seconds.");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn validation_copy_is_specific() {
        let err = ChatError::from(ValidationError::TooLong {
            length: 1200,
            max: 1000,
        });
        assert_eq!(err.user_message(), "message is too long (1200/1000 characters)");
        assert!(!err.is_rate_limited());
    }
}
