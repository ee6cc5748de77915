use thiserror::Error;

use crate::constants::{MAX_MESSAGE_CHARS, MAX_USERNAME_CHARS};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to encode frame: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to decode frame: {0}")]
    Decode(serde_json::Error),
}

/// Rejections shared by the client (before any request) and the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message text must not be empty")]
    EmptyMessage,

    #[error("Message too long: {len} characters (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Cannot open a chat with yourself")]
    SelfChat,

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

/// Validate a message body. Whitespace-only text counts as empty.
pub fn validate_message_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    let len = text.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::MessageTooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(())
}

pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidUsername("empty".into()));
    }
    if trimmed.chars().count() > MAX_USERNAME_CHARS {
        return Err(ValidationError::InvalidUsername(format!(
            "longer than {MAX_USERNAME_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_text_rejected() {
        assert_eq!(validate_message_text(""), Err(ValidationError::EmptyMessage));
        assert_eq!(validate_message_text(" \n\t"), Err(ValidationError::EmptyMessage));
        assert!(validate_message_text("hello").is_ok());
    }

    #[test]
    fn overlong_text_rejected() {
        let text = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            validate_message_text(&text),
            Err(ValidationError::MessageTooLong { .. })
        ));
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("bob").is_ok());
        assert!(validate_username("   ").is_err());
        assert!(validate_username(&"b".repeat(MAX_USERNAME_CHARS + 1)).is_err());
    }
}
