//! Error types for the lora-proto crate.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a message.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProtoError::Decoding("eof".to_string()).to_string(),
            "decoding error: eof"
        );
        assert_eq!(
            ProtoError::Validation("empty gateway id".to_string()).to_string(),
            "validation error: empty gateway id"
        );
    }
}
